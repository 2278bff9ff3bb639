//! reqwest 使用 `rustls-no-provider`，进程内需要显式安装一次加密后端。

use std::sync::Once;

static INSTALL: Once = Once::new();

/// # Summary
/// 安装进程级 rustls `ring` 加密后端。
///
/// # Logic
/// 1. 通过 `Once` 保证只执行一次。
/// 2. 若其它组件已抢先安装，则保留已有后端。
pub fn ensure_crypto_provider() {
    INSTALL.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("rustls crypto provider already installed");
        }
    });
}
