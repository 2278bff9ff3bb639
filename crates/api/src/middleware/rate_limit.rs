//! # 网关限流中间件
//!
//! 进程内 `governor` 令牌桶，所有客户端共享同一配额。

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::ApiError;
use crate::server::AppState;

/// 网关整体限流器，克隆后共享同一个令牌桶
#[derive(Clone)]
pub struct GatewayLimiter {
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl GatewayLimiter {
    /// 每秒 `per_second` 个请求，突发 `burst`；参数为 0 时按 1 处理
    pub fn per_second(per_second: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(rate);
        Self {
            limiter: Arc::new(RateLimiter::direct(
                Quota::per_second(rate).allow_burst(burst),
            )),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl std::fmt::Debug for GatewayLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayLimiter").finish_non_exhaustive()
    }
}

/// 配额耗尽时返回 429
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.limiter.try_acquire() {
        tracing::warn!("Gateway rate limit hit on {}", req.uri().path());
        return Err(ApiError::RateLimited("too many requests".into()));
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_reject() {
        let limiter = GatewayLimiter::per_second(1, 3);
        assert!((0..3).all(|_| limiter.try_acquire()));
        assert!(!limiter.try_acquire());

        // 克隆共享配额
        let clone = limiter.clone();
        assert!(!clone.try_acquire());
    }
}
