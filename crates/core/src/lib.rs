//! # `kabu-core` - 领域核心
//!
//! 定义行情、标的生命周期与券商交易三个领域的实体、错误与端口 (Port)。
//! 本 crate 不包含任何 IO 实现，具体实现由 `kabu-store`、`kabu-feed`、`kabu-broker` 注入。

pub mod common;
pub mod config;
pub mod tls;

pub mod market {
    pub mod entity;
    pub mod error;
    pub mod port;
}

pub mod store {
    pub mod error;
    pub mod port;
}

pub mod tracker {
    pub mod entity;
}

pub mod broker {
    pub mod entity;
    pub mod port;
}

#[cfg(feature = "test-utils")]
pub mod testing;
