//! # `kabu-feed` - 外部行情源适配
//!
//! `MarketDataProvider` 的 HTTP 实现 (Yahoo Finance、Alpaca Market Data)，
//! 以及所有外发请求共用的令牌桶限流器。

pub mod alpaca;
pub mod limiter;
pub mod yahoo;

use kabu_core::market::error::MarketError;
use reqwest::StatusCode;

/// 将非 2xx 响应映射为行情域错误
pub(crate) fn status_error(source: &str, status: StatusCode, symbol: &str) -> MarketError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            MarketError::Unauthorized(format!("{} rejected credentials ({})", source, status))
        }
        StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            MarketError::NotFound(symbol.to_string())
        }
        StatusCode::TOO_MANY_REQUESTS => MarketError::RateLimited(source.to_string()),
        _ => MarketError::Network(format!("{} HTTP {}", source, status)),
    }
}
