use kabu_analytics::error::AnalyticsError;
use kabu_core::common::SymbolError;
use kabu_core::store::error::StoreError;
use thiserror::Error;

/// # Summary
/// 标的追踪与行情查询的错误枚举。
///
/// # Invariants
/// - 上游错误保持原类型，由 API 层统一映射为状态码。
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error(transparent)]
    InvalidSymbol(#[from] SymbolError),
    // 标的既未被追踪也没有任何数据
    #[error("Symbol not found: {0}")]
    NotFound(String),
    #[error("Invalid range: {0}")]
    InvalidRange(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Analytics(#[from] AnalyticsError),
}
