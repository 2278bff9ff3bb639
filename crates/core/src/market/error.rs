use thiserror::Error;

/// # Summary
/// 行情数据域错误枚举，处理网络、解析、限流及数据缺失等问题。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug)]
pub enum MarketError {
    // 网络层错误，包含底层 HTTP 客户端错误信息
    #[error("Network error: {0}")]
    Network(String),
    // 数据解析错误，如 JSON 格式不匹配
    #[error("Parse error: {0}")]
    Parse(String),
    // 请求的标的或数据不存在
    #[error("Data not found: {0}")]
    NotFound(String),
    // 数据源返回 429
    #[error("Rate limited by {0}")]
    RateLimited(String),
    // 凭证缺失或被数据源拒绝
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    // 调用参数非法 (如周期不被数据源支持)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    // 未知或未分类的错误
    #[error("Unknown error: {0}")]
    Unknown(String),
}
