//! # 策略路由占位
//!
//! 策略执行尚未实现，`/api/strategies` 的全部方法固定返回 501。

use axum::Json;

use crate::error::ApiError;
use crate::types::ApiResponse;

const NOT_READY: &str = "strategy execution is not implemented yet";

/// 列出策略 (未实现)
#[utoipa::path(
    get,
    path = "/api/strategies",
    tag = "策略 (Strategy)",
    responses(
        (status = 501, description = "尚未实现")
    )
)]
pub async fn list_strategies() -> Result<Json<ApiResponse<Vec<String>>>, ApiError> {
    Err(ApiError::NotImplemented(NOT_READY.into()))
}

/// 部署策略 (未实现)
#[utoipa::path(
    post,
    path = "/api/strategies",
    tag = "策略 (Strategy)",
    responses(
        (status = 501, description = "尚未实现")
    )
)]
pub async fn create_strategy() -> Result<Json<ApiResponse<String>>, ApiError> {
    Err(ApiError::NotImplemented(NOT_READY.into()))
}
