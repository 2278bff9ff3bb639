//! # 系统路由

use axum::Json;
use axum::extract::State;
use axum::http::{Method, Uri};

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{ApiResponse, HealthResponse};

/// 存活检查
#[utoipa::path(
    get,
    path = "/health",
    tag = "系统 (System)",
    responses(
        (status = 200, description = "服务存活", body = ApiResponse<HealthResponse>)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::ok(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        broker_configured: state.broker.is_some(),
    }))
}

/// 未匹配任何路由时以统一错误信封返回 404
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("no route for {}", uri.path()))
}

/// 路径存在但方法不匹配时返回 405
pub async fn method_not_allowed(method: Method, uri: Uri) -> ApiError {
    ApiError::MethodNotAllowed(format!("{} is not supported on {}", method, uri.path()))
}
