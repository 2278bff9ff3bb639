//! # API 统一错误处理
//!
//! 将下层各 crate 的错误类型统一映射到 HTTP 状态码与错误信封。

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kabu_analytics::error::AnalyticsError;
use kabu_core::broker::entity::Violation;
use kabu_core::broker::port::BrokerError;
use kabu_market::error::TrackerError;
use thiserror::Error;

use crate::types::ApiErrorResponse;

/// API 层统一错误枚举
#[derive(Error, Debug)]
pub enum ApiError {
    /// 请求参数错误 (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// 缺少凭证或券商拒绝凭证 (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// 凭证错误或券商禁止该操作 (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// 资源未找到 (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// 路径存在但不支持该方法 (405)
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// 请求体无法解析或业务校验失败 (422)
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },

    /// 网关或上游限流 (429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// 尚未实现的接口 (501)
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// 依赖的服务未配置 (503)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 下层业务错误 (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::RateLimited(_) => "RATE_LIMITED",
            ApiError::NotImplemented(_) => "NOT_IMPLEMENTED",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 字段级校验失败
    pub fn violations(message: impl Into<String>, violations: &[Violation]) -> Self {
        ApiError::Validation {
            message: message.into(),
            details: serde_json::to_value(violations).ok(),
        }
    }
}

/// 将 `ApiError` 转换为 axum 的 HTTP 响应
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let (message, details) = match self {
            ApiError::Internal(msg) => {
                // 内部错误只记录日志，不向客户端透传细节
                tracing::error!("Internal error: {}", msg);
                ("Internal server error".to_string(), None)
            }
            ApiError::Validation { message, details } => (message, details),
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::MethodNotAllowed(msg)
            | ApiError::RateLimited(msg)
            | ApiError::NotImplemented(msg)
            | ApiError::ServiceUnavailable(msg) => (msg, None),
        };

        let body = Json(ApiErrorResponse::new(code, message, details));
        (status, body).into_response()
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::InvalidSymbol(e) => ApiError::BadRequest(e.to_string()),
            TrackerError::NotFound(msg) => ApiError::NotFound(msg),
            TrackerError::InvalidRange(msg) => ApiError::BadRequest(msg),
            TrackerError::Analytics(e) => e.into(),
            TrackerError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AnalyticsError> for ApiError {
    fn from(err: AnalyticsError) -> Self {
        match err {
            AnalyticsError::UnsupportedResample { .. } | AnalyticsError::InvalidIndicator(_) => {
                ApiError::BadRequest(err.to_string())
            }
            AnalyticsError::NoData(msg) => ApiError::NotFound(format!("no data for {}", msg)),
            AnalyticsError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            BrokerError::Forbidden(msg) => ApiError::Forbidden(msg),
            BrokerError::NotFound(msg) => ApiError::NotFound(msg),
            BrokerError::Rejected(msg) => ApiError::Validation {
                message: msg,
                details: None,
            },
            BrokerError::RateLimited => ApiError::RateLimited("broker rate limit".to_string()),
            BrokerError::Upstream { status: 400, message } => ApiError::BadRequest(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation {
            message: rejection.body_text(),
            details: None,
        }
    }
}
