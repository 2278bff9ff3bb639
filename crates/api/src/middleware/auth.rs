//! # 鉴权中间件
//!
//! 配置了 `server.api_token` 时，`/api/alpaca` 下的接口要求 `Authorization: Bearer <token>`。

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::server::AppState;

/// # Summary
/// 校验 Bearer Token。
///
/// # Logic
/// 1. 未配置 Token 时直接放行。
/// 2. 缺少或格式错误的 `Authorization` 头返回 401。
/// 3. Token 不匹配返回 403。
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.config.server.api_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| {
            tracing::warn!("Missing Authorization header on {}", req.uri().path());
            ApiError::Unauthorized("Missing Authorization header".into())
        })?
        .to_str()
        .map_err(|_| ApiError::Unauthorized("Invalid Authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("Invalid Bearer format".into()))?;

    if !constant_time_eq(token.trim().as_bytes(), expected.as_bytes()) {
        tracing::warn!("Rejected API token on {}", req.uri().path());
        return Err(ApiError::Forbidden("Invalid API token".into()));
    }

    Ok(next.run(req).await)
}

/// 长度相同时逐字节比较全部内容
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
