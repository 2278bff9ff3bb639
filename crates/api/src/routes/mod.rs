//! # 路由控制器
//!
//! 每个子模块对应一个路由组，查询参数的解析辅助函数放在这里共用。

pub mod alpaca;
pub mod market;
pub mod strategy;
pub mod symbols;
pub mod system;

use chrono::{DateTime, Utc};
use kabu_core::common::TimeFrame;
use kabu_core::common::time::parse_time_param;
use std::str::FromStr;

use crate::error::ApiError;

/// 解析周期参数，为空时使用默认值
pub(crate) fn parse_timeframe(
    raw: Option<&str>,
    default: TimeFrame,
) -> Result<TimeFrame, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => TimeFrame::from_str(s).map_err(ApiError::BadRequest),
        None => Ok(default),
    }
}

/// 解析可选的时间参数 (RFC 3339 或 `YYYY-MM-DD`)
pub(crate) fn parse_time(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_time_param(s).map_err(ApiError::BadRequest))
        .transpose()
}

/// 校验 `limit` 落在 `1..=max`
pub(crate) fn check_limit(limit: Option<usize>, max: usize) -> Result<Option<usize>, ApiError> {
    match limit {
        Some(n) if n == 0 || n > max => Err(ApiError::BadRequest(format!(
            "limit must be within 1..={}",
            max
        ))),
        other => Ok(other),
    }
}
