//! # 标的管理路由控制器
//!
//! 实现 `/api/market-data/symbols` 路径下的追踪、取消追踪、状态与健康度查询及回填接口。

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use chrono::{Duration, Utc};
use kabu_core::market::entity::DataSource;
use kabu_core::tracker::entity::{
    HealthReport, IngestReport, SourceStatus, SymbolStatus, TrackedSymbol,
};
use kabu_market::service::SymbolSummary;
use std::str::FromStr;

use super::{parse_time, parse_timeframe};
use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{
    ApiResponse, BackfillRequest, SourceStatusQuery, SymbolListQuery, TrackSymbolRequest,
};

/// 状态历史默认返回的天数
const DEFAULT_STATUS_DAYS: u32 = 30;

/// 列出被追踪的标的
#[utoipa::path(
    get,
    path = "/api/market-data/symbols",
    tag = "标的 (Symbols)",
    params(SymbolListQuery),
    responses(
        (status = 200, description = "标的列表", body = ApiResponse<Vec<SymbolSummary>>),
        (status = 400, description = "状态参数非法")
    )
)]
pub async fn list_symbols(
    State(state): State<AppState>,
    query: Result<Query<SymbolListQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<SymbolSummary>>>, ApiError> {
    let Query(query) = query?;
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(SymbolStatus::from_str)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let symbols = state.market.symbols(status).await?;
    Ok(Json(ApiResponse::ok(symbols)))
}

/// 开始追踪标的
///
/// 已存在的标的 (包括已退市) 会被重新激活。`backfill` 为 true 时在后台回填历史数据。
#[utoipa::path(
    post,
    path = "/api/market-data/symbols",
    tag = "标的 (Symbols)",
    request_body = TrackSymbolRequest,
    responses(
        (status = 200, description = "追踪成功", body = ApiResponse<TrackedSymbol>),
        (status = 400, description = "标的代码非法"),
        (status = 422, description = "请求体无法解析")
    )
)]
pub async fn track_symbol(
    State(state): State<AppState>,
    body: Result<Json<TrackSymbolRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<TrackedSymbol>>, ApiError> {
    let Json(req) = body?;
    let record = state
        .tracker
        .track(&req.symbol, req.name, req.exchange)
        .await?;

    if req.backfill {
        let tracker = state.tracker.clone();
        let symbol = record.symbol.clone();
        let timeframe = state.config.ingestion.timeframe;
        tokio::spawn(async move {
            match tracker.update_symbol(&symbol, timeframe).await {
                Ok(report) => tracing::info!(
                    "Initial backfill of {} stored {} bars",
                    symbol,
                    report.bars_stored
                ),
                Err(e) => tracing::error!("Initial backfill of {} failed: {}", symbol, e),
            }
        });
    }

    Ok(Json(ApiResponse::ok(record)))
}

/// 停止追踪标的，已入库的数据保留
#[utoipa::path(
    delete,
    path = "/api/market-data/symbols/{symbol}",
    tag = "标的 (Symbols)",
    params(("symbol" = String, Path, description = "标的代码")),
    responses(
        (status = 200, description = "已停止追踪", body = ApiResponse<TrackedSymbol>),
        (status = 404, description = "标的未被追踪")
    )
)]
pub async fn untrack_symbol(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<TrackedSymbol>>, ApiError> {
    let record = state.tracker.untrack(&symbol).await?;
    Ok(Json(ApiResponse::ok(record)))
}

/// 按源按日的采集状态
#[utoipa::path(
    get,
    path = "/api/market-data/symbols/{symbol}/status",
    tag = "标的 (Symbols)",
    params(
        ("symbol" = String, Path, description = "标的代码"),
        SourceStatusQuery
    ),
    responses(
        (status = 200, description = "按日期倒序的状态记录", body = ApiResponse<Vec<SourceStatus>>),
        (status = 404, description = "标的未被追踪")
    )
)]
pub async fn source_status(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    query: Result<Query<SourceStatusQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<SourceStatus>>>, ApiError> {
    let Query(query) = query?;
    let source = query
        .source
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(DataSource::from_str)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let days = query.days.unwrap_or(DEFAULT_STATUS_DAYS).max(1);
    let history = state
        .market
        .source_history(&symbol, source, Some(days))
        .await?;
    Ok(Json(ApiResponse::ok(history)))
}

/// 标的健康度 (只读，不会触发退市判定)
#[utoipa::path(
    get,
    path = "/api/market-data/symbols/{symbol}/health",
    tag = "标的 (Symbols)",
    params(("symbol" = String, Path, description = "标的代码")),
    responses(
        (status = 200, description = "健康检查报告", body = ApiResponse<HealthReport>),
        (status = 404, description = "标的未被追踪")
    )
)]
pub async fn symbol_health(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<HealthReport>>, ApiError> {
    let report = state.tracker.health(&symbol).await?;
    Ok(Json(ApiResponse::ok(report)))
}

/// 回填历史数据
///
/// 同步执行，按周期分段请求数据源；请求体可为空。
#[utoipa::path(
    post,
    path = "/api/market-data/symbols/{symbol}/backfill",
    tag = "标的 (Symbols)",
    params(("symbol" = String, Path, description = "标的代码")),
    request_body = BackfillRequest,
    responses(
        (status = 200, description = "回填报告", body = ApiResponse<IngestReport>),
        (status = 400, description = "时间或周期参数非法"),
        (status = 404, description = "标的未被追踪")
    )
)]
pub async fn backfill_symbol(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<ApiResponse<IngestReport>>, ApiError> {
    let req: BackfillRequest = if body.iter().all(u8::is_ascii_whitespace) {
        BackfillRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::Validation {
            message: format!("invalid backfill request: {}", e),
            details: None,
        })?
    };

    let timeframe = parse_timeframe(req.timeframe.as_deref(), state.config.ingestion.timeframe)?;
    let end = parse_time(req.end.as_deref())?.unwrap_or_else(Utc::now);
    let start = parse_time(req.start.as_deref())?.unwrap_or_else(|| {
        end - Duration::days(i64::from(state.config.ingestion.backfill_days))
    });

    let report = state
        .tracker
        .backfill(&symbol, timeframe, start, end)
        .await?;
    Ok(Json(ApiResponse::ok(report)))
}
