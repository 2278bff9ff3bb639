//! # 行情数据路由控制器
//!
//! 实现 `/api/market-data/stats` 与 `/api/market-data/data/{symbol}` 下的只读查询接口。

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use kabu_analytics::indicators::IndicatorSpec;
use kabu_analytics::service::IndicatorResult;
use kabu_core::common::TimeFrame;
use kabu_core::market::entity::{Bar, MarketStats};
use kabu_market::service::{BarCount, OhlcSeries};

use super::{check_limit, parse_time, parse_timeframe};
use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{ApiResponse, BarsQuery, IndicatorQuery, OhlcQuery, TimeframeQuery};

/// 单次返回的 K 线上限
const MAX_BARS: usize = 10_000;
/// 单次返回的指标点上限
const MAX_INDICATOR_POINTS: usize = 1_000;
const DEFAULT_INDICATOR_POINTS: usize = 100;
const DEFAULT_INDICATORS: &str = "sma,ema,rsi";

/// 行情库全局统计
#[utoipa::path(
    get,
    path = "/api/market-data/stats",
    tag = "行情 (Market Data)",
    responses(
        (status = 200, description = "统计信息", body = ApiResponse<MarketStats>)
    )
)]
pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<MarketStats>>, ApiError> {
    let stats = state.market.stats().await?;
    Ok(Json(ApiResponse::ok(stats)))
}

/// 查询 K 线
///
/// 指定 `limit` 时返回区间内最新的若干根，结果始终按时间升序。
#[utoipa::path(
    get,
    path = "/api/market-data/data/{symbol}",
    tag = "行情 (Market Data)",
    params(
        ("symbol" = String, Path, description = "标的代码"),
        BarsQuery
    ),
    responses(
        (status = 200, description = "K 线列表", body = ApiResponse<Vec<Bar>>),
        (status = 400, description = "参数非法"),
        (status = 404, description = "标的不存在")
    )
)]
pub async fn get_bars(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    query: Result<Query<BarsQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Bar>>>, ApiError> {
    let Query(query) = query?;
    let timeframe = parse_timeframe(query.timeframe.as_deref(), TimeFrame::Day1)?;
    let start = parse_time(query.start.as_deref())?;
    let end = parse_time(query.end.as_deref())?;
    let limit = check_limit(query.limit, MAX_BARS)?;

    let bars = state
        .market
        .bars(&symbol, timeframe, start, end, limit)
        .await?;
    Ok(Json(ApiResponse::ok(bars)))
}

/// 最新一根 K 线
#[utoipa::path(
    get,
    path = "/api/market-data/data/{symbol}/latest",
    tag = "行情 (Market Data)",
    params(
        ("symbol" = String, Path, description = "标的代码"),
        TimeframeQuery
    ),
    responses(
        (status = 200, description = "最新 K 线", body = ApiResponse<Bar>),
        (status = 404, description = "标的不存在或该周期没有数据")
    )
)]
pub async fn get_latest(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    query: Result<Query<TimeframeQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Bar>>, ApiError> {
    let Query(query) = query?;
    let timeframe = parse_timeframe(query.timeframe.as_deref(), TimeFrame::Day1)?;
    let bar = state.market.latest(&symbol, timeframe).await?;
    Ok(Json(ApiResponse::ok(bar)))
}

/// K 线条数，不指定周期时统计全部周期
#[utoipa::path(
    get,
    path = "/api/market-data/data/{symbol}/count",
    tag = "行情 (Market Data)",
    params(
        ("symbol" = String, Path, description = "标的代码"),
        TimeframeQuery
    ),
    responses(
        (status = 200, description = "条数", body = ApiResponse<BarCount>),
        (status = 404, description = "标的不存在")
    )
)]
pub async fn get_count(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    query: Result<Query<TimeframeQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<BarCount>>, ApiError> {
    let Query(query) = query?;
    let timeframe = query
        .timeframe
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|raw| parse_timeframe(Some(raw), TimeFrame::Day1))
        .transpose()?;
    let count = state.market.count(&symbol, timeframe).await?;
    Ok(Json(ApiResponse::ok(count)))
}

/// 重采样 OHLC 序列
///
/// 未指定源周期时自动选择已存储的、能整除目标周期的最粗周期。
#[utoipa::path(
    get,
    path = "/api/market-data/data/{symbol}/ohlc",
    tag = "行情 (Market Data)",
    params(
        ("symbol" = String, Path, description = "标的代码"),
        OhlcQuery
    ),
    responses(
        (status = 200, description = "OHLC 序列及汇总", body = ApiResponse<OhlcSeries>),
        (status = 400, description = "周期组合无法重采样"),
        (status = 404, description = "标的不存在或没有可用数据")
    )
)]
pub async fn get_ohlc(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    query: Result<Query<OhlcQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<OhlcSeries>>, ApiError> {
    let Query(query) = query?;
    let interval = parse_timeframe(query.interval.as_deref(), TimeFrame::Day1)?;
    let source = query
        .source_timeframe
        .as_deref()
        .map(|raw| parse_timeframe(Some(raw), interval))
        .transpose()?;
    let start = parse_time(query.start.as_deref())?;
    let end = parse_time(query.end.as_deref())?;
    let limit = check_limit(query.limit, MAX_BARS)?;

    let series = state
        .market
        .ohlc(&symbol, interval, source, start, end, limit)
        .await?;
    Ok(Json(ApiResponse::ok(series)))
}

/// 技术指标
///
/// 支持 `sma_N`、`ema_N`、`rsi_N`、`macd_F_S_G`、`bbands_N_K`、`atr_N`，省略参数时使用默认值。
/// 预热期内的值为 null。
#[utoipa::path(
    get,
    path = "/api/market-data/data/{symbol}/indicators",
    tag = "行情 (Market Data)",
    params(
        ("symbol" = String, Path, description = "标的代码"),
        IndicatorQuery
    ),
    responses(
        (status = 200, description = "指标序列", body = ApiResponse<IndicatorResult>),
        (status = 400, description = "指标或周期参数非法"),
        (status = 404, description = "标的不存在或没有可用数据")
    )
)]
pub async fn get_indicators(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    query: Result<Query<IndicatorQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<IndicatorResult>>, ApiError> {
    let Query(query) = query?;
    let interval = parse_timeframe(query.interval.as_deref(), TimeFrame::Day1)?;
    let specs = IndicatorSpec::parse_list(query.indicators.as_deref().unwrap_or(DEFAULT_INDICATORS))?;
    let limit = check_limit(query.limit, MAX_INDICATOR_POINTS)?.unwrap_or(DEFAULT_INDICATOR_POINTS);

    let symbol = state.market.ensure_known(&symbol).await?;
    let result = state
        .indicators
        .calculate(&symbol, interval, &specs, limit)
        .await?;
    Ok(Json(ApiResponse::ok(result)))
}
