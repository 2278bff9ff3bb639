//! # 券商代理路由控制器
//!
//! 实现 `/api/alpaca` 路径下的账户、持仓、订单、成交、时钟与资产目录接口。
//! 所有接口只做参数校验与协议转换，实际请求经 `BrokerPort` 转发给券商。
//! 未配置券商凭证时统一返回 503。

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use chrono::NaiveDate;
use kabu_core::broker::entity::{
    Account, AssetInfo, ClosePositionRequest, MarketClock, Order, OrderListStatus, OrderQuery,
    OrderRequest, Position, SortDirection, TradeActivity, TradeQuery,
};
use kabu_core::broker::port::BrokerPort;
use kabu_core::common::normalize_symbol;
use std::sync::Arc;

use super::parse_time;
use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{ApiResponse, CancelOrderResponse, OrderListQuery, TradesQuery};

const MAX_ORDER_LIMIT: u32 = 500;
const MAX_TRADE_LIMIT: u32 = 100;

/// 取出已配置的券商端口
fn broker(state: &AppState) -> Result<Arc<dyn BrokerPort>, ApiError> {
    state.broker.clone().ok_or_else(|| {
        ApiError::ServiceUnavailable("broker credentials are not configured".into())
    })
}

fn symbol_param(raw: &str) -> Result<String, ApiError> {
    normalize_symbol(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn check_range(name: &str, value: Option<u32>, max: u32) -> Result<Option<u32>, ApiError> {
    match value {
        Some(n) if n == 0 || n > max => Err(ApiError::BadRequest(format!(
            "{} must be within 1..={}",
            name, max
        ))),
        other => Ok(other),
    }
}

/// # Summary
/// 将订单列表查询参数转换为券商查询条件。
///
/// # Logic
/// 1. `status` 为空时默认 `open`。
/// 2. `symbols` 按逗号拆分并逐个规范化，空片段忽略。
fn order_query(query: OrderListQuery) -> Result<OrderQuery, ApiError> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => OrderListStatus::default(),
        Some(s) => match s.to_ascii_lowercase().as_str() {
            "open" => OrderListStatus::Open,
            "closed" => OrderListStatus::Closed,
            "all" => OrderListStatus::All,
            other => {
                return Err(ApiError::BadRequest(format!(
                    "unknown order status '{}', expected open, closed or all",
                    other
                )));
            }
        },
    };
    let direction = match query.direction.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(s) => match s.to_ascii_lowercase().as_str() {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            other => {
                return Err(ApiError::BadRequest(format!(
                    "unknown direction '{}', expected asc or desc",
                    other
                )));
            }
        },
    };
    let symbols = query
        .symbols
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(symbol_param)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(OrderQuery {
        status,
        limit: check_range("limit", query.limit, MAX_ORDER_LIMIT)?,
        after: parse_time(query.after.as_deref())?,
        until: parse_time(query.until.as_deref())?,
        direction,
        symbols,
    })
}

/// 账户资金快照
#[utoipa::path(
    get,
    path = "/api/alpaca/account",
    tag = "券商 (Alpaca)",
    security(("bearer_token" = [])),
    responses(
        (status = 200, description = "账户信息", body = ApiResponse<Account>),
        (status = 401, description = "未认证"),
        (status = 503, description = "券商未配置")
    )
)]
pub async fn get_account(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Account>>, ApiError> {
    let account = broker(&state)?.get_account().await?;
    Ok(Json(ApiResponse::ok(account)))
}

/// 全部持仓
#[utoipa::path(
    get,
    path = "/api/alpaca/positions",
    tag = "券商 (Alpaca)",
    security(("bearer_token" = [])),
    responses(
        (status = 200, description = "持仓列表", body = ApiResponse<Vec<Position>>),
        (status = 503, description = "券商未配置")
    )
)]
pub async fn list_positions(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Position>>>, ApiError> {
    let positions = broker(&state)?.list_positions().await?;
    Ok(Json(ApiResponse::ok(positions)))
}

/// 单个持仓
#[utoipa::path(
    get,
    path = "/api/alpaca/positions/{symbol}",
    tag = "券商 (Alpaca)",
    security(("bearer_token" = [])),
    params(("symbol" = String, Path, description = "标的代码")),
    responses(
        (status = 200, description = "持仓", body = ApiResponse<Position>),
        (status = 404, description = "无持仓"),
        (status = 503, description = "券商未配置")
    )
)]
pub async fn get_position(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<Position>>, ApiError> {
    let broker = broker(&state)?;
    let position = broker.get_position(&symbol_param(&symbol)?).await?;
    Ok(Json(ApiResponse::ok(position)))
}

/// 平仓
///
/// 请求体可为空 (全部平仓)，或只带 `qty` / `percentage` 之一。
#[utoipa::path(
    post,
    path = "/api/alpaca/positions/{symbol}/close",
    tag = "券商 (Alpaca)",
    security(("bearer_token" = [])),
    params(("symbol" = String, Path, description = "标的代码")),
    request_body = ClosePositionRequest,
    responses(
        (status = 200, description = "平仓订单", body = ApiResponse<Order>),
        (status = 404, description = "无持仓"),
        (status = 422, description = "参数校验失败"),
        (status = 503, description = "券商未配置")
    )
)]
pub async fn close_position(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    body: Bytes,
) -> Result<Json<ApiResponse<Order>>, ApiError> {
    let broker = broker(&state)?;
    let symbol = symbol_param(&symbol)?;
    let req: ClosePositionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ClosePositionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::Validation {
            message: format!("invalid close request: {}", e),
            details: None,
        })?
    };
    req.validate()
        .map_err(|v| ApiError::violations("invalid close request", &v))?;

    let order = broker.close_position(&symbol, &req).await?;
    tracing::info!("Closing position {} via order {}", symbol, order.id);
    Ok(Json(ApiResponse::ok(order)))
}

/// 订单列表
#[utoipa::path(
    get,
    path = "/api/alpaca/orders",
    tag = "券商 (Alpaca)",
    security(("bearer_token" = [])),
    params(OrderListQuery),
    responses(
        (status = 200, description = "订单列表", body = ApiResponse<Vec<Order>>),
        (status = 400, description = "查询参数非法"),
        (status = 503, description = "券商未配置")
    )
)]
pub async fn list_orders(
    State(state): State<AppState>,
    query: Result<Query<OrderListQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Order>>>, ApiError> {
    let Query(query) = query?;
    let broker = broker(&state)?;
    let orders = broker.list_orders(&order_query(query)?).await?;
    Ok(Json(ApiResponse::ok(orders)))
}

/// # Summary
/// 提交订单。
///
/// # Logic
/// 1. 本地校验字段组合，违规时返回 422 及全部违规字段。
/// 2. 校验通过后转发给券商，券商拒单同样映射为 422。
#[utoipa::path(
    post,
    path = "/api/alpaca/orders",
    tag = "券商 (Alpaca)",
    security(("bearer_token" = [])),
    request_body = OrderRequest,
    responses(
        (status = 200, description = "已受理的订单", body = ApiResponse<Order>),
        (status = 422, description = "订单校验失败"),
        (status = 503, description = "券商未配置")
    )
)]
pub async fn submit_order(
    State(state): State<AppState>,
    body: Result<Json<OrderRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Order>>, ApiError> {
    let broker = broker(&state)?;
    let Json(mut req) = body?;
    req.validate()
        .map_err(|v| ApiError::violations("order validation failed", &v))?;
    req.symbol = symbol_param(&req.symbol)?;

    let order = broker.submit_order(&req).await?;
    tracing::info!(
        "Order {} accepted: {:?} {} ({:?})",
        order.id,
        req.side,
        req.symbol,
        order.status
    );
    Ok(Json(ApiResponse::ok(order)))
}

/// 单个订单
#[utoipa::path(
    get,
    path = "/api/alpaca/orders/{order_id}",
    tag = "券商 (Alpaca)",
    security(("bearer_token" = [])),
    params(("order_id" = String, Path, description = "券商订单 ID")),
    responses(
        (status = 200, description = "订单", body = ApiResponse<Order>),
        (status = 404, description = "订单不存在"),
        (status = 503, description = "券商未配置")
    )
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<ApiResponse<Order>>, ApiError> {
    let order = broker(&state)?.get_order(&order_id).await?;
    Ok(Json(ApiResponse::ok(order)))
}

/// 撤单
#[utoipa::path(
    delete,
    path = "/api/alpaca/orders/{order_id}",
    tag = "券商 (Alpaca)",
    security(("bearer_token" = [])),
    params(("order_id" = String, Path, description = "券商订单 ID")),
    responses(
        (status = 200, description = "撤单已受理", body = ApiResponse<CancelOrderResponse>),
        (status = 404, description = "订单不存在"),
        (status = 503, description = "券商未配置")
    )
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<ApiResponse<CancelOrderResponse>>, ApiError> {
    broker(&state)?.cancel_order(&order_id).await?;
    tracing::info!("Cancel requested for order {}", order_id);
    Ok(Json(ApiResponse::ok(CancelOrderResponse {
        order_id,
        canceled: true,
    })))
}

/// 成交流水
#[utoipa::path(
    get,
    path = "/api/alpaca/trades",
    tag = "券商 (Alpaca)",
    security(("bearer_token" = [])),
    params(TradesQuery),
    responses(
        (status = 200, description = "成交列表", body = ApiResponse<Vec<TradeActivity>>),
        (status = 400, description = "日期或条数非法"),
        (status = 503, description = "券商未配置")
    )
)]
pub async fn list_trades(
    State(state): State<AppState>,
    query: Result<Query<TradesQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<TradeActivity>>>, ApiError> {
    let Query(query) = query?;
    let broker = broker(&state)?;
    let date = query
        .date
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| ApiError::BadRequest(format!("date must be YYYY-MM-DD, got '{}'", s)))
        })
        .transpose()?;

    let trades = broker
        .list_trades(&TradeQuery {
            date,
            page_size: check_range("limit", query.limit, MAX_TRADE_LIMIT)?,
            ..Default::default()
        })
        .await?;
    Ok(Json(ApiResponse::ok(trades)))
}

/// 交易所时钟
#[utoipa::path(
    get,
    path = "/api/alpaca/clock",
    tag = "券商 (Alpaca)",
    security(("bearer_token" = [])),
    responses(
        (status = 200, description = "时钟", body = ApiResponse<MarketClock>),
        (status = 503, description = "券商未配置")
    )
)]
pub async fn get_clock(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<MarketClock>>, ApiError> {
    let clock = broker(&state)?.get_clock().await?;
    Ok(Json(ApiResponse::ok(clock)))
}

/// 资产目录条目
#[utoipa::path(
    get,
    path = "/api/alpaca/assets/{symbol}",
    tag = "券商 (Alpaca)",
    security(("bearer_token" = [])),
    params(("symbol" = String, Path, description = "标的代码")),
    responses(
        (status = 200, description = "资产信息", body = ApiResponse<AssetInfo>),
        (status = 404, description = "券商不认识该标的"),
        (status = 503, description = "券商未配置")
    )
)]
pub async fn get_asset(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<AssetInfo>>, ApiError> {
    let broker = broker(&state)?;
    let symbol = symbol_param(&symbol)?;
    let asset = broker
        .get_asset(&symbol)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Asset not found: {}", symbol)))?;
    Ok(Json(ApiResponse::ok(asset)))
}
