//! Alpaca 报文与领域实体之间的转换。
//! 账户、持仓、订单、时钟与资产的字段命名与领域实体一致，直接反序列化；
//! 这里只放需要改名或合并取值的报文。

use chrono::{DateTime, Utc};
use kabu_core::broker::entity::{
    OrderRequest, OrderSide, OrderType, TimeInForce, TradeActivity,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Alpaca 错误响应体
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: Option<String>,
}

/// # Summary
/// `FILL` 账户活动。
///
/// # Invariants
/// - `side` 可能为 `sell_short`，归并为卖出。
#[derive(Debug, Deserialize)]
pub(crate) struct FillActivity {
    pub id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    pub qty: Decimal,
    pub price: Decimal,
    pub cum_qty: Option<Decimal>,
    pub leaves_qty: Option<Decimal>,
    pub transaction_time: DateTime<Utc>,
}

impl From<FillActivity> for TradeActivity {
    fn from(fill: FillActivity) -> Self {
        let side = if fill.side.eq_ignore_ascii_case("buy") {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        TradeActivity {
            id: fill.id,
            order_id: fill.order_id,
            symbol: fill.symbol,
            side,
            qty: fill.qty,
            price: fill.price,
            cum_qty: fill.cum_qty,
            leaves_qty: fill.leaves_qty,
            transaction_time: fill.transaction_time,
        }
    }
}

/// `POST /v2/orders` 请求体，空字段不下发
#[derive(Debug, Serialize)]
pub(crate) struct SubmitOrderBody<'a> {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notional: Option<Decimal>,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trail_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trail_percent: Option<Decimal>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub extended_hours: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<&'a str>,
}

impl<'a> From<&'a OrderRequest> for SubmitOrderBody<'a> {
    fn from(req: &'a OrderRequest) -> Self {
        Self {
            symbol: req.symbol.trim().to_uppercase(),
            qty: req.qty,
            notional: req.notional,
            side: req.side,
            order_type: req.order_type,
            time_in_force: req.time_in_force,
            limit_price: req.limit_price,
            stop_price: req.stop_price,
            trail_price: req.trail_price,
            trail_percent: req.trail_percent,
            extended_hours: req.extended_hours,
            client_order_id: req.client_order_id.as_deref(),
        }
    }
}
