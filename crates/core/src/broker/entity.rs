use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// # Summary
/// 券商账户资金快照，对应 `GET /api/alpaca/account`。
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Account {
    pub id: String,
    pub account_number: String,
    pub status: String,
    pub currency: String,
    pub cash: Decimal,
    pub buying_power: Decimal,
    pub equity: Decimal,
    pub portfolio_value: Decimal,
    // 上一交易日收盘权益
    pub last_equity: Decimal,
    pub long_market_value: Decimal,
    pub short_market_value: Decimal,
    pub pattern_day_trader: bool,
    pub trading_blocked: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

/// 券商持仓
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Position {
    pub symbol: String,
    pub asset_id: Option<String>,
    pub exchange: Option<String>,
    // 持仓数量 (空头为负)
    pub qty: Decimal,
    pub side: PositionSide,
    pub avg_entry_price: Decimal,
    pub cost_basis: Decimal,
    pub market_value: Option<Decimal>,
    pub current_price: Option<Decimal>,
    pub unrealized_pl: Option<Decimal>,
    pub unrealized_plpc: Option<Decimal>,
    pub change_today: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    TrailingStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
    Opg,
    Cls,
    Ioc,
    Fok,
}

/// # Summary
/// 订单生命周期状态，与 Alpaca 的状态字符串一一对应。
///
/// # Invariants
/// - 无法识别的状态反序列化为 `Other`，不会导致整页订单解析失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PendingNew,
    Accepted,
    PartiallyFilled,
    Filled,
    DoneForDay,
    PendingCancel,
    PendingReplace,
    Canceled,
    Expired,
    Replaced,
    Stopped,
    Rejected,
    Suspended,
    Calculated,
    #[serde(other)]
    Other,
}

impl OrderStatus {
    /// 终态订单不可再撤销
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Expired
                | OrderStatus::Replaced
                | OrderStatus::Rejected
        )
    }
}

/// 券商订单
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub qty: Option<Decimal>,
    pub notional: Option<Decimal>,
    pub filled_qty: Decimal,
    pub filled_avg_price: Option<Decimal>,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub trail_price: Option<Decimal>,
    pub trail_percent: Option<Decimal>,
    pub status: OrderStatus,
    pub extended_hours: bool,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

/// 单个字段的校验失败描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

impl Violation {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// # Summary
/// 下单请求，对应 `POST /api/alpaca/orders`。
///
/// # Invariants
/// - 提交前必须通过 `validate`。
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderRequest {
    #[schema(example = "AAPL")]
    pub symbol: String,
    #[schema(value_type = Option<String>, example = "10")]
    pub qty: Option<Decimal>,
    #[schema(value_type = Option<String>)]
    pub notional: Option<Decimal>,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    #[schema(value_type = Option<String>, example = "150.25")]
    pub limit_price: Option<Decimal>,
    #[schema(value_type = Option<String>)]
    pub stop_price: Option<Decimal>,
    #[schema(value_type = Option<String>)]
    pub trail_price: Option<Decimal>,
    #[schema(value_type = Option<String>)]
    pub trail_percent: Option<Decimal>,
    #[serde(default)]
    pub extended_hours: bool,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    /// # Summary
    /// 校验下单请求的字段组合。
    ///
    /// # Logic
    /// 1. `qty` 与 `notional` 二选一且必须为正。
    /// 2. 限价类订单必须带 `limit_price`，止损类订单必须带 `stop_price`。
    /// 3. 跟踪止损必须且只能带 `trail_price` / `trail_percent` 之一。
    /// 4. 金额下单只允许市价单 + `day`。
    /// 5. 盘前盘后只允许限价单 + `day`。
    ///
    /// # Returns
    /// 全部通过返回 Ok，否则返回所有违规字段。
    pub fn validate(&self) -> Result<(), Vec<Violation>> {
        let mut violations = Vec::new();
        let positive = |v: &Option<Decimal>| v.map(|d| d > Decimal::ZERO);

        if crate::common::normalize_symbol(&self.symbol).is_err() {
            violations.push(Violation::new("symbol", "invalid symbol"));
        }

        match (self.qty, self.notional) {
            (Some(_), Some(_)) => {
                violations.push(Violation::new("qty", "qty and notional are mutually exclusive"))
            }
            (None, None) => violations.push(Violation::new("qty", "qty or notional is required")),
            _ => {}
        }
        if positive(&self.qty) == Some(false) {
            violations.push(Violation::new("qty", "must be positive"));
        }
        if positive(&self.notional) == Some(false) {
            violations.push(Violation::new("notional", "must be positive"));
        }

        let needs_limit = matches!(self.order_type, OrderType::Limit | OrderType::StopLimit);
        let needs_stop = matches!(self.order_type, OrderType::Stop | OrderType::StopLimit);
        match self.limit_price {
            None if needs_limit => violations.push(Violation::new(
                "limit_price",
                "required for limit and stop_limit orders",
            )),
            Some(_) if !needs_limit => violations.push(Violation::new(
                "limit_price",
                "only allowed for limit and stop_limit orders",
            )),
            _ => {}
        }
        if positive(&self.limit_price) == Some(false) {
            violations.push(Violation::new("limit_price", "must be positive"));
        }
        match self.stop_price {
            None if needs_stop => violations.push(Violation::new(
                "stop_price",
                "required for stop and stop_limit orders",
            )),
            Some(_) if !needs_stop => violations.push(Violation::new(
                "stop_price",
                "only allowed for stop and stop_limit orders",
            )),
            _ => {}
        }
        if positive(&self.stop_price) == Some(false) {
            violations.push(Violation::new("stop_price", "must be positive"));
        }

        let trailing = self.order_type == OrderType::TrailingStop;
        match (self.trail_price, self.trail_percent) {
            (Some(_), Some(_)) if trailing => violations.push(Violation::new(
                "trail_price",
                "trail_price and trail_percent are mutually exclusive",
            )),
            (None, None) if trailing => violations.push(Violation::new(
                "trail_price",
                "trail_price or trail_percent is required for trailing_stop orders",
            )),
            (Some(_), _) | (_, Some(_)) if !trailing => violations.push(Violation::new(
                "trail_price",
                "only allowed for trailing_stop orders",
            )),
            _ => {}
        }

        if self.notional.is_some()
            && (self.order_type != OrderType::Market || self.time_in_force != TimeInForce::Day)
        {
            violations.push(Violation::new(
                "notional",
                "notional orders must be market orders with time_in_force=day",
            ));
        }
        if self.extended_hours
            && (self.order_type != OrderType::Limit || self.time_in_force != TimeInForce::Day)
        {
            violations.push(Violation::new(
                "extended_hours",
                "extended hours orders must be limit orders with time_in_force=day",
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderListStatus {
    #[default]
    Open,
    Closed,
    All,
}

impl OrderListStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderListStatus::Open => "open",
            OrderListStatus::Closed => "closed",
            OrderListStatus::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// 订单列表查询条件
#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    pub status: OrderListStatus,
    // 1..=500
    pub limit: Option<u32>,
    pub after: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub direction: Option<SortDirection>,
    pub symbols: Vec<String>,
}

/// # Summary
/// 平仓请求，对应 `POST /api/alpaca/positions/{symbol}/close`。
///
/// # Invariants
/// - `qty` 与 `percentage` 最多提供一个；都不提供时全部平仓。
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ClosePositionRequest {
    #[schema(value_type = Option<String>)]
    pub qty: Option<Decimal>,
    #[schema(value_type = Option<String>, example = "50")]
    pub percentage: Option<Decimal>,
}

impl ClosePositionRequest {
    pub fn validate(&self) -> Result<(), Vec<Violation>> {
        let mut violations = Vec::new();
        if self.qty.is_some() && self.percentage.is_some() {
            violations.push(Violation::new(
                "qty",
                "qty and percentage are mutually exclusive",
            ));
        }
        if self.qty.is_some_and(|q| q <= Decimal::ZERO) {
            violations.push(Violation::new("qty", "must be positive"));
        }
        if self
            .percentage
            .is_some_and(|p| p <= Decimal::ZERO || p > Decimal::ONE_HUNDRED)
        {
            violations.push(Violation::new("percentage", "must be within (0, 100]"));
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

/// 成交流水 (Alpaca `FILL` 活动)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TradeActivity {
    pub id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub price: Decimal,
    pub cum_qty: Option<Decimal>,
    pub leaves_qty: Option<Decimal>,
    pub transaction_time: DateTime<Utc>,
}

/// 成交流水查询条件
#[derive(Debug, Clone, Default)]
pub struct TradeQuery {
    pub date: Option<NaiveDate>,
    pub after: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub page_size: Option<u32>,
}

/// 交易所时钟
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MarketClock {
    pub timestamp: DateTime<Utc>,
    pub is_open: bool,
    pub next_open: DateTime<Utc>,
    pub next_close: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Active,
    Inactive,
}

/// # Summary
/// 券商资产目录条目，用于确认退市。
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssetInfo {
    pub id: Option<String>,
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub class: Option<String>,
    pub status: AssetStatus,
    pub tradable: bool,
}

impl AssetInfo {
    /// 资产仍在券商处挂牌可交易
    pub fn is_listed(&self) -> bool {
        self.status == AssetStatus::Active && self.tradable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market_buy(qty: Decimal) -> OrderRequest {
        OrderRequest {
            symbol: "AAPL".into(),
            qty: Some(qty),
            notional: None,
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Day,
            limit_price: None,
            stop_price: None,
            trail_price: None,
            trail_percent: None,
            extended_hours: false,
            client_order_id: None,
        }
    }

    fn fields(res: Result<(), Vec<Violation>>) -> Vec<String> {
        res.err()
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.field)
            .collect()
    }

    #[test]
    fn test_market_order_valid() {
        assert!(market_buy(dec!(10)).validate().is_ok());
    }

    #[test]
    fn test_qty_rules() {
        assert_eq!(fields(market_buy(dec!(0)).validate()), vec!["qty"]);

        let mut both = market_buy(dec!(1));
        both.notional = Some(dec!(100));
        assert!(fields(both.validate()).contains(&"qty".to_string()));

        let mut none = market_buy(dec!(1));
        none.qty = None;
        assert_eq!(fields(none.validate()), vec!["qty"]);
    }

    #[test]
    fn test_limit_and_stop_prices() {
        let mut limit = market_buy(dec!(5));
        limit.order_type = OrderType::Limit;
        assert_eq!(fields(limit.validate()), vec!["limit_price"]);
        limit.limit_price = Some(dec!(150.25));
        assert!(limit.validate().is_ok());

        let mut stop_limit = limit.clone();
        stop_limit.order_type = OrderType::StopLimit;
        assert_eq!(fields(stop_limit.validate()), vec!["stop_price"]);

        let mut market_with_limit = market_buy(dec!(5));
        market_with_limit.limit_price = Some(dec!(1));
        assert_eq!(fields(market_with_limit.validate()), vec!["limit_price"]);
    }

    #[test]
    fn test_trailing_stop() {
        let mut trailing = market_buy(dec!(5));
        trailing.order_type = OrderType::TrailingStop;
        trailing.time_in_force = TimeInForce::Gtc;
        assert_eq!(fields(trailing.validate()), vec!["trail_price"]);
        trailing.trail_percent = Some(dec!(2.5));
        assert!(trailing.validate().is_ok());
    }

    #[test]
    fn test_notional_requires_market_day() {
        let mut notional = market_buy(dec!(1));
        notional.qty = None;
        notional.notional = Some(dec!(250));
        assert!(notional.validate().is_ok());
        notional.time_in_force = TimeInForce::Gtc;
        assert_eq!(fields(notional.validate()), vec!["notional"]);
    }

    #[test]
    fn test_close_position_request() {
        assert!(ClosePositionRequest::default().validate().is_ok());
        let pct = ClosePositionRequest {
            qty: None,
            percentage: Some(dec!(150)),
        };
        assert!(pct.validate().is_err());
        let both = ClosePositionRequest {
            qty: Some(dec!(1)),
            percentage: Some(dec!(50)),
        };
        assert!(both.validate().is_err());
    }

    #[test]
    fn test_unknown_order_status() {
        let s: OrderStatus = serde_json::from_str("\"held\"").unwrap();
        assert_eq!(s, OrderStatus::Other);
        let s: OrderStatus = serde_json::from_str("\"partially_filled\"").unwrap();
        assert_eq!(s, OrderStatus::PartiallyFilled);
        assert!(OrderStatus::Filled.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
    }
}
