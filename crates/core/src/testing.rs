//! # 测试替身
//!
//! 在 `test-utils` feature 下提供各端口的内存实现，供下游 crate 的集成测试复用。

use crate::broker::entity::{
    Account, AssetInfo, AssetStatus, ClosePositionRequest, MarketClock, Order, OrderQuery,
    OrderRequest, OrderStatus, Position, TradeActivity, TradeQuery,
};
use crate::broker::port::{BrokerError, BrokerPort};
use crate::common::TimeFrame;
use crate::market::entity::{Bar, BarQuery, DataSource, MarketStats, SymbolCoverage};
use crate::market::error::MarketError;
use crate::market::port::MarketDataProvider;
use crate::store::error::StoreError;
use crate::store::port::{MarketStore, SymbolStore};
use crate::tracker::entity::{SourceStatus, SymbolStatus, TrackedSymbol};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// # Summary
/// 构造一根价格关系合法的 Bar。
///
/// # Logic
/// 以 `close` 为基准，开盘价略低，最高/最低价各偏离 1%。
pub fn bar_at(time: DateTime<Utc>, close: f64, volume: f64) -> Bar {
    Bar {
        time,
        open: close * 0.995,
        high: close * 1.01,
        low: close * 0.99,
        close,
        adj_close: Some(close),
        volume,
        vwap: None,
        trade_count: None,
        is_final: true,
    }
}

/// 生成从 `start` 起每个工作日一根的日线，收盘价从 `first_close` 每日递增 1
pub fn weekday_daily_bars(start: NaiveDate, days: usize, first_close: f64) -> Vec<Bar> {
    start
        .iter_days()
        .filter(|d| crate::common::time::is_weekday(*d))
        .take(days)
        .scan(first_close, |close, date| {
            let bar = bar_at(crate::common::time::start_of_day(date), *close, 1_000.0);
            *close += 1.0;
            Some(bar)
        })
        .collect()
}

// ============================================================
//  MarketStore
// ============================================================

/// 基于内存的行情存储
#[derive(Default)]
pub struct MemMarketStore {
    db: DashMap<(String, TimeFrame), BTreeMap<DateTime<Utc>, (Bar, DataSource)>>,
}

impl MemMarketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarketStore for MemMarketStore {
    async fn save_bars(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        source: DataSource,
        bars: &[Bar],
    ) -> Result<usize, StoreError> {
        let mut series = self.db.entry((symbol.to_string(), timeframe)).or_default();
        for bar in bars {
            series.insert(bar.time, (bar.clone(), source));
        }
        Ok(bars.len())
    }

    async fn load_bars(&self, query: &BarQuery) -> Result<Vec<Bar>, StoreError> {
        let Some(series) = self.db.get(&(query.symbol.clone(), query.timeframe)) else {
            return Ok(Vec::new());
        };
        let mut bars: Vec<Bar> = series
            .values()
            .map(|(b, _)| b)
            .filter(|b| query.start.is_none_or(|s| b.time >= s))
            .filter(|b| query.end.is_none_or(|e| b.time <= e))
            .cloned()
            .collect();
        if let Some(limit) = query.limit
            && bars.len() > limit
        {
            bars.drain(..bars.len() - limit);
        }
        Ok(bars)
    }

    async fn latest_bar(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
    ) -> Result<Option<Bar>, StoreError> {
        Ok(self
            .db
            .get(&(symbol.to_string(), timeframe))
            .and_then(|s| s.values().next_back().map(|(b, _)| b.clone())))
    }

    async fn count_bars(
        &self,
        symbol: &str,
        timeframe: Option<TimeFrame>,
    ) -> Result<u64, StoreError> {
        let total: usize = self
            .db
            .iter()
            .filter(|e| e.key().0 == symbol && timeframe.is_none_or(|tf| e.key().1 == tf))
            .map(|e| e.value().len())
            .sum();
        Ok(u64::try_from(total).unwrap_or(u64::MAX))
    }

    async fn coverage(&self, symbol: Option<&str>) -> Result<Vec<SymbolCoverage>, StoreError> {
        let mut out: Vec<SymbolCoverage> = self
            .db
            .iter()
            .filter(|e| symbol.is_none_or(|s| e.key().0 == s) && !e.value().is_empty())
            .map(|e| SymbolCoverage {
                symbol: e.key().0.clone(),
                timeframe: e.key().1,
                bar_count: u64::try_from(e.value().len()).unwrap_or(u64::MAX),
                first: e.value().keys().next().copied(),
                last: e.value().keys().next_back().copied(),
            })
            .collect();
        out.sort_by(|a, b| (&a.symbol, a.timeframe).cmp(&(&b.symbol, b.timeframe)));
        Ok(out)
    }

    async fn stats(&self) -> Result<MarketStats, StoreError> {
        let mut stats = MarketStats::default();
        let mut symbols = std::collections::BTreeSet::new();
        for entry in self.db.iter() {
            for (time, (_, source)) in entry.value() {
                stats.total_bars += 1;
                *stats
                    .bars_by_timeframe
                    .entry(entry.key().1.to_string())
                    .or_default() += 1;
                *stats.bars_by_source.entry(source.to_string()).or_default() += 1;
                stats.earliest = Some(stats.earliest.map_or(*time, |e| e.min(*time)));
                stats.latest = Some(stats.latest.map_or(*time, |l| l.max(*time)));
                symbols.insert(entry.key().0.clone());
            }
        }
        stats.symbols_with_data = u64::try_from(symbols.len()).unwrap_or(u64::MAX);
        Ok(stats)
    }

    async fn delete_bars(&self, symbol: &str) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        self.db.retain(|k, v| {
            if k.0 == symbol {
                removed += u64::try_from(v.len()).unwrap_or(0);
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}

// ============================================================
//  SymbolStore
// ============================================================

/// 基于内存的标的追踪存储
#[derive(Default)]
pub struct MemSymbolStore {
    symbols: DashMap<String, TrackedSymbol>,
    statuses: DashMap<(String, DataSource, NaiveDate), SourceStatus>,
}

impl MemSymbolStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SymbolStore for MemSymbolStore {
    async fn upsert_symbol(&self, symbol: &TrackedSymbol) -> Result<(), StoreError> {
        self.symbols.insert(symbol.symbol.clone(), symbol.clone());
        Ok(())
    }

    async fn get_symbol(&self, symbol: &str) -> Result<Option<TrackedSymbol>, StoreError> {
        Ok(self.symbols.get(symbol).map(|s| s.clone()))
    }

    async fn list_symbols(
        &self,
        status: Option<SymbolStatus>,
    ) -> Result<Vec<TrackedSymbol>, StoreError> {
        let mut out: Vec<TrackedSymbol> = self
            .symbols
            .iter()
            .filter(|s| status.is_none_or(|st| s.status == st))
            .map(|s| s.clone())
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(out)
    }

    async fn set_status(
        &self,
        symbol: &str,
        status: SymbolStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut record = self
            .symbols
            .get_mut(symbol)
            .ok_or_else(|| StoreError::NotFound(symbol.to_string()))?;
        record.status = status;
        record.status_reason = reason.map(str::to_string);
        record.updated_at = at;
        record.delisted_at = (status == SymbolStatus::Delisted).then_some(at);
        Ok(())
    }

    async fn touch_data(&self, symbol: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut record) = self.symbols.get_mut(symbol) {
            record.last_data_at = Some(record.last_data_at.map_or(at, |prev| prev.max(at)));
        }
        Ok(())
    }

    async fn record_source_status(&self, statuses: &[SourceStatus]) -> Result<(), StoreError> {
        for s in statuses {
            self.statuses
                .insert((s.symbol.clone(), s.source, s.date), s.clone());
        }
        Ok(())
    }

    async fn source_history(
        &self,
        symbol: &str,
        source: Option<DataSource>,
        since: Option<NaiveDate>,
    ) -> Result<Vec<SourceStatus>, StoreError> {
        let mut out: Vec<SourceStatus> = self
            .statuses
            .iter()
            .filter(|e| e.key().0 == symbol)
            .filter(|e| source.is_none_or(|src| e.key().1 == src))
            .filter(|e| since.is_none_or(|d| e.key().2 >= d))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| b.date.cmp(&a.date).then(a.source.cmp(&b.source)));
        Ok(out)
    }
}

// ============================================================
//  MarketDataProvider
// ============================================================

/// 可注入的失败类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFailure {
    Network,
    NotFound,
    Unauthorized,
    RateLimited,
}

/// # Summary
/// 按预置数据应答的行情源，可按标的注入失败。
pub struct ScriptedProvider {
    source: DataSource,
    bars: DashMap<String, Vec<Bar>>,
    failures: RwLock<BTreeMap<String, ProviderFailure>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(source: DataSource) -> Self {
        Self {
            source,
            bars: DashMap::new(),
            failures: RwLock::new(BTreeMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_bars(self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }

    pub async fn fail(&self, symbol: &str, failure: ProviderFailure) {
        self.failures.write().await.insert(symbol.to_string(), failure);
    }

    pub async fn recover(&self, symbol: &str) {
        self.failures.write().await.remove(symbol);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    fn source(&self) -> DataSource {
        self.source
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        _timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, MarketError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.failures.read().await.get(symbol) {
            return Err(match failure {
                ProviderFailure::Network => MarketError::Network("connection reset".into()),
                ProviderFailure::NotFound => MarketError::NotFound(symbol.to_string()),
                ProviderFailure::Unauthorized => MarketError::Unauthorized("bad key".into()),
                ProviderFailure::RateLimited => MarketError::RateLimited(self.source.to_string()),
            });
        }
        Ok(self
            .bars
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.time >= start && b.time <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ============================================================
//  BrokerPort
// ============================================================

/// # Summary
/// 内存券商：订单立即以 `accepted` 状态挂起，撤单后转为 `canceled`。
pub struct MockBroker {
    account: Account,
    positions: DashMap<String, Position>,
    orders: DashMap<String, Order>,
    assets: DashMap<String, AssetInfo>,
    fills: DashMap<String, TradeActivity>,
}

impl MockBroker {
    pub fn new() -> Self {
        let cash = Decimal::new(100_000, 0);
        Self {
            account: Account {
                id: "mock-account".to_string(),
                account_number: "PA0000000".to_string(),
                status: "ACTIVE".to_string(),
                currency: "USD".to_string(),
                cash,
                buying_power: cash * Decimal::TWO,
                equity: cash,
                portfolio_value: cash,
                last_equity: cash,
                long_market_value: Decimal::ZERO,
                short_market_value: Decimal::ZERO,
                pattern_day_trader: false,
                trading_blocked: false,
                created_at: None,
            },
            positions: DashMap::new(),
            orders: DashMap::new(),
            assets: DashMap::new(),
            fills: DashMap::new(),
        }
    }

    pub fn list_asset(&self, symbol: &str, tradable: bool) {
        self.assets.insert(
            symbol.to_string(),
            AssetInfo {
                id: None,
                symbol: symbol.to_string(),
                name: None,
                exchange: Some("NASDAQ".to_string()),
                class: Some("us_equity".to_string()),
                status: if tradable {
                    AssetStatus::Active
                } else {
                    AssetStatus::Inactive
                },
                tradable,
            },
        );
    }

    pub fn add_position(&self, position: Position) {
        self.positions.insert(position.symbol.clone(), position);
    }

    pub fn add_fill(&self, fill: TradeActivity) {
        self.fills.insert(fill.id.clone(), fill);
    }

    fn new_order(&self, request: &OrderRequest) -> Order {
        Order {
            id: uuid::Uuid::new_v4().to_string(),
            client_order_id: request
                .client_order_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            symbol: request.symbol.to_uppercase(),
            qty: request.qty,
            notional: request.notional,
            filled_qty: Decimal::ZERO,
            filled_avg_price: None,
            side: request.side,
            order_type: request.order_type,
            time_in_force: request.time_in_force,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            trail_price: request.trail_price,
            trail_percent: request.trail_percent,
            status: OrderStatus::Accepted,
            extended_hours: request.extended_hours,
            created_at: Utc::now(),
            submitted_at: Some(Utc::now()),
            filled_at: None,
            canceled_at: None,
        }
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerPort for MockBroker {
    async fn get_account(&self) -> Result<Account, BrokerError> {
        Ok(self.account.clone())
    }

    async fn list_positions(&self) -> Result<Vec<Position>, BrokerError> {
        let mut out: Vec<Position> = self.positions.iter().map(|p| p.clone()).collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(out)
    }

    async fn get_position(&self, symbol: &str) -> Result<Position, BrokerError> {
        self.positions
            .get(symbol)
            .map(|p| p.clone())
            .ok_or_else(|| BrokerError::NotFound(format!("position {}", symbol)))
    }

    async fn close_position(
        &self,
        symbol: &str,
        request: &ClosePositionRequest,
    ) -> Result<Order, BrokerError> {
        let (_, position) = self
            .positions
            .remove(symbol)
            .ok_or_else(|| BrokerError::NotFound(format!("position {}", symbol)))?;
        let qty = request.qty.unwrap_or_else(|| {
            let pct = request.percentage.unwrap_or(Decimal::ONE_HUNDRED);
            position.qty.abs() * pct / Decimal::ONE_HUNDRED
        });
        let order = self.new_order(&OrderRequest {
            symbol: symbol.to_string(),
            qty: Some(qty),
            notional: None,
            side: crate::broker::entity::OrderSide::Sell,
            order_type: crate::broker::entity::OrderType::Market,
            time_in_force: crate::broker::entity::TimeInForce::Day,
            limit_price: None,
            stop_price: None,
            trail_price: None,
            trail_percent: None,
            extended_hours: false,
            client_order_id: None,
        });
        self.orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>, BrokerError> {
        use crate::broker::entity::OrderListStatus;
        let mut out: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| match query.status {
                OrderListStatus::Open => !o.status.is_terminal(),
                OrderListStatus::Closed => o.status.is_terminal(),
                OrderListStatus::All => true,
            })
            .filter(|o| query.symbols.is_empty() || query.symbols.contains(&o.symbol))
            .map(|o| o.clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            out.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(out)
    }

    async fn get_order(&self, order_id: &str) -> Result<Order, BrokerError> {
        self.orders
            .get(order_id)
            .map(|o| o.clone())
            .ok_or_else(|| BrokerError::NotFound(format!("order {}", order_id)))
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<Order, BrokerError> {
        let order = self.new_order(request);
        self.orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        let mut order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| BrokerError::NotFound(format!("order {}", order_id)))?;
        if order.status.is_terminal() {
            return Err(BrokerError::Rejected(format!(
                "order {} is already {:?}",
                order_id, order.status
            )));
        }
        order.status = OrderStatus::Canceled;
        order.canceled_at = Some(Utc::now());
        Ok(())
    }

    async fn list_trades(&self, query: &TradeQuery) -> Result<Vec<TradeActivity>, BrokerError> {
        let mut out: Vec<TradeActivity> = self
            .fills
            .iter()
            .filter(|f| query.date.is_none_or(|d| f.transaction_time.date_naive() == d))
            .map(|f| f.clone())
            .collect();
        out.sort_by(|a, b| b.transaction_time.cmp(&a.transaction_time));
        Ok(out)
    }

    async fn get_clock(&self) -> Result<MarketClock, BrokerError> {
        let now = Utc::now();
        Ok(MarketClock {
            timestamp: now,
            is_open: false,
            next_open: now + chrono::Duration::hours(12),
            next_close: now + chrono::Duration::hours(18),
        })
    }

    async fn get_asset(&self, symbol: &str) -> Result<Option<AssetInfo>, BrokerError> {
        Ok(self.assets.get(symbol).map(|a| a.clone()))
    }
}
