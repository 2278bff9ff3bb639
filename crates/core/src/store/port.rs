use super::error::StoreError;
use crate::common::TimeFrame;
use crate::market::entity::{Bar, BarQuery, DataSource, MarketStats, SymbolCoverage};
use crate::tracker::entity::{SourceStatus, SymbolStatus, TrackedSymbol};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// # Summary
/// 市场数据存储接口，负责 OHLCV 数据的持久化与读取。
///
/// # Invariants
/// - `(symbol, timeframe, time)` 唯一，重复写入覆盖旧值。
/// - 读取结果始终按时间升序。
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// # Summary
    /// 批量保存 K 线数据。
    ///
    /// # Logic
    /// 1. 在单个事务内逐条 upsert。
    /// 2. 记录每根 Bar 的来源。
    ///
    /// # Arguments
    /// * `symbol`: 规范化后的标的代码。
    /// * `timeframe`: K 线周期。
    /// * `source`: 数据来源。
    /// * `bars`: 待保存的数据列表。
    ///
    /// # Returns
    /// 成功返回写入条数，失败返回 `StoreError`。
    async fn save_bars(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        source: DataSource,
        bars: &[Bar],
    ) -> Result<usize, StoreError>;

    /// # Summary
    /// 按查询条件加载 K 线。
    ///
    /// # Logic
    /// 1. 按 `start`/`end` (均包含) 过滤。
    /// 2. 指定 `limit` 时取区间内最新的 `limit` 根，再按时间升序返回。
    async fn load_bars(&self, query: &BarQuery) -> Result<Vec<Bar>, StoreError>;

    /// 获取最新一根 K 线
    async fn latest_bar(&self, symbol: &str, timeframe: TimeFrame)
    -> Result<Option<Bar>, StoreError>;

    /// 统计 K 线条数，`timeframe` 为空时统计全部周期
    async fn count_bars(&self, symbol: &str, timeframe: Option<TimeFrame>)
    -> Result<u64, StoreError>;

    /// 查询数据覆盖情况，`symbol` 为空时返回全部标的
    async fn coverage(&self, symbol: Option<&str>) -> Result<Vec<SymbolCoverage>, StoreError>;

    /// # Summary
    /// 汇总行情库统计。
    ///
    /// # Returns
    /// 仅填充与 K 线相关的字段，标的计数由调用方结合 `SymbolStore` 补全。
    async fn stats(&self) -> Result<MarketStats, StoreError>;

    /// 删除某标的全部 K 线，返回删除条数
    async fn delete_bars(&self, symbol: &str) -> Result<u64, StoreError>;
}

/// # Summary
/// 标的追踪存储接口，负责标的生命周期与按源按日状态簿记的持久化。
///
/// # Invariants
/// - `(symbol, source, date)` 唯一，重复写入以最新一次为准。
#[async_trait]
pub trait SymbolStore: Send + Sync {
    /// 新增或整体更新标的记录
    async fn upsert_symbol(&self, symbol: &TrackedSymbol) -> Result<(), StoreError>;

    /// 查询单个标的
    async fn get_symbol(&self, symbol: &str) -> Result<Option<TrackedSymbol>, StoreError>;

    /// 列出标的，`status` 为空时返回全部；按代码升序
    async fn list_symbols(
        &self,
        status: Option<SymbolStatus>,
    ) -> Result<Vec<TrackedSymbol>, StoreError>;

    /// # Summary
    /// 变更标的生命周期状态。
    ///
    /// # Logic
    /// 1. 写入新状态与原因，刷新 `updated_at`。
    /// 2. 进入 `Delisted` 时写入 `delisted_at`，离开时清空。
    ///
    /// # Returns
    /// 标的不存在时返回 `StoreError::NotFound`。
    async fn set_status(
        &self,
        symbol: &str,
        status: SymbolStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// 记录最近一次成功入库的时间
    async fn touch_data(&self, symbol: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// 批量写入按源按日状态
    async fn record_source_status(&self, statuses: &[SourceStatus]) -> Result<(), StoreError>;

    /// # Summary
    /// 查询按源按日状态历史。
    ///
    /// # Arguments
    /// * `symbol`: 标的代码。
    /// * `source`: 为空时返回全部数据源。
    /// * `since`: 起始日期（包含），为空时不限。
    ///
    /// # Returns
    /// 按日期降序、数据源升序排列。
    async fn source_history(
        &self,
        symbol: &str,
        source: Option<DataSource>,
        since: Option<NaiveDate>,
    ) -> Result<Vec<SourceStatus>, StoreError>;
}
