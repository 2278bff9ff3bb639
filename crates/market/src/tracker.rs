use crate::error::TrackerError;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::StreamExt;
use futures::stream;
use kabu_core::broker::port::BrokerPort;
use kabu_core::common::time::{TimeProvider, dates_between, is_weekday, start_of_day};
use kabu_core::common::{TimeFrame, normalize_symbol};
use kabu_core::config::IngestionConfig;
use kabu_core::market::entity::{Bar, DataSource};
use kabu_core::market::error::MarketError;
use kabu_core::market::port::MarketDataProvider;
use kabu_core::store::error::StoreError;
use kabu_core::store::port::{MarketStore, SymbolStore};
use kabu_core::tracker::entity::{
    HealthReport, HealthVerdict, IngestReport, SourceHealth, SourceState, SourceStatus,
    SymbolStatus, TrackedSymbol,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 日内周期每段回填的天数
const INTRADAY_CHUNK_DAYS: i64 = 7;
/// 日线及以上周期每段回填的天数
const DAILY_CHUNK_DAYS: i64 = 365;

/// 追踪器调优参数
#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    pub backfill_days: u32,
    pub delisting_threshold_days: u32,
    pub concurrency: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            backfill_days: 365,
            delisting_threshold_days: 5,
            concurrency: 4,
        }
    }
}

impl From<&IngestionConfig> for TrackerSettings {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            backfill_days: config.backfill_days,
            delisting_threshold_days: config.delisting_threshold_days,
            concurrency: config.concurrency.max(1),
        }
    }
}

/// 单次采集的结果，附带是否所有数据源都拒绝了凭证
struct Attempt {
    report: IngestReport,
    locked_out: bool,
}

/// # Summary
/// 标的追踪器：维护标的生命周期，按优先级从多个数据源采集行情，并据按日状态判定退市。
///
/// # Invariants
/// - 数据源按构造时的顺序依次尝试，第一个返回数据的数据源即满足请求。
/// - 每个被尝试过的数据源都会按日写入 `SourceStatus`，周末无数据不记录。
/// - `Delisted` 只由 `check_symbol` 写入，重新 `track` 可恢复。
pub struct SymbolTracker {
    providers: Vec<Arc<dyn MarketDataProvider>>,
    market_store: Arc<dyn MarketStore>,
    symbol_store: Arc<dyn SymbolStore>,
    // 退市确认用，未配置券商时仅按阈值判定
    broker: Option<Arc<dyn BrokerPort>>,
    clock: Arc<dyn TimeProvider>,
    settings: TrackerSettings,
}

impl SymbolTracker {
    pub fn new(
        providers: Vec<Arc<dyn MarketDataProvider>>,
        market_store: Arc<dyn MarketStore>,
        symbol_store: Arc<dyn SymbolStore>,
        clock: Arc<dyn TimeProvider>,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            providers,
            market_store,
            symbol_store,
            broker: None,
            clock,
            settings,
        }
    }

    /// 注入券商端口，用于退市确认
    pub fn with_broker(mut self, broker: Arc<dyn BrokerPort>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn settings(&self) -> TrackerSettings {
        self.settings
    }

    /// 按优先级排列的数据源
    pub fn sources(&self) -> Vec<DataSource> {
        self.providers.iter().map(|p| p.source()).collect()
    }

    /// # Summary
    /// 开始追踪一个标的。
    ///
    /// # Logic
    /// 1. 规范化代码。
    /// 2. 已存在的记录恢复为 `Active`，清空退市时间与原因；名称、交易所仅在提供时覆盖。
    /// 3. 不存在时新建 `Active` 记录。
    ///
    /// # Returns
    /// 写入后的标的记录。
    pub async fn track(
        &self,
        raw: &str,
        name: Option<String>,
        exchange: Option<String>,
    ) -> Result<TrackedSymbol, TrackerError> {
        let symbol = normalize_symbol(raw)?;
        let now = self.clock.now();

        let record = match self.symbol_store.get_symbol(&symbol).await? {
            Some(mut existing) => {
                if existing.status != SymbolStatus::Active {
                    info!(
                        "Reactivating {} (was {})",
                        symbol,
                        existing.status.as_str()
                    );
                }
                existing.status = SymbolStatus::Active;
                existing.delisted_at = None;
                existing.status_reason = None;
                existing.updated_at = now;
                if name.is_some() {
                    existing.name = name;
                }
                if exchange.is_some() {
                    existing.exchange = exchange;
                }
                existing
            }
            None => {
                info!("Tracking new symbol {}", symbol);
                let mut record = TrackedSymbol::new(symbol, now);
                record.name = name;
                record.exchange = exchange;
                record
            }
        };

        self.symbol_store.upsert_symbol(&record).await?;
        Ok(record)
    }

    /// # Summary
    /// 停止追踪标的，已入库的数据保留。
    ///
    /// # Returns
    /// 标的不存在时返回 `TrackerError::NotFound`。
    pub async fn untrack(&self, raw: &str) -> Result<TrackedSymbol, TrackerError> {
        let symbol = normalize_symbol(raw)?;
        self.symbol_store
            .set_status(
                &symbol,
                SymbolStatus::Inactive,
                Some("untracked"),
                self.clock.now(),
            )
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => TrackerError::NotFound(symbol.clone()),
                other => TrackerError::Store(other),
            })?;
        info!("Stopped tracking {}", symbol);
        self.require_tracked(&symbol).await
    }

    /// # Summary
    /// 采集单个区间的行情。
    ///
    /// # Logic
    /// 1. 校验标的已被追踪且 `start <= end`。
    /// 2. 按优先级依次请求数据源；返回数据的第一个数据源写入行情库后即结束。
    /// 3. 每个被尝试的数据源都按日记录状态：有数据为 `Success`，工作日无数据为 `NoData`，
    ///    请求失败时区间内每个工作日为 `Failed`。
    ///
    /// # Arguments
    /// * `raw`: 标的代码。
    /// * `timeframe`: K 线周期。
    /// * `start`/`end`: 闭区间。
    ///
    /// # Returns
    /// 汇总报告；全部数据源失败时 `source` 为空，错误记录在 `errors` 中。
    pub async fn ingest(
        &self,
        raw: &str,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<IngestReport, TrackerError> {
        let symbol = normalize_symbol(raw)?;
        check_range(start, end)?;
        self.require_tracked(&symbol).await?;
        Ok(self.attempt(&symbol, timeframe, start, end).await?.report)
    }

    /// # Summary
    /// 分段回填历史行情。
    ///
    /// # Logic
    /// 1. 日内周期每段 7 天，其余周期每段 365 天；分段边界对齐到 UTC 零点，避免同一天被拆开记录。
    /// 2. 逐段调用采集并合并报告。
    /// 3. 所有数据源都拒绝凭证时提前结束，后续分段不会成功。
    pub async fn backfill(
        &self,
        raw: &str,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<IngestReport, TrackerError> {
        let symbol = normalize_symbol(raw)?;
        check_range(start, end)?;
        self.require_tracked(&symbol).await?;

        let chunk_days = if timeframe.is_intraday() {
            INTRADAY_CHUNK_DAYS
        } else {
            DAILY_CHUNK_DAYS
        };

        let mut report = IngestReport::empty(&symbol, timeframe, start, end);
        let mut cursor = start;
        let mut chunks = 0usize;
        while cursor <= end {
            let next = start_of_day(cursor.date_naive() + Duration::days(chunk_days));
            let chunk_end = (next - Duration::seconds(1)).min(end);

            let attempt = self.attempt(&symbol, timeframe, cursor, chunk_end).await?;
            report.absorb(attempt.report);
            chunks += 1;
            if attempt.locked_out {
                warn!(
                    "Backfill of {} aborted: every provider rejected credentials",
                    symbol
                );
                break;
            }
            cursor = next;
        }

        info!(
            "Backfilled {} {} in {} chunks: {} bars stored",
            symbol, timeframe, chunks, report.bars_stored
        );
        Ok(report)
    }

    /// # Summary
    /// 增量更新单个标的。
    ///
    /// # Logic
    /// 1. 已有数据时从最新一根 Bar 所在日的零点起采集到当前时间，覆盖可能未收盘的 Bar。
    /// 2. 没有数据时回填最近 `backfill_days` 天。
    pub async fn update_symbol(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
    ) -> Result<IngestReport, TrackerError> {
        let now = self.clock.now();
        match self.market_store.latest_bar(symbol, timeframe).await? {
            Some(latest) => {
                let start = start_of_day(latest.time.date_naive()).min(now);
                self.ingest(symbol, timeframe, start, now).await
            }
            None => {
                let start = now - Duration::days(i64::from(self.settings.backfill_days));
                self.backfill(symbol, timeframe, start, now).await
            }
        }
    }

    /// # Summary
    /// 增量更新全部 `Active` 标的。
    ///
    /// # Logic
    /// 1. 以 `concurrency` 为上限并发执行 `update_symbol`。
    /// 2. 单个标的失败只记录日志，不中断批次。
    ///
    /// # Returns
    /// 成功完成的标的报告。
    pub async fn update_all(&self, timeframe: TimeFrame) -> Result<Vec<IngestReport>, TrackerError> {
        let symbols = self
            .symbol_store
            .list_symbols(Some(SymbolStatus::Active))
            .await?;
        let total = symbols.len();

        let results: Vec<(String, Result<IngestReport, TrackerError>)> = stream::iter(symbols)
            .map(|record| async move {
                let result = self.update_symbol(&record.symbol, timeframe).await;
                (record.symbol, result)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut reports = Vec::with_capacity(results.len());
        for (symbol, result) in results {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => error!("Update of {} failed: {}", symbol, e),
            }
        }
        info!(
            "Updated {}/{} active symbols at {}",
            reports.len(),
            total,
            timeframe
        );
        Ok(reports)
    }

    /// # Summary
    /// 根据按日状态计算标的健康度，不修改任何记录。
    ///
    /// # Logic
    /// 1. 从今天起按日期倒序遍历有记录的日期：任一数据源成功即停止；
    ///    全部失败或无数据的工作日计为一次缺数。没有记录的日期跳过。
    /// 2. 对每个数据源同样统计最近成功日期与连续缺数。
    /// 3. 结论：已退市为 `Delisted`；连续缺数达到阈值为 `Stale`；
    ///    有数据源缺数为 `Degraded`；否则为 `Healthy`。
    pub async fn health(&self, raw: &str) -> Result<HealthReport, TrackerError> {
        let symbol = normalize_symbol(raw)?;
        let record = self.require_tracked(&symbol).await?;
        let now = self.clock.now();
        let today = now.date_naive();

        let history: Vec<SourceStatus> = self
            .symbol_store
            .source_history(&symbol, None, None)
            .await?
            .into_iter()
            .filter(|s| s.date <= today)
            .collect();

        let mut by_date: BTreeMap<NaiveDate, Vec<&SourceStatus>> = BTreeMap::new();
        for status in &history {
            by_date.entry(status.date).or_default().push(status);
        }
        let consecutive_misses = count_misses(by_date.iter().rev().map(|(date, entries)| {
            (*date, entries.iter().any(|s| s.state == SourceState::Success))
        }));

        let configured = self.sources();
        let seen: BTreeSet<DataSource> = history.iter().map(|s| s.source).collect();
        let mut sources = configured.clone();
        sources.extend(seen.into_iter().filter(|s| !configured.contains(s)));

        let source_health: Vec<SourceHealth> = sources
            .into_iter()
            .map(|source| {
                let own = history.iter().filter(|s| s.source == source);
                SourceHealth {
                    source,
                    last_success: own
                        .clone()
                        .filter(|s| s.state == SourceState::Success)
                        .map(|s| s.date)
                        .max(),
                    consecutive_misses: count_misses(
                        own.map(|s| (s.date, s.state == SourceState::Success)),
                    ),
                }
            })
            .collect();

        let threshold = self.settings.delisting_threshold_days.max(1);
        let (verdict, reason) = if record.status == SymbolStatus::Delisted {
            (HealthVerdict::Delisted, record.status_reason.clone())
        } else if consecutive_misses >= threshold {
            (
                HealthVerdict::Stale,
                Some(format!(
                    "no data from any source for {} consecutive weekdays",
                    consecutive_misses
                )),
            )
        } else if let Some(lagging) = source_health.iter().find(|s| s.consecutive_misses > 0) {
            (
                HealthVerdict::Degraded,
                Some(format!(
                    "{} missing for {} consecutive weekdays",
                    lagging.source, lagging.consecutive_misses
                )),
            )
        } else {
            (HealthVerdict::Healthy, None)
        };

        Ok(HealthReport {
            symbol,
            status: record.status,
            verdict,
            sources: source_health,
            consecutive_misses,
            checked_at: now,
            reason,
        })
    }

    /// # Summary
    /// 检查健康度，必要时将标的标记为退市。
    ///
    /// # Logic
    /// 1. 只有 `Active` 且结论为 `Stale` 的标的进入退市确认。
    /// 2. 未配置券商时直接标记 `Delisted`。
    /// 3. 券商资产不存在或不可交易时标记 `Delisted`；仍可交易时保持 `Stale`。
    /// 4. 券商查询失败时保持 `Stale`，等待下次检查。
    pub async fn check_symbol(&self, raw: &str) -> Result<HealthReport, TrackerError> {
        let mut report = self.health(raw).await?;
        if report.status != SymbolStatus::Active || report.verdict != HealthVerdict::Stale {
            return Ok(report);
        }

        let reason = match &self.broker {
            None => report.reason.clone(),
            Some(broker) => match broker.get_asset(&report.symbol).await {
                Ok(Some(asset)) if asset.is_listed() => {
                    debug!("{} is stale but still tradable at broker", report.symbol);
                    report.reason = Some(format!(
                        "{} consecutive weekdays without data, broker still lists the asset",
                        report.consecutive_misses
                    ));
                    return Ok(report);
                }
                Ok(Some(asset)) => Some(format!(
                    "{} consecutive weekdays without data, broker asset status {:?} (tradable: {})",
                    report.consecutive_misses, asset.status, asset.tradable
                )),
                Ok(None) => Some(format!(
                    "{} consecutive weekdays without data, asset unknown to broker",
                    report.consecutive_misses
                )),
                Err(e) => {
                    warn!("Delisting confirmation for {} failed: {}", report.symbol, e);
                    report.reason = Some(format!("broker confirmation failed: {}", e));
                    return Ok(report);
                }
            },
        };

        self.symbol_store
            .set_status(
                &report.symbol,
                SymbolStatus::Delisted,
                reason.as_deref(),
                self.clock.now(),
            )
            .await?;
        warn!("Marked {} as delisted: {:?}", report.symbol, reason);

        report.status = SymbolStatus::Delisted;
        report.verdict = HealthVerdict::Delisted;
        report.reason = reason;
        Ok(report)
    }

    /// 对全部 `Active` 标的执行 `check_symbol`，单个失败只记录日志
    pub async fn check_all(&self) -> Result<Vec<HealthReport>, TrackerError> {
        let symbols = self
            .symbol_store
            .list_symbols(Some(SymbolStatus::Active))
            .await?;

        let mut reports = Vec::with_capacity(symbols.len());
        for record in symbols {
            match self.check_symbol(&record.symbol).await {
                Ok(report) => reports.push(report),
                Err(e) => error!("Health check of {} failed: {}", record.symbol, e),
            }
        }
        let delisted = reports
            .iter()
            .filter(|r| r.verdict == HealthVerdict::Delisted)
            .count();
        info!(
            "Checked {} symbols, {} newly delisted",
            reports.len(),
            delisted
        );
        Ok(reports)
    }

    async fn require_tracked(&self, symbol: &str) -> Result<TrackedSymbol, TrackerError> {
        self.symbol_store
            .get_symbol(symbol)
            .await?
            .ok_or_else(|| TrackerError::NotFound(symbol.to_string()))
    }

    /// 已退市的标的重新取得数据时恢复为 Active
    async fn reactivate_if_delisted(
        &self,
        symbol: &str,
        source: DataSource,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let delisted = self
            .symbol_store
            .get_symbol(symbol)
            .await?
            .is_some_and(|r| r.status == SymbolStatus::Delisted);
        if delisted {
            self.symbol_store
                .set_status(symbol, SymbolStatus::Active, None, now)
                .await?;
            info!("{} reactivated: {} returned new bars", symbol, source);
        }
        Ok(())
    }

    /// # Summary
    /// 按优先级依次尝试数据源。
    ///
    /// # Logic
    /// 1. 成功返回 Bar 时写入行情库、按日记录 `Success`/`NoData` 并结束；
    ///    已退市的标的恢复为 `Active`。
    /// 2. 成功但为空时记录 `NoData`，继续下一个数据源。
    /// 3. 失败时对该数据源尚无 `Success` 记录的工作日记录 `Failed`，继续下一个数据源。
    async fn attempt(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Attempt, TrackerError> {
        let now = self.clock.now();
        let days: Vec<NaiveDate> = dates_between(start.date_naive(), end.date_naive())
            .into_iter()
            .filter(|d| *d <= now.date_naive())
            .collect();

        let mut report = IngestReport::empty(symbol, timeframe, start, end);
        let mut unauthorized = 0usize;

        for provider in &self.providers {
            let source = provider.source();
            match provider.fetch_bars(symbol, timeframe, start, end).await {
                Ok(bars) => {
                    let statuses = day_statuses(symbol, source, &days, &bars, now);
                    if !bars.is_empty() {
                        let stored = self
                            .market_store
                            .save_bars(symbol, timeframe, source, &bars)
                            .await?;
                        if let Some(last) = bars.last() {
                            self.symbol_store.touch_data(symbol, last.time).await?;
                        }
                        self.reactivate_if_delisted(symbol, source, now).await?;
                        report.source = Some(source);
                        report.bars_fetched = bars.len();
                        report.bars_stored = stored;
                    }
                    self.symbol_store.record_source_status(&statuses).await?;
                    report.days_recorded += statuses.len();

                    if report.source.is_some() {
                        debug!(
                            "{} {} {}..{}: {} bars from {}",
                            symbol,
                            timeframe,
                            start,
                            end,
                            report.bars_stored,
                            source
                        );
                        return Ok(Attempt {
                            report,
                            locked_out: false,
                        });
                    }
                    debug!("{} returned no {} bars for {}", source, timeframe, symbol);
                }
                Err(e) => {
                    warn!("{} failed for {} {}: {}", source, symbol, timeframe, e);
                    if matches!(e, MarketError::Unauthorized(_)) {
                        unauthorized += 1;
                    }
                    // 已成功入库的日期不被一次失败覆盖
                    let succeeded: BTreeSet<NaiveDate> = self
                        .symbol_store
                        .source_history(symbol, Some(source), days.first().copied())
                        .await?
                        .into_iter()
                        .filter(|s| s.state == SourceState::Success)
                        .map(|s| s.date)
                        .collect();
                    let statuses: Vec<SourceStatus> = days
                        .iter()
                        .filter(|d| is_weekday(**d) && !succeeded.contains(*d))
                        .map(|date| SourceStatus {
                            symbol: symbol.to_string(),
                            source,
                            date: *date,
                            state: SourceState::Failed,
                            bar_count: 0,
                            message: Some(e.to_string()),
                            checked_at: now,
                        })
                        .collect();
                    self.symbol_store.record_source_status(&statuses).await?;
                    report.days_recorded += statuses.len();
                    report.errors.push(format!("{}: {}", source, e));
                }
            }
        }

        Ok(Attempt {
            report,
            locked_out: !self.providers.is_empty() && unauthorized == self.providers.len(),
        })
    }
}

fn check_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), TrackerError> {
    if start > end {
        return Err(TrackerError::InvalidRange(format!(
            "start {} is after end {}",
            start, end
        )));
    }
    Ok(())
}

/// # Summary
/// 由一次成功请求的结果生成按日状态。
///
/// # Logic
/// 1. 按 Bar 所在 UTC 日期计数。
/// 2. 有 Bar 的日期 (含周末) 记 `Success`，无 Bar 的工作日记 `NoData`，无 Bar 的周末不记录。
fn day_statuses(
    symbol: &str,
    source: DataSource,
    days: &[NaiveDate],
    bars: &[Bar],
    now: DateTime<Utc>,
) -> Vec<SourceStatus> {
    let mut counts: BTreeMap<NaiveDate, u32> = BTreeMap::new();
    for bar in bars {
        let count = counts.entry(bar.time.date_naive()).or_default();
        *count = count.saturating_add(1);
    }

    days.iter()
        .filter_map(|date| {
            let (state, bar_count) = match counts.get(date) {
                Some(n) => (SourceState::Success, *n),
                None if is_weekday(*date) => (SourceState::NoData, 0),
                None => return None,
            };
            Some(SourceStatus {
                symbol: symbol.to_string(),
                source,
                date: *date,
                state,
                bar_count,
                message: None,
                checked_at: now,
            })
        })
        .collect()
}

/// 按日期倒序计数，遇到成功即停止；只有工作日计入缺数
fn count_misses(days: impl Iterator<Item = (NaiveDate, bool)>) -> u32 {
    let mut misses = 0u32;
    for (date, success) in days {
        if success {
            break;
        }
        if is_weekday(date) {
            misses = misses.saturating_add(1);
        }
    }
    misses
}
