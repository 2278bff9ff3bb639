use crate::error::TrackerError;
use chrono::{DateTime, Duration, Utc};
use kabu_analytics::error::AnalyticsError;
use kabu_analytics::resample::{resample, summarize};
use kabu_analytics::service::select_source_timeframe;
use kabu_core::common::time::TimeProvider;
use kabu_core::common::{TimeFrame, normalize_symbol};
use kabu_core::market::entity::{Bar, BarQuery, DataSource, MarketStats, SymbolCoverage};
use kabu_core::store::port::{MarketStore, SymbolStore};
use kabu_core::tracker::entity::{SourceStatus, SymbolStatus, TrackedSymbol};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

/// 标的记录及其各周期的数据覆盖
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SymbolSummary {
    #[serde(flatten)]
    pub symbol: TrackedSymbol,
    pub coverage: Vec<SymbolCoverage>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BarCount {
    pub symbol: String,
    // 为空表示统计全部周期
    pub timeframe: Option<TimeFrame>,
    pub count: u64,
}

/// `GET /api/market-data/data/{symbol}/ohlc` 的返回体
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OhlcSeries {
    pub symbol: String,
    pub interval: TimeFrame,
    pub source_timeframe: TimeFrame,
    pub bars: Vec<Bar>,
    // 整个序列的单根汇总
    pub summary: Option<Bar>,
}

/// # Summary
/// 面向 API 的行情只读查询门面。
///
/// # Invariants
/// - 不触发任何外部采集。
/// - 标的既未被追踪也没有数据时统一返回 `TrackerError::NotFound`。
pub struct MarketDataService {
    market_store: Arc<dyn MarketStore>,
    symbol_store: Arc<dyn SymbolStore>,
    clock: Arc<dyn TimeProvider>,
}

impl MarketDataService {
    pub fn new(
        market_store: Arc<dyn MarketStore>,
        symbol_store: Arc<dyn SymbolStore>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            market_store,
            symbol_store,
            clock,
        }
    }

    /// 行情库统计，补全标的计数
    pub async fn stats(&self) -> Result<MarketStats, TrackerError> {
        let mut stats = self.market_store.stats().await?;
        let symbols = self.symbol_store.list_symbols(None).await?;
        stats.total_symbols = u64::try_from(symbols.len()).unwrap_or(u64::MAX);
        stats.active_symbols = u64::try_from(
            symbols
                .iter()
                .filter(|s| s.status == SymbolStatus::Active)
                .count(),
        )
        .unwrap_or(u64::MAX);
        Ok(stats)
    }

    /// # Summary
    /// 列出被追踪的标的及其数据覆盖。
    ///
    /// # Arguments
    /// * `status`: 为空时返回全部状态。
    pub async fn symbols(
        &self,
        status: Option<SymbolStatus>,
    ) -> Result<Vec<SymbolSummary>, TrackerError> {
        let records = self.symbol_store.list_symbols(status).await?;
        let mut coverage: BTreeMap<String, Vec<SymbolCoverage>> = BTreeMap::new();
        for c in self.market_store.coverage(None).await? {
            coverage.entry(c.symbol.clone()).or_default().push(c);
        }

        Ok(records
            .into_iter()
            .map(|record| SymbolSummary {
                coverage: coverage.remove(&record.symbol).unwrap_or_default(),
                symbol: record,
            })
            .collect())
    }

    /// # Summary
    /// 规范化代码并确认标的存在。
    ///
    /// # Returns
    /// 规范化后的代码；既无追踪记录也无数据时返回 `NotFound`。
    pub async fn ensure_known(&self, raw: &str) -> Result<String, TrackerError> {
        let symbol = normalize_symbol(raw)?;
        if self.symbol_store.get_symbol(&symbol).await?.is_some()
            || self.market_store.count_bars(&symbol, None).await? > 0
        {
            return Ok(symbol);
        }
        Err(TrackerError::NotFound(symbol))
    }

    /// 查询 K 线，`limit` 存在时取区间内最新的若干根
    pub async fn bars(
        &self,
        raw: &str,
        timeframe: TimeFrame,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Bar>, TrackerError> {
        let symbol = self.ensure_known(raw).await?;
        check_range(start, end)?;
        let mut query = BarQuery::new(symbol, timeframe).range(start, end);
        query.limit = limit;
        Ok(self.market_store.load_bars(&query).await?)
    }

    pub async fn latest(&self, raw: &str, timeframe: TimeFrame) -> Result<Bar, TrackerError> {
        let symbol = self.ensure_known(raw).await?;
        self.market_store
            .latest_bar(&symbol, timeframe)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("{} has no {} bars", symbol, timeframe)))
    }

    pub async fn count(
        &self,
        raw: &str,
        timeframe: Option<TimeFrame>,
    ) -> Result<BarCount, TrackerError> {
        let symbol = self.ensure_known(raw).await?;
        let count = self.market_store.count_bars(&symbol, timeframe).await?;
        Ok(BarCount {
            symbol,
            timeframe,
            count,
        })
    }

    /// # Summary
    /// 返回按请求周期重采样后的 OHLC 序列。
    ///
    /// # Logic
    /// 1. 未指定源周期时，取与请求周期相同的存储周期，否则取能整除它的最粗存储周期。
    /// 2. 指定 `limit` 时按 `(limit + 1) × 周期倍数` 加载最新的源 Bar，保证最早一个桶完整。
    /// 3. 重采样后截取最后 `limit` 根，并汇总整段序列。
    pub async fn ohlc(
        &self,
        raw: &str,
        interval: TimeFrame,
        source_timeframe: Option<TimeFrame>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<OhlcSeries, TrackerError> {
        let symbol = self.ensure_known(raw).await?;
        check_range(start, end)?;

        let source = match source_timeframe {
            Some(tf) => tf,
            None => select_source_timeframe(self.market_store.as_ref(), &symbol, interval).await?,
        };
        if !source.divides(interval) {
            return Err(AnalyticsError::UnsupportedResample {
                from: source,
                to: interval,
            }
            .into());
        }

        let mut query = BarQuery::new(symbol.clone(), source).range(start, end);
        if let Some(limit) = limit {
            let ratio = usize::try_from(interval.seconds() / source.seconds()).unwrap_or(1);
            query.limit = Some(limit.saturating_add(1).saturating_mul(ratio));
        }
        let raw_bars = self.market_store.load_bars(&query).await?;
        let mut bars = resample(&raw_bars, source, interval, self.clock.now())?;
        if let Some(limit) = limit {
            let skip = bars.len().saturating_sub(limit);
            bars.drain(..skip);
        }
        debug!(
            "OHLC {} {} from {} {} bars -> {} bars",
            symbol,
            interval,
            raw_bars.len(),
            source,
            bars.len()
        );

        Ok(OhlcSeries {
            summary: summarize(&bars),
            symbol,
            interval,
            source_timeframe: source,
            bars,
        })
    }

    /// # Summary
    /// 将区间内的 K 线汇总为单根 OHLC。
    ///
    /// # Returns
    /// 区间内没有数据时返回 `NotFound`。
    pub async fn summary(
        &self,
        raw: &str,
        timeframe: TimeFrame,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Bar, TrackerError> {
        let bars = self.bars(raw, timeframe, start, end, None).await?;
        summarize(&bars).ok_or_else(|| {
            TrackerError::NotFound(format!("no {} bars for {} in range", timeframe, raw))
        })
    }

    /// # Summary
    /// 查询按源按日采集状态。
    ///
    /// # Arguments
    /// * `source`: 为空时返回全部数据源。
    /// * `days`: 只返回最近若干天 (含今天)，为空时不限。
    pub async fn source_history(
        &self,
        raw: &str,
        source: Option<DataSource>,
        days: Option<u32>,
    ) -> Result<Vec<SourceStatus>, TrackerError> {
        let symbol = normalize_symbol(raw)?;
        if self.symbol_store.get_symbol(&symbol).await?.is_none() {
            return Err(TrackerError::NotFound(symbol));
        }
        let today = self.clock.now().date_naive();
        let since = days.map(|d| today - Duration::days(i64::from(d.saturating_sub(1))));
        Ok(self
            .symbol_store
            .source_history(&symbol, source, since)
            .await?)
    }
}

fn check_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<(), TrackerError> {
    match (start, end) {
        (Some(s), Some(e)) if s > e => Err(TrackerError::InvalidRange(format!(
            "start {} is after end {}",
            s, e
        ))),
        _ => Ok(()),
    }
}
