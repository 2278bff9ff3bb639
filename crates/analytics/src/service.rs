use crate::error::AnalyticsError;
use crate::indicators::IndicatorSpec;
use crate::resample::resample;
use chrono::{DateTime, Utc};
use kabu_core::common::TimeFrame;
use kabu_core::common::time::TimeProvider;
use kabu_core::market::entity::BarQuery;
use kabu_core::store::port::MarketStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

/// 单个时间点上的全部指标值
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IndicatorPoint {
    pub time: DateTime<Utc>,
    pub close: f64,
    /// 列名 -> 值，预热期内为 null
    pub values: BTreeMap<String, Option<f64>>,
}

/// `GET /api/market-data/data/{symbol}/indicators` 的返回体
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IndicatorResult {
    pub symbol: String,
    pub interval: TimeFrame,
    /// 实际读取的存储周期
    pub source_timeframe: TimeFrame,
    pub indicators: Vec<String>,
    pub points: Vec<IndicatorPoint>,
}

/// # Summary
/// 选取满足请求周期的存储周期。
///
/// # Logic
/// 1. 存在与请求周期相同的数据时直接使用。
/// 2. 否则在能整除请求周期的更细周期中选最粗的一个。
///
/// # Returns
/// 没有可用数据时返回 `AnalyticsError::NoData`。
pub async fn select_source_timeframe(
    store: &dyn MarketStore,
    symbol: &str,
    interval: TimeFrame,
) -> Result<TimeFrame, AnalyticsError> {
    let stored: Vec<TimeFrame> = store
        .coverage(Some(symbol))
        .await?
        .into_iter()
        .filter(|c| c.bar_count > 0)
        .map(|c| c.timeframe)
        .collect();

    if stored.contains(&interval) {
        return Ok(interval);
    }
    stored
        .into_iter()
        .filter(|tf| *tf < interval && tf.divides(interval))
        .max()
        .ok_or_else(|| AnalyticsError::NoData(format!("{} at {}", symbol, interval)))
}

/// # Summary
/// 按请求周期计算指标的服务。
///
/// # Invariants
/// - 只读访问行情存储。
pub struct IndicatorService {
    store: Arc<dyn MarketStore>,
    clock: Arc<dyn TimeProvider>,
}

impl IndicatorService {
    pub fn new(store: Arc<dyn MarketStore>, clock: Arc<dyn TimeProvider>) -> Self {
        Self { store, clock }
    }

    /// # Summary
    /// 计算指标并返回最近 `limit` 个点。
    ///
    /// # Logic
    /// 1. 选取存储周期，按 `(最大预热 + limit + 1) × 周期倍数` 加载最新的源 Bar。
    ///    交易时段不足时一个桶内的源 Bar 更少，按条数加载仍能覆盖所需的桶数。
    /// 2. 重采样到请求周期。
    /// 3. 逐个指标计算序列，截取最后 `limit` 个点。
    pub async fn calculate(
        &self,
        symbol: &str,
        interval: TimeFrame,
        specs: &[IndicatorSpec],
        limit: usize,
    ) -> Result<IndicatorResult, AnalyticsError> {
        let source = select_source_timeframe(self.store.as_ref(), symbol, interval).await?;
        let ratio = usize::try_from(interval.seconds() / source.seconds()).unwrap_or(1);
        let warmup = specs.iter().map(IndicatorSpec::warmup).max().unwrap_or(0);
        let needed = (warmup + limit + 1).saturating_mul(ratio);

        let raw = self
            .store
            .load_bars(&BarQuery::new(symbol, source).limit(needed))
            .await?;
        let bars = resample(&raw, source, interval, self.clock.now())?;
        debug!(
            "Computing {} indicators for {} on {} {} bars (from {} {} bars)",
            specs.len(),
            symbol,
            bars.len(),
            interval,
            raw.len(),
            source
        );

        let columns: Vec<(String, Vec<Option<f64>>)> =
            specs.iter().flat_map(|s| s.compute(&bars)).collect();

        let skip = bars.len().saturating_sub(limit);
        let points = bars
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, bar)| IndicatorPoint {
                time: bar.time,
                close: bar.close,
                values: columns
                    .iter()
                    .map(|(name, series)| (name.clone(), series.get(i).copied().flatten()))
                    .collect(),
            })
            .collect();

        Ok(IndicatorResult {
            symbol: symbol.to_string(),
            interval,
            source_timeframe: source,
            indicators: specs.iter().map(IndicatorSpec::name).collect(),
            points,
        })
    }
}
