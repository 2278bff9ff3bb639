use crate::error::AnalyticsError;
use chrono::{DateTime, Utc};
use kabu_core::common::TimeFrame;
use kabu_core::market::entity::Bar;

/// # Summary
/// 将细周期 K 线聚合为粗周期 K 线。
///
/// # Logic
/// 1. 校验 `from` 能整除 `to`，否则返回 `UnsupportedResample`。
/// 2. 输入未按时间升序时先排序。
/// 3. 按 `to.bucket_start` 分桶，连续同桶的 Bar 合并为一根。
/// 4. 桶内全部 Bar 为最终态且桶已结束 (`start + to <= now`) 时，结果才标记为最终态。
///
/// # Arguments
/// * `bars`: 源 K 线。
/// * `from`: 源周期。
/// * `to`: 目标周期。
/// * `now`: 当前时间，用于判定最后一个桶是否走完。
///
/// # Returns
/// 按时间升序的聚合结果。
pub fn resample(
    bars: &[Bar],
    from: TimeFrame,
    to: TimeFrame,
    now: DateTime<Utc>,
) -> Result<Vec<Bar>, AnalyticsError> {
    if !from.divides(to) {
        return Err(AnalyticsError::UnsupportedResample { from, to });
    }

    let mut sorted: Vec<&Bar> = bars.iter().collect();
    if !sorted.windows(2).all(|w| w[0].time <= w[1].time) {
        sorted.sort_by_key(|b| b.time);
    }
    if from == to {
        return Ok(sorted.into_iter().cloned().collect());
    }

    let mut out = Vec::new();
    let mut start = 0;
    while start < sorted.len() {
        let bucket = to.bucket_start(sorted[start].time);
        let len = sorted[start..]
            .iter()
            .take_while(|b| to.bucket_start(b.time) == bucket)
            .count();
        if let Some(mut merged) = merge(&sorted[start..start + len]) {
            merged.time = bucket;
            merged.is_final = merged.is_final && bucket + to.duration() <= now;
            out.push(merged);
        }
        start += len;
    }
    Ok(out)
}

/// # Summary
/// 将一段区间内的 K 线汇总为单根 OHLC。
///
/// # Returns
/// 输入为空时返回 None；结果时间取第一根 Bar 的时间。
pub fn summarize(bars: &[Bar]) -> Option<Bar> {
    let mut sorted: Vec<&Bar> = bars.iter().collect();
    sorted.sort_by_key(|b| b.time);
    merge(&sorted)
}

/// 合并一组已按时间升序排列的 Bar
fn merge(bars: &[&Bar]) -> Option<Bar> {
    let first = bars.first()?;
    let last = bars.last()?;

    let volume: f64 = bars.iter().map(|b| b.volume).sum();
    let vwap = if bars.iter().all(|b| b.vwap.is_some()) && volume > 0.0 {
        let notional: f64 = bars
            .iter()
            .map(|b| b.vwap.unwrap_or_default() * b.volume)
            .sum();
        Some(notional / volume)
    } else {
        None
    };
    let trade_count = bars
        .iter()
        .filter_map(|b| b.trade_count)
        .reduce(|a, b| a.saturating_add(b));

    Some(Bar {
        time: first.time,
        open: first.open,
        high: bars.iter().map(|b| b.high).fold(f64::MIN, f64::max),
        low: bars.iter().map(|b| b.low).fold(f64::MAX, f64::min),
        close: last.close,
        adj_close: bars.iter().rev().find_map(|b| b.adj_close),
        volume,
        vwap,
        trade_count,
        is_final: bars.iter().all(|b| b.is_final),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use kabu_core::testing::bar_at;

    fn minutes(start: DateTime<Utc>, closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .zip(0i64..)
            .map(|(c, i)| bar_at(start + Duration::minutes(i), *c, 10.0))
            .collect()
    }

    #[test]
    fn test_minutes_to_five_minutes() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 5, 14, 30, 0).unwrap();
        let bars = minutes(t0, &[10.0, 12.0, 9.0, 11.0, 10.5, 10.8, 10.9]);
        let now = t0 + Duration::hours(1);

        let out = resample(&bars, TimeFrame::Minute1, TimeFrame::Minute5, now).unwrap();
        assert_eq!(out.len(), 2);

        let first = &out[0];
        assert_eq!(first.time, t0);
        assert_eq!(first.open, bars[0].open);
        assert_eq!(first.close, 10.5);
        assert_eq!(first.high, 12.0 * 1.01);
        assert_eq!(first.low, 9.0 * 0.99);
        assert_eq!(first.volume, 50.0);
        assert!(first.is_final);

        assert_eq!(out[1].time, t0 + Duration::minutes(5));
        assert_eq!(out[1].volume, 20.0);

        // 总成交量守恒
        let total: f64 = out.iter().map(|b| b.volume).sum();
        assert_eq!(total, 70.0);
    }

    #[test]
    fn test_open_bucket_is_not_final() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 5, 14, 30, 0).unwrap();
        let bars = minutes(t0, &[10.0, 10.1, 10.2]);
        let out = resample(&bars, TimeFrame::Minute1, TimeFrame::Minute5, t0 + Duration::minutes(3))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_final);
    }

    #[test]
    fn test_days_to_week_aligns_to_monday() {
        // 2026-01-07 是周三
        let wed = Utc.with_ymd_and_hms(2026, 1, 7, 0, 0, 0).unwrap();
        let bars: Vec<Bar> = (0..5i64)
            .map(|i| bar_at(wed + Duration::days(i), 100.0, 1.0))
            .collect();
        let out = resample(&bars, TimeFrame::Day1, TimeFrame::Week1, Utc::now()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].time, Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap());
        assert_eq!(out[1].time, Utc.with_ymd_and_hms(2026, 1, 12, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_unsorted_input_and_vwap() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 5, 15, 0, 0).unwrap();
        let mut a = bar_at(t0, 10.0, 100.0);
        a.vwap = Some(10.0);
        a.trade_count = Some(3);
        let mut b = bar_at(t0 + Duration::minutes(15), 20.0, 300.0);
        b.vwap = Some(20.0);
        b.trade_count = Some(7);

        let out = resample(&[b, a], TimeFrame::Minute15, TimeFrame::Hour1, Utc::now()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].close, 20.0);
        assert_eq!(out[0].vwap, Some(17.5));
        assert_eq!(out[0].trade_count, Some(10));
    }

    #[test]
    fn test_rejects_finer_or_non_divisible_target() {
        let err = resample(&[], TimeFrame::Hour1, TimeFrame::Minute5, Utc::now());
        assert!(matches!(err, Err(AnalyticsError::UnsupportedResample { .. })));
        let err = resample(&[], TimeFrame::Day1, TimeFrame::Hour1, Utc::now());
        assert!(err.is_err());
    }

    #[test]
    fn test_summarize_range() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let bars: Vec<Bar> = [5.0, 8.0, 6.0]
            .iter()
            .zip(0i64..)
            .map(|(c, i)| bar_at(t0 + Duration::days(i), *c, 2.0))
            .collect();
        let s = summarize(&bars).unwrap();
        assert_eq!(s.time, t0);
        assert_eq!(s.close, 6.0);
        assert_eq!(s.high, 8.0 * 1.01);
        assert_eq!(s.volume, 6.0);
        assert!(summarize(&[]).is_none());
    }
}
