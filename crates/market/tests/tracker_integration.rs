use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use kabu_core::broker::port::BrokerPort;
use kabu_core::common::TimeFrame;
use kabu_core::common::time::FakeClockProvider;
use kabu_core::market::entity::DataSource;
use kabu_core::market::port::MarketDataProvider;
use kabu_core::store::port::{MarketStore, SymbolStore};
use kabu_core::testing::{
    MemMarketStore, MemSymbolStore, MockBroker, ProviderFailure, ScriptedProvider,
    weekday_daily_bars,
};
use kabu_core::tracker::entity::{HealthVerdict, SourceState, SymbolStatus};
use kabu_market::error::TrackerError;
use kabu_market::tracker::{SymbolTracker, TrackerSettings};
use std::sync::Arc;

/// 2026-01-16 是周五
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 16, 21, 0, 0).unwrap()
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
}

fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap()
}

struct Harness {
    market: Arc<MemMarketStore>,
    symbols: Arc<MemSymbolStore>,
    clock: Arc<FakeClockProvider>,
}

impl Harness {
    fn new() -> Self {
        Self {
            market: Arc::new(MemMarketStore::new()),
            symbols: Arc::new(MemSymbolStore::new()),
            clock: Arc::new(FakeClockProvider::new(now())),
        }
    }

    fn tracker(&self, providers: &[Arc<ScriptedProvider>]) -> SymbolTracker {
        let providers: Vec<Arc<dyn MarketDataProvider>> = providers
            .iter()
            .map(|p| p.clone() as Arc<dyn MarketDataProvider>)
            .collect();
        SymbolTracker::new(
            providers,
            self.market.clone(),
            self.symbols.clone(),
            self.clock.clone(),
            TrackerSettings {
                backfill_days: 30,
                delisting_threshold_days: 5,
                concurrency: 2,
            },
        )
    }
}

/// # Summary
/// 主数据源失败时回退到次数据源，并为两者分别记录按日状态。
///
/// # Logic
/// 1. Alpaca 注入网络错误，Yahoo 提供两周日线。
/// 2. 断言数据来自 Yahoo，Alpaca 每个工作日记为 Failed，周末不记录。
#[tokio::test]
async fn test_ingest_falls_back_to_next_provider() -> anyhow::Result<()> {
    let h = Harness::new();
    let alpaca = Arc::new(ScriptedProvider::new(DataSource::Alpaca));
    alpaca.fail("AAPL", ProviderFailure::Network).await;
    let yahoo = Arc::new(
        ScriptedProvider::new(DataSource::Yahoo)
            .with_bars("AAPL", weekday_daily_bars(monday(), 10, 100.0)),
    );
    let tracker = h.tracker(&[alpaca.clone(), yahoo.clone()]);

    tracker.track("aapl", Some("Apple Inc.".into()), None).await?;
    let report = tracker.ingest("AAPL", TimeFrame::Day1, jan(5), now()).await?;

    assert_eq!(report.source, Some(DataSource::Yahoo));
    assert_eq!(report.bars_stored, 10);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.days_recorded, 20);
    assert_eq!((alpaca.calls(), yahoo.calls()), (1, 1));

    let alpaca_days = h
        .symbols
        .source_history("AAPL", Some(DataSource::Alpaca), None)
        .await?;
    assert_eq!(alpaca_days.len(), 10);
    assert!(alpaca_days.iter().all(|s| s.state == SourceState::Failed));

    let yahoo_days = h
        .symbols
        .source_history("AAPL", Some(DataSource::Yahoo), None)
        .await?;
    assert!(yahoo_days
        .iter()
        .all(|s| s.state == SourceState::Success && s.bar_count == 1));

    let record = h.symbols.get_symbol("AAPL").await?.unwrap();
    assert_eq!(record.last_data_at, Some(jan(16)));
    assert_eq!(
        h.market.count_bars("AAPL", Some(TimeFrame::Day1)).await?,
        10
    );
    Ok(())
}

#[tokio::test]
async fn test_primary_provider_satisfies_request() -> anyhow::Result<()> {
    let h = Harness::new();
    let alpaca = Arc::new(
        ScriptedProvider::new(DataSource::Alpaca)
            .with_bars("MSFT", weekday_daily_bars(monday(), 10, 300.0)),
    );
    let yahoo = Arc::new(ScriptedProvider::new(DataSource::Yahoo));
    let tracker = h.tracker(&[alpaca.clone(), yahoo.clone()]);

    tracker.track("MSFT", None, None).await?;
    let report = tracker.ingest("MSFT", TimeFrame::Day1, jan(5), now()).await?;

    assert_eq!(report.source, Some(DataSource::Alpaca));
    assert!(report.errors.is_empty());
    assert_eq!(yahoo.calls(), 0);

    let health = tracker.health("MSFT").await?;
    assert_eq!(health.verdict, HealthVerdict::Healthy);
    assert_eq!(health.consecutive_misses, 0);
    Ok(())
}

#[tokio::test]
async fn test_ingest_requires_tracked_symbol_and_valid_range() {
    let h = Harness::new();
    let tracker = h.tracker(&[Arc::new(ScriptedProvider::new(DataSource::Yahoo))]);

    let err = tracker.ingest("TSLA", TimeFrame::Day1, jan(5), now()).await;
    assert!(matches!(err, Err(TrackerError::NotFound(_))));

    tracker.track("TSLA", None, None).await.unwrap();
    let err = tracker.ingest("TSLA", TimeFrame::Day1, now(), jan(5)).await;
    assert!(matches!(err, Err(TrackerError::InvalidRange(_))));

    let err = tracker.track("BAD SYMBOL!", None, None).await;
    assert!(matches!(err, Err(TrackerError::InvalidSymbol(_))));

    let err = tracker.untrack("NOPE").await;
    assert!(matches!(err, Err(TrackerError::NotFound(_))));
}

/// # Summary
/// 日内回填按 7 天分段，且所有数据源拒绝凭证时提前结束。
#[tokio::test]
async fn test_backfill_chunks_and_stops_on_unauthorized() -> anyhow::Result<()> {
    let h = Harness::new();
    let alpaca = Arc::new(ScriptedProvider::new(DataSource::Alpaca));
    let tracker = h.tracker(&[alpaca.clone()]);
    tracker.track("NVDA", None, None).await?;

    // 1 日 .. 16 日 21:00: [1,7] [8,14] [15,16]
    let report = tracker
        .backfill("NVDA", TimeFrame::Minute15, jan(1), now())
        .await?;
    assert_eq!(alpaca.calls(), 3);
    assert_eq!(report.bars_stored, 0);
    assert!(report.source.is_none());

    alpaca.fail("NVDA", ProviderFailure::Unauthorized).await;
    let report = tracker
        .backfill("NVDA", TimeFrame::Minute15, jan(1), now())
        .await?;
    assert_eq!(alpaca.calls(), 4);
    assert_eq!(report.errors.len(), 1);

    // 日线一段即可覆盖
    alpaca.recover("NVDA").await;
    tracker
        .backfill("NVDA", TimeFrame::Day1, jan(1) - Duration::days(200), now())
        .await?;
    assert_eq!(alpaca.calls(), 5);
    Ok(())
}

/// # Summary
/// 连续缺数达到阈值且券商显示不可交易时标记退市；重新追踪可恢复。
///
/// # Logic
/// 1. 第一周有数据，第二周五个工作日均无数据。
/// 2. 券商资产存在但不可交易 -> Delisted。
/// 3. 退市后批量更新不再请求该标的。
/// 4. 重新 track 后恢复 Active 并清空退市时间。
#[tokio::test]
async fn test_delisting_confirmed_by_broker() -> anyhow::Result<()> {
    let h = Harness::new();
    let yahoo = Arc::new(
        ScriptedProvider::new(DataSource::Yahoo)
            .with_bars("ZZZ", weekday_daily_bars(monday(), 5, 2.0)),
    );
    let broker = Arc::new(MockBroker::new());
    broker.list_asset("ZZZ", false);
    let tracker = h
        .tracker(&[yahoo.clone()])
        .with_broker(broker.clone() as Arc<dyn BrokerPort>);

    tracker.track("ZZZ", None, None).await?;
    tracker.ingest("ZZZ", TimeFrame::Day1, jan(5), now()).await?;

    let health = tracker.health("ZZZ").await?;
    assert_eq!(health.verdict, HealthVerdict::Stale);
    assert_eq!(health.consecutive_misses, 5);
    assert_eq!(health.sources[0].last_success, Some(jan(9).date_naive()));
    // health 只读
    assert_eq!(
        h.symbols.get_symbol("ZZZ").await?.unwrap().status,
        SymbolStatus::Active
    );

    let report = tracker.check_symbol("ZZZ").await?;
    assert_eq!(report.verdict, HealthVerdict::Delisted);
    let record = h.symbols.get_symbol("ZZZ").await?.unwrap();
    assert_eq!(record.status, SymbolStatus::Delisted);
    assert_eq!(record.delisted_at, Some(now()));
    assert!(record.status_reason.is_some());

    let calls = yahoo.calls();
    let reports = tracker.update_all(TimeFrame::Day1).await?;
    assert!(reports.is_empty());
    assert_eq!(yahoo.calls(), calls);

    let revived = tracker.track("zzz", None, None).await?;
    assert_eq!(revived.status, SymbolStatus::Active);
    assert!(revived.delisted_at.is_none());
    Ok(())
}

#[tokio::test]
async fn test_tradable_asset_stays_stale() -> anyhow::Result<()> {
    let h = Harness::new();
    let yahoo = Arc::new(
        ScriptedProvider::new(DataSource::Yahoo)
            .with_bars("HALT", weekday_daily_bars(monday(), 5, 20.0)),
    );
    let broker = Arc::new(MockBroker::new());
    broker.list_asset("HALT", true);
    let tracker = h
        .tracker(&[yahoo])
        .with_broker(broker as Arc<dyn BrokerPort>);

    tracker.track("HALT", None, None).await?;
    tracker.ingest("HALT", TimeFrame::Day1, jan(5), now()).await?;

    let report = tracker.check_symbol("HALT").await?;
    assert_eq!(report.verdict, HealthVerdict::Stale);
    assert_eq!(report.status, SymbolStatus::Active);
    assert_eq!(
        h.symbols.get_symbol("HALT").await?.unwrap().status,
        SymbolStatus::Active
    );
    Ok(())
}

#[tokio::test]
async fn test_threshold_alone_delists_without_broker() -> anyhow::Result<()> {
    let h = Harness::new();
    let yahoo = Arc::new(ScriptedProvider::new(DataSource::Yahoo));
    let tracker = h.tracker(&[yahoo]);

    tracker.track("GONE", None, None).await?;
    tracker.ingest("GONE", TimeFrame::Day1, jan(5), now()).await?;

    let reports = tracker.check_all().await?;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].verdict, HealthVerdict::Delisted);
    assert_eq!(reports[0].consecutive_misses, 10);
    Ok(())
}

#[tokio::test]
async fn test_degraded_when_primary_keeps_failing() -> anyhow::Result<()> {
    let h = Harness::new();
    let alpaca = Arc::new(ScriptedProvider::new(DataSource::Alpaca));
    alpaca.fail("AMD", ProviderFailure::RateLimited).await;
    let yahoo = Arc::new(
        ScriptedProvider::new(DataSource::Yahoo)
            .with_bars("AMD", weekday_daily_bars(monday(), 10, 150.0)),
    );
    let tracker = h.tracker(&[alpaca, yahoo]);

    tracker.track("AMD", None, None).await?;
    tracker.ingest("AMD", TimeFrame::Day1, jan(5), now()).await?;

    let health = tracker.health("AMD").await?;
    assert_eq!(health.verdict, HealthVerdict::Degraded);
    assert_eq!(health.consecutive_misses, 0);
    let alpaca_health = &health.sources[0];
    assert_eq!(alpaca_health.source, DataSource::Alpaca);
    assert_eq!(alpaca_health.consecutive_misses, 10);
    assert!(alpaca_health.last_success.is_none());
    assert_eq!(health.sources[1].last_success, Some(jan(16).date_naive()));
    Ok(())
}

/// # Summary
/// 批量更新只处理 Active 标的：首次回填，之后从最新一根 Bar 所在日增量采集。
#[tokio::test]
async fn test_update_all_active_symbols() -> anyhow::Result<()> {
    let h = Harness::new();
    // 2025-12-22 至 2026-01-02，均在 30 天回填窗口内
    let start = monday() - Duration::days(14);
    let yahoo = Arc::new(
        ScriptedProvider::new(DataSource::Yahoo)
            .with_bars("AAPL", weekday_daily_bars(start, 10, 100.0))
            .with_bars("MSFT", weekday_daily_bars(start, 10, 300.0))
            .with_bars("IBM", weekday_daily_bars(start, 10, 150.0)),
    );
    let tracker = h.tracker(&[yahoo.clone()]);
    for symbol in ["AAPL", "MSFT", "IBM"] {
        tracker.track(symbol, None, None).await?;
    }
    tracker.untrack("IBM").await?;

    let reports = tracker.update_all(TimeFrame::Day1).await?;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.bars_stored == 10));
    assert_eq!(yahoo.calls(), 2);
    assert_eq!(h.market.count_bars("IBM", None).await?, 0);

    let reports = tracker.update_all(TimeFrame::Day1).await?;
    assert!(reports.iter().all(|r| r.bars_stored == 1));
    assert_eq!(yahoo.calls(), 4);
    assert_eq!(h.market.count_bars("AAPL", None).await?, 10);
    Ok(())
}

/// # Summary
/// 按阈值退市的标的再次采集到数据后恢复为 Active，并重新进入批量更新。
///
/// # Logic
/// 1. Yahoo 只有第二周数据；采集第一周后五个工作日均为 NoData，check_all 标记退市。
/// 2. 采集第二周拿到 Bar，标的恢复 Active，健康结论回到 Healthy。
#[tokio::test]
async fn test_successful_ingest_reactivates_delisted_symbol() -> anyhow::Result<()> {
    let h = Harness::new();
    let yahoo = Arc::new(
        ScriptedProvider::new(DataSource::Yahoo)
            .with_bars("ZZZ", weekday_daily_bars(jan(12).date_naive(), 5, 3.0)),
    );
    let tracker = h.tracker(&[yahoo]);

    tracker.track("ZZZ", None, None).await?;
    tracker
        .ingest("ZZZ", TimeFrame::Day1, jan(5), jan(10) - Duration::seconds(1))
        .await?;
    let reports = tracker.check_all().await?;
    assert_eq!(reports[0].verdict, HealthVerdict::Delisted);
    assert_eq!(
        h.symbols.get_symbol("ZZZ").await?.unwrap().status,
        SymbolStatus::Delisted
    );

    let report = tracker.ingest("ZZZ", TimeFrame::Day1, jan(12), now()).await?;
    assert_eq!(report.bars_stored, 5);

    let record = h.symbols.get_symbol("ZZZ").await?.unwrap();
    assert_eq!(record.status, SymbolStatus::Active);
    assert!(record.delisted_at.is_none());
    assert!(record.status_reason.is_none());

    let health = tracker.health("ZZZ").await?;
    assert_eq!(health.verdict, HealthVerdict::Healthy);
    assert_eq!(health.consecutive_misses, 0);
    assert_eq!(tracker.update_all(TimeFrame::Day1).await?.len(), 1);
    Ok(())
}

/// # Summary
/// 重新采集失败时，已有 Success 记录的日期保持不变，只有未成功的工作日记为 Failed。
#[tokio::test]
async fn test_failed_retry_keeps_earlier_success_days() -> anyhow::Result<()> {
    let h = Harness::new();
    let yahoo = Arc::new(
        ScriptedProvider::new(DataSource::Yahoo)
            .with_bars("AAPL", weekday_daily_bars(monday(), 5, 100.0)),
    );
    let tracker = h.tracker(&[yahoo.clone()]);

    tracker.track("AAPL", None, None).await?;
    tracker.ingest("AAPL", TimeFrame::Day1, jan(5), now()).await?;

    yahoo.fail("AAPL", ProviderFailure::RateLimited).await;
    let report = tracker.ingest("AAPL", TimeFrame::Day1, jan(5), now()).await?;
    assert_eq!(report.errors.len(), 1);
    // 第二周五个工作日此前为 NoData
    assert_eq!(report.days_recorded, 5);

    let history = h
        .symbols
        .source_history("AAPL", Some(DataSource::Yahoo), None)
        .await?;
    let first_week: Vec<_> = history.iter().filter(|s| s.date < jan(10).date_naive()).collect();
    assert_eq!(first_week.len(), 5);
    assert!(first_week.iter().all(|s| s.state == SourceState::Success));
    assert!(history
        .iter()
        .filter(|s| s.date >= jan(12).date_naive())
        .all(|s| s.state == SourceState::Failed));

    let health = tracker.health("AAPL").await?;
    assert_eq!(health.consecutive_misses, 5);
    assert_eq!(health.sources[0].last_success, Some(jan(9).date_naive()));
    Ok(())
}
