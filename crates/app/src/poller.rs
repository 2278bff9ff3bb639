//! # 后台采集轮询
//!
//! 按固定间隔对所有 Active 标的执行增量采集与健康检查，收到关闭信号后退出。

use kabu_core::common::TimeFrame;
use kabu_core::tracker::entity::HealthVerdict;
use kabu_market::tracker::SymbolTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// # Summary
/// 轮询主循环。
///
/// # Logic
/// 1. 首个 tick 立即触发，之后每 `every` 触发一次；处理耗时超过间隔时跳过积压的 tick。
/// 2. 每轮先 `update_all` 再 `check_all`，单轮失败只记录日志。
/// 3. `shutdown` 变为 true 或发送端被丢弃时退出。
pub async fn run(
    tracker: Arc<SymbolTracker>,
    timeframe: TimeFrame,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(
        "Ingestion poller started: {} bars every {}s",
        timeframe,
        every.as_secs()
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => poll_once(&tracker, timeframe).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Ingestion poller stopped");
}

async fn poll_once(tracker: &SymbolTracker, timeframe: TimeFrame) {
    match tracker.update_all(timeframe).await {
        Ok(reports) => {
            let stored: usize = reports.iter().map(|r| r.bars_stored).sum();
            info!(
                "Polled {} symbols, {} bars stored",
                reports.len(),
                stored
            );
        }
        Err(e) => {
            error!("Batch update failed: {}", e);
            return;
        }
    }

    match tracker.check_all().await {
        Ok(reports) => {
            for report in reports
                .iter()
                .filter(|r| r.verdict != HealthVerdict::Healthy)
            {
                warn!(
                    "{} is {:?} ({} missed weekdays){}",
                    report.symbol,
                    report.verdict,
                    report.consecutive_misses,
                    report
                        .reason
                        .as_deref()
                        .map(|r| format!(": {}", r))
                        .unwrap_or_default()
                );
            }
        }
        Err(e) => error!("Health check failed: {}", e),
    }
}
