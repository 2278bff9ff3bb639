mod poller;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kabu_analytics::service::IndicatorService;
use kabu_api::middleware::rate_limit::GatewayLimiter;
use kabu_api::server::{AppState, start_server};
use kabu_broker::alpaca::AlpacaBroker;
use kabu_core::broker::port::BrokerPort;
use kabu_core::common::time::{RealTimeProvider, TimeProvider};
use kabu_core::config::{AppConfig, LoggingConfig};
use kabu_core::market::port::MarketDataProvider;
use kabu_feed::alpaca::AlpacaDataProvider;
use kabu_feed::limiter::RateLimiter;
use kabu_feed::yahoo::YahooProvider;
use kabu_market::service::MarketDataService;
use kabu_market::tracker::{SymbolTracker, TrackerSettings};
use kabu_store::market::SqliteMarketStore;
use kabu_store::symbol::SqliteSymbolStore;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
/// 负责实例化所有具体实现组件并通过 `Arc<dyn Trait>` 注入到追踪器与 API 网关。
///
/// # Logic
/// 1. 加载 `.env` 与分层配置，初始化全局日志。
/// 2. 实例化基础设施层（Store、行情源、券商）。
/// 3. 构造领域服务（追踪器、查询门面、指标服务）。
/// 4. 启动后台采集轮询与 HTTP 服务，Ctrl-C 后两者一起优雅退出。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 配置与日志
    let dotenv = dotenvy::dotenv();
    let config = Arc::new(settings::load()?);
    let _log_guard = init_logging(&config.logging);
    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Failed to read .env: {}", e),
    }
    info!("Kabu gateway starting...");
    kabu_core::tls::ensure_crypto_provider();

    // 2. 基础设施层
    if !kabu_store::config::set_root_dir(PathBuf::from(&config.database.data_dir)) {
        warn!("Store root directory was already set");
    }
    let market_store = Arc::new(SqliteMarketStore::new().await?);
    let symbol_store = Arc::new(SqliteSymbolStore::new().await?);
    info!("SQLite stores opened under {}", config.database.data_dir);
    let providers = build_providers(&config)?;
    let broker: Option<Arc<dyn BrokerPort>> = if config.alpaca.is_configured() {
        Some(Arc::new(AlpacaBroker::new(&config.alpaca)?))
    } else {
        warn!("Alpaca credentials not configured, /api/alpaca will answer 503");
        None
    };

    // 3. 领域服务
    let clock: Arc<dyn TimeProvider> = Arc::new(RealTimeProvider);
    let mut tracker = SymbolTracker::new(
        providers,
        market_store.clone(),
        symbol_store.clone(),
        clock.clone(),
        TrackerSettings::from(&config.ingestion),
    );
    if let Some(broker) = &broker {
        tracker = tracker.with_broker(broker.clone());
    }
    let tracker = Arc::new(tracker);

    let state = AppState {
        market: Arc::new(MarketDataService::new(
            market_store.clone(),
            symbol_store,
            clock.clone(),
        )),
        tracker: tracker.clone(),
        indicators: Arc::new(IndicatorService::new(market_store, clock)),
        broker,
        limiter: GatewayLimiter::per_second(
            config.server.requests_per_second,
            config.server.burst,
        ),
        config: config.clone(),
    };

    // 4. 后台任务与 HTTP 服务
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = config.ingestion.enabled.then(|| {
        tokio::spawn(poller::run(
            tracker,
            config.ingestion.timeframe,
            Duration::from_secs(config.ingestion.poll_interval_secs.max(1)),
            shutdown_rx.clone(),
        ))
    });

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        // 接收端可能都已退出
        if shutdown_tx.send(true).is_err() {
            info!("No running task to notify");
        }
    });

    let mut server_rx = shutdown_rx;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    start_server(state, &bind_addr, async move {
        while !*server_rx.borrow() {
            if server_rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await?;

    if let Some(handle) = poller {
        handle.await?;
    }
    info!("Kabu gateway stopped");
    Ok(())
}

/// # Summary
/// 初始化控制台与按日滚动的文件日志。
///
/// # Returns
/// 文件日志的后台写线程守卫，需持有到进程退出。
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let console = tracing_subscriber::fmt::layer();

    match config.dir.as_deref().filter(|d| !d.is_empty()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "kabu.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            None
        }
    }
}

/// # Summary
/// 按配置的优先级实例化行情源，所有行情源共享同一个限流器。
///
/// # Logic
/// 1. `alpaca` 需要凭证，未配置时跳过。
/// 2. `yahoo` 可通过 `yahoo.enabled` 关闭。
/// 3. 未知名称只记录警告。
fn build_providers(
    config: &AppConfig,
) -> Result<Vec<Arc<dyn MarketDataProvider>>, Box<dyn std::error::Error>> {
    let limiter = RateLimiter::per_minute(
        config.ingestion.requests_per_minute,
        config.ingestion.burst,
    );
    let mut providers: Vec<Arc<dyn MarketDataProvider>> = Vec::new();

    for name in &config.ingestion.providers {
        match name.trim().to_ascii_lowercase().as_str() {
            "alpaca" if config.alpaca.is_configured() => {
                providers.push(Arc::new(AlpacaDataProvider::new(
                    &config.alpaca,
                    limiter.clone(),
                )?));
            }
            "alpaca" => warn!("Skipping alpaca market data: credentials not configured"),
            "yahoo" if config.yahoo.enabled => {
                providers.push(Arc::new(YahooProvider::new(
                    &config.yahoo.base_url,
                    limiter.clone(),
                )?));
            }
            "yahoo" => info!("Yahoo market data disabled"),
            other => warn!("Unknown market data provider '{}' ignored", other),
        }
    }

    if providers.is_empty() {
        warn!("No market data provider available, ingestion will record failures only");
    }
    info!(
        "Market data providers in priority order: {:?}",
        providers.iter().map(|p| p.source()).collect::<Vec<_>>()
    );
    Ok(providers)
}
