use chrono::{NaiveDate, TimeZone, Utc};
use kabu_analytics::service::IndicatorService;
use kabu_api::middleware::rate_limit::GatewayLimiter;
use kabu_api::server::{AppState, build_router};
use kabu_core::broker::entity::{OrderSide, TradeActivity};
use kabu_core::broker::port::BrokerPort;
use kabu_core::common::TimeFrame;
use kabu_core::common::time::{FakeClockProvider, TimeProvider};
use kabu_core::config::AppConfig;
use kabu_core::market::entity::DataSource;
use kabu_core::market::port::MarketDataProvider;
use kabu_core::store::port::{MarketStore, SymbolStore};
use kabu_core::testing::{MockBroker, ScriptedProvider, weekday_daily_bars};
use kabu_core::tracker::entity::TrackedSymbol;
use kabu_market::service::MarketDataService;
use kabu_market::tracker::{SymbolTracker, TrackerSettings};
use kabu_store::market::SqliteMarketStore;
use kabu_store::symbol::SqliteSymbolStore;
use reqwest::StatusCode;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;

const TOKEN: &str = "test-token";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    broker: Arc<MockBroker>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self.client.get(self.url(path)).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap())
    }

    async fn get_authed(&self, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(self.url(path))
            .bearer_auth(TOKEN)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap())
    }
}

struct Options {
    with_broker: bool,
    requests_per_second: u32,
    burst: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            with_broker: true,
            requests_per_second: 1_000,
            burst: 1_000,
        }
    }
}

/// 帮助函数：在随机端口启动测试服务器
///
/// 行情库预置 AAPL 的 60 根工作日日线 (2025-10-06 起)，另有一个 Yahoo 脚本源可供回填 MSFT。
async fn spawn_test_server(options: Options) -> TestServer {
    kabu_core::tls::ensure_crypto_provider();
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let dir = tempfile::tempdir().unwrap();
    let market = Arc::new(SqliteMarketStore::open(dir.path()).await.unwrap());
    let symbols = Arc::new(SqliteSymbolStore::open(dir.path()).await.unwrap());
    let clock = Arc::new(FakeClockProvider::new(
        Utc.with_ymd_and_hms(2026, 1, 16, 22, 0, 0).unwrap(),
    ));

    let first_day = NaiveDate::from_ymd_opt(2025, 10, 6).unwrap();
    market
        .save_bars(
            "AAPL",
            TimeFrame::Day1,
            DataSource::Alpaca,
            &weekday_daily_bars(first_day, 60, 200.0),
        )
        .await
        .unwrap();
    symbols
        .upsert_symbol(&TrackedSymbol::new("AAPL".into(), clock.now()))
        .await
        .unwrap();

    let provider: Arc<dyn MarketDataProvider> = Arc::new(
        ScriptedProvider::new(DataSource::Yahoo).with_bars(
            "MSFT",
            weekday_daily_bars(NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(), 10, 400.0),
        ),
    );

    let broker = Arc::new(MockBroker::new());
    broker.list_asset("AAPL", true);
    let broker_port: Option<Arc<dyn BrokerPort>> = if options.with_broker {
        Some(broker.clone())
    } else {
        None
    };

    let mut tracker = SymbolTracker::new(
        vec![provider],
        market.clone(),
        symbols.clone(),
        clock.clone(),
        TrackerSettings::default(),
    );
    if let Some(port) = &broker_port {
        tracker = tracker.with_broker(port.clone());
    }

    let mut config = AppConfig::default();
    config.server.api_token = Some(TOKEN.to_string());
    config.server.requests_per_second = options.requests_per_second;
    config.server.burst = options.burst;

    let state = AppState {
        market: Arc::new(MarketDataService::new(
            market.clone(),
            symbols,
            clock.clone(),
        )),
        tracker: Arc::new(tracker),
        indicators: Arc::new(IndicatorService::new(market, clock)),
        broker: broker_port,
        limiter: GatewayLimiter::per_second(options.requests_per_second, options.burst),
        config: Arc::new(config),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://127.0.0.1:{}", port),
        client: reqwest::Client::new(),
        broker,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_market_data_workflow() {
    let server = spawn_test_server(Options::default()).await;

    // ============================================
    // Case 1: 存活检查与统一信封
    // ============================================
    let (status, body) = server.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["broker_configured"], true);
    assert!(body["timestamp"].is_string());

    let (status, body) = server.get("/api/market-data/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_symbols"], 1);
    assert_eq!(body["data"]["total_bars"], 60);

    // ============================================
    // Case 2: K 线查询
    // ============================================
    let (status, body) = server
        .get("/api/market-data/data/aapl?timeframe=1d&limit=5")
        .await;
    assert_eq!(status, StatusCode::OK);
    let bars = body["data"].as_array().unwrap();
    assert_eq!(bars.len(), 5);
    assert_eq!(bars[4]["close"], 259.0);

    let (status, body) = server.get("/api/market-data/data/AAPL/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["close"], 259.0);

    let (_, body) = server.get("/api/market-data/data/AAPL/count").await;
    assert_eq!(body["data"]["count"], 60);

    // 周线重采样
    let (status, body) = server
        .get("/api/market-data/data/AAPL/ohlc?interval=1w&limit=2")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["source_timeframe"], "1d");
    assert_eq!(body["data"]["bars"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["bars"][1]["volume"], 5_000.0);

    // ============================================
    // Case 3: 技术指标
    // ============================================
    let (status, body) = server
        .get("/api/market-data/data/AAPL/indicators?indicators=sma_5,rsi_14&limit=10")
        .await;
    assert_eq!(status, StatusCode::OK);
    let points = body["data"]["points"].as_array().unwrap();
    assert_eq!(points.len(), 10);
    let last = &points[9];
    assert_eq!(last["close"], 259.0);
    // 收盘价逐日 +1，5 日均值为最近 5 日的中间值
    assert_eq!(last["values"]["sma_5"], 257.0);
    assert_eq!(last["values"]["rsi_14"], 100.0);

    // ============================================
    // Case 4: 参数错误
    // ============================================
    let (status, body) = server
        .get("/api/market-data/data/AAPL?timeframe=3m")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, _) = server
        .get("/api/market-data/data/AAPL?limit=20000")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .get("/api/market-data/data/AAPL/indicators?indicators=foo_3")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server.get("/api/market-data/data/ZZZZ").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_symbol_management_workflow() {
    let server = spawn_test_server(Options::default()).await;

    // 追踪新标的
    let res = server
        .client
        .post(server.url("/api/market-data/symbols"))
        .json(&json!({"symbol": "msft", "name": "Microsoft", "exchange": "NASDAQ"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["symbol"], "MSFT");
    assert_eq!(body["data"]["status"], "active");

    // 同步回填
    let res = server
        .client
        .post(server.url("/api/market-data/symbols/MSFT/backfill"))
        .json(&json!({"start": "2026-01-05", "end": "2026-01-16T22:00:00Z", "timeframe": "1d"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["bars_stored"], 10);

    let (status, body) = server
        .get("/api/market-data/symbols/MSFT/status?source=yahoo&days=3")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let (status, body) = server.get("/api/market-data/symbols/MSFT/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["symbol"], "MSFT");

    // 再回填一份小时线：空的 timeframe 视为未指定，统计全部周期
    let res = server
        .client
        .post(server.url("/api/market-data/symbols/MSFT/backfill"))
        .json(&json!({"start": "2026-01-05", "end": "2026-01-16T22:00:00Z", "timeframe": "1h"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let (_, body) = server.get("/api/market-data/data/MSFT/count?timeframe=").await;
    assert_eq!(body["data"]["count"], 20);
    let (_, body) = server.get("/api/market-data/data/MSFT/count?timeframe=1d").await;
    assert_eq!(body["data"]["count"], 10);

    let (_, body) = server.get("/api/market-data/symbols?status=active").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    // 非法状态过滤
    let (status, _) = server.get("/api/market-data/symbols?status=zombie").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 请求体无法解析
    let res = server
        .client
        .post(server.url("/api/market-data/symbols"))
        .header("content-type", "application/json")
        .body("{\"name\": 1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // 取消追踪后仍可查询数据，但不再出现在 active 列表
    let res = server
        .client
        .delete(server.url("/api/market-data/symbols/MSFT"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let (_, body) = server.get("/api/market-data/symbols?status=active").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    let (_, body) = server.get("/api/market-data/data/MSFT/count").await;
    assert_eq!(body["data"]["count"], 20);

    // 未追踪的标的无法回填
    let res = server
        .client
        .post(server.url("/api/market-data/symbols/NVDA/backfill"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_broker_proxy_workflow() {
    let server = spawn_test_server(Options::default()).await;

    // ============================================
    // Case 1: 鉴权
    // ============================================
    let (status, body) = server.get("/api/alpaca/account").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let res = server
        .client
        .get(server.url("/api/alpaca/account"))
        .bearer_auth("wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let (status, body) = server.get_authed("/api/alpaca/account").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ACTIVE");

    // 行情接口不需要 Token
    let (status, _) = server.get("/api/market-data/stats").await;
    assert_eq!(status, StatusCode::OK);

    // ============================================
    // Case 2: 下单校验
    // ============================================
    let res = server
        .client
        .post(server.url("/api/alpaca/orders"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "symbol": "AAPL",
            "qty": "10",
            "side": "buy",
            "type": "limit",
            "time_in_force": "day"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"][0]["field"], "limit_price");

    let res = server
        .client
        .post(server.url("/api/alpaca/orders"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "symbol": "aapl",
            "qty": "10",
            "side": "buy",
            "type": "limit",
            "time_in_force": "gtc",
            "limit_price": "180.5"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let order_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["symbol"], "AAPL");

    let (_, body) = server.get_authed("/api/alpaca/orders?symbols=aapl").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = server.get_authed("/api/alpaca/orders?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // ============================================
    // Case 3: 撤单与查询
    // ============================================
    let res = server
        .client
        .delete(server.url(&format!("/api/alpaca/orders/{}", order_id)))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["canceled"], true);

    let (_, body) = server
        .get_authed(&format!("/api/alpaca/orders/{}", order_id))
        .await;
    assert_eq!(body["data"]["status"], "canceled");

    let (status, _) = server.get_authed("/api/alpaca/orders/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // ============================================
    // Case 4: 其它只读接口
    // ============================================
    let (status, body) = server.get_authed("/api/alpaca/positions").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = server.get_authed("/api/alpaca/positions/AAPL").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let res = server
        .client
        .post(server.url("/api/alpaca/positions/AAPL/close"))
        .bearer_auth(TOKEN)
        .json(&json!({"qty": "1", "percentage": "50"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = server.get_authed("/api/alpaca/assets/aapl").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tradable"], true);
    let (status, _) = server.get_authed("/api/alpaca/assets/ZZZZ").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    server.broker.add_fill(TradeActivity {
        id: "fill-1".into(),
        order_id: order_id.clone(),
        symbol: "AAPL".into(),
        side: OrderSide::Buy,
        qty: dec!(10),
        price: dec!(180.5),
        cum_qty: Some(dec!(10)),
        leaves_qty: Some(dec!(0)),
        transaction_time: Utc.with_ymd_and_hms(2026, 1, 16, 15, 30, 0).unwrap(),
    });
    let (status, body) = server.get_authed("/api/alpaca/trades?date=2026-01-16").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["price"], "180.5");
    let (_, body) = server.get_authed("/api/alpaca/trades?date=2026-01-15").await;
    assert!(body["data"].as_array().unwrap().is_empty());
    let (status, _) = server.get_authed("/api/alpaca/trades?date=16/01/2026").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server.get_authed("/api/alpaca/clock").await;
    assert_eq!(status, StatusCode::OK);

    // ============================================
    // Case 5: 策略接口尚未实现
    // ============================================
    let (status, body) = server.get("/api/strategies").await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["error"]["code"], "NOT_IMPLEMENTED");
}

#[tokio::test]
async fn test_broker_not_configured() {
    let server = spawn_test_server(Options {
        with_broker: false,
        ..Default::default()
    })
    .await;

    let (_, body) = server.get("/health").await;
    assert_eq!(body["data"]["broker_configured"], false);

    let (status, body) = server.get_authed("/api/alpaca/account").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_gateway_rate_limit() {
    let server = spawn_test_server(Options {
        requests_per_second: 1,
        burst: 2,
        ..Default::default()
    })
    .await;

    assert_eq!(server.get("/api/market-data/stats").await.0, StatusCode::OK);
    assert_eq!(server.get("/api/market-data/stats").await.0, StatusCode::OK);
    let (status, body) = server.get("/api/market-data/stats").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "RATE_LIMITED");

    // 存活检查不受限流影响
    assert_eq!(server.get("/health").await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let server = spawn_test_server(Options::default()).await;
    let (status, body) = server.get("/api-docs/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/market-data/data/{symbol}/indicators"].is_object());
    assert!(body["paths"]["/api/alpaca/orders"]["post"].is_object());
    assert!(body["components"]["securitySchemes"]["bearer_token"].is_object());
}

#[tokio::test]
async fn test_unmatched_routes_use_error_envelope() {
    let server = spawn_test_server(Options::default()).await;

    let (status, body) = server.get("/api/market-data/nowhere").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let res = server
        .client
        .put(server.url("/api/market-data/stats"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["code"], "METHOD_NOT_ALLOWED");
}
