use chrono::{Duration, TimeZone, Utc};
use kabu_core::common::TimeFrame;
use kabu_core::config::AppConfig;
use kabu_core::market::entity::DataSource;
use kabu_core::market::error::MarketError;
use kabu_core::market::port::MarketDataProvider;
use kabu_core::tls::ensure_crypto_provider;
use kabu_feed::alpaca::AlpacaDataProvider;
use kabu_feed::limiter::RateLimiter;
use kabu_feed::yahoo::YahooProvider;
use mockito::Matcher;

fn yahoo(url: &str) -> YahooProvider {
    ensure_crypto_provider();
    YahooProvider::new(url, RateLimiter::unlimited()).unwrap()
}

fn alpaca(url: &str) -> AlpacaDataProvider {
    ensure_crypto_provider();
    let mut config = AppConfig::default().alpaca;
    config.api_key = Some("key-id".to_string());
    config.secret_key = Some("secret".to_string());
    config.data_url = url.to_string();
    AlpacaDataProvider::new(&config, RateLimiter::unlimited()).unwrap()
}

/// # Summary
/// Yahoo chart 接口解析。
///
/// # Logic
/// 1. 模拟两根日线，其中一行收盘价为 null。
/// 2. 断言仅返回完整行，且来源标识为 yahoo。
#[tokio::test]
async fn test_yahoo_fetch_daily() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v8/finance/chart/AAPL")
        .match_query(Matcher::UrlEncoded("interval".into(), "1d".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"chart":{"result":[{
                "timestamp":[1767623400,1767709800],
                "indicators":{"quote":[{
                    "open":[10.0,11.0],"high":[11.0,12.0],"low":[9.5,10.5],
                    "close":[10.5,null],"volume":[1000,2000]
                }],"adjclose":[{"adjclose":[10.4,null]}]}
            }],"error":null}}"#,
        )
        .create_async()
        .await;

    let provider = yahoo(&server.url());
    assert_eq!(provider.source(), DataSource::Yahoo);

    let start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
    let bars = provider
        .fetch_bars("AAPL", TimeFrame::Day1, start, start + Duration::days(3))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(bars.len(), 1);
    assert_eq!(bars[0].time, start);
    assert_eq!(bars[0].close, 10.5);
}

#[tokio::test]
async fn test_yahoo_error_mapping() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v8/finance/chart/GONE")
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body(r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v8/finance/chart/BUSY")
        .match_query(Matcher::Any)
        .with_status(429)
        .create_async()
        .await;

    let provider = yahoo(&server.url());
    let end = Utc::now();
    let start = end - Duration::days(5);

    let gone = provider.fetch_bars("GONE", TimeFrame::Day1, start, end).await;
    assert!(matches!(gone, Err(MarketError::NotFound(s)) if s == "GONE"));

    let busy = provider.fetch_bars("BUSY", TimeFrame::Day1, start, end).await;
    assert!(matches!(busy, Err(MarketError::RateLimited(_))));
}

/// # Summary
/// Alpaca bars 翻页。
///
/// # Logic
/// 1. 第一页返回 `next_page_token`，第二页携带 `page_token` 请求。
/// 2. 断言两页数据合并，且凭证头随请求发送。
#[tokio::test]
async fn test_alpaca_follows_pagination() {
    let mut server = mockito::Server::new_async().await;
    // 带 page_token 的请求同样满足第一页的匹配条件，先注册第二页使其优先命中
    let second = server
        .mock("GET", "/v2/stocks/MSFT/bars")
        .match_query(Matcher::UrlEncoded("page_token".into(), "page-2".into()))
        .with_status(200)
        .with_body(
            r#"{"bars":[{"t":"2026-01-06T05:00:00Z","o":402,"h":410,"l":401,"c":409,"v":12000,"n":150,"vw":405.0}],
                "symbol":"MSFT","next_page_token":null}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let first = server
        .mock("GET", "/v2/stocks/MSFT/bars")
        .match_header("APCA-API-KEY-ID", "key-id")
        .match_header("APCA-API-SECRET-KEY", "secret")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("timeframe".into(), "1Day".into()),
            Matcher::UrlEncoded("feed".into(), "iex".into()),
            Matcher::UrlEncoded("adjustment".into(), "raw".into()),
        ]))
        .with_status(200)
        .with_body(
            r#"{"bars":[{"t":"2026-01-05T05:00:00Z","o":400,"h":405,"l":398,"c":402,"v":10000,"n":120,"vw":401.5}],
                "symbol":"MSFT","next_page_token":"page-2"}"#,
        )
        .expect(1)
        .create_async()
        .await;
    let provider = alpaca(&server.url());
    let start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
    let bars = provider
        .fetch_bars("MSFT", TimeFrame::Day1, start, start + Duration::days(2))
        .await
        .unwrap();

    first.assert_async().await;
    second.assert_async().await;
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[1].time, start + Duration::days(1));
    assert_eq!(bars[1].trade_count, Some(150));
}

#[tokio::test]
async fn test_alpaca_empty_and_errors() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v2/stocks/QUIET/bars")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"bars":null,"symbol":"QUIET","next_page_token":null}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/stocks/DENY/bars")
        .match_query(Matcher::Any)
        .with_status(403)
        .with_body(r#"{"message":"forbidden"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/stocks/XXXX/bars")
        .match_query(Matcher::Any)
        .with_status(422)
        .with_body(r#"{"message":"invalid symbol"}"#)
        .create_async()
        .await;

    let provider = alpaca(&server.url());
    let end = Utc::now();
    let start = end - Duration::days(3);

    let quiet = provider
        .fetch_bars("QUIET", TimeFrame::Hour1, start, end)
        .await
        .unwrap();
    assert!(quiet.is_empty());

    let deny = provider.fetch_bars("DENY", TimeFrame::Day1, start, end).await;
    assert!(matches!(deny, Err(MarketError::Unauthorized(_))));

    let unknown = provider.fetch_bars("XXXX", TimeFrame::Day1, start, end).await;
    assert!(matches!(unknown, Err(MarketError::NotFound(_))));
}
