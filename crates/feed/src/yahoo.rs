use crate::limiter::RateLimiter;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use kabu_core::common::TimeFrame;
use kabu_core::market::entity::{Bar, DataSource};
use kabu_core::market::error::MarketError;
use kabu_core::market::port::MarketDataProvider;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// # Summary
/// Yahoo Finance 行情提供者实现。
///
/// # Invariants
/// - 使用 `reqwest` 异步客户端进行通讯。
/// - 每次请求前等待共享限流器。
#[derive(Clone)]
pub struct YahooProvider {
    /// 内部使用的 HTTP 客户端
    client: Client,
    base_url: String,
    limiter: RateLimiter,
}

impl YahooProvider {
    /// # Summary
    /// 创建一个新的 YahooProvider 实例。
    ///
    /// # Logic
    /// 1. 配置 10 秒超时。
    /// 2. 设置伪装浏览器 Header (User-Agent) 以减少被拦截风险。
    /// 3. 初始化 reqwest 客户端。
    ///
    /// # Arguments
    /// * `base_url`: API 根地址，生产环境为 `https://query1.finance.yahoo.com`。
    /// * `limiter`: 共享限流器。
    ///
    /// # Returns
    /// 返回初始化后的 YahooProvider，客户端构建失败时返回 `MarketError::Network`。
    pub fn new(base_url: &str, limiter: RateLimiter) -> Result<Self, MarketError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()
            .map_err(|e| MarketError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
        })
    }

    fn interval(timeframe: TimeFrame) -> &'static str {
        match timeframe {
            TimeFrame::Minute1 => "1m",
            TimeFrame::Minute5 => "5m",
            TimeFrame::Minute15 => "15m",
            TimeFrame::Hour1 => "60m",
            TimeFrame::Day1 => "1d",
            TimeFrame::Week1 => "1wk",
        }
    }
}

/// # Summary
/// Yahoo API 响应顶层结构。
///
/// # Invariants
/// - 映射自 Yahoo v8 chart 接口。
#[derive(Deserialize, Debug)]
struct YahooResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Debug)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooError>,
}

#[derive(Deserialize, Debug)]
struct YahooError {
    code: Option<String>,
    description: Option<String>,
}

/// 单个时间序列结果，区间内无数据时 Yahoo 会省略 `timestamp`
#[derive(Deserialize, Debug)]
struct YahooResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Debug)]
struct YahooIndicators {
    #[serde(default)]
    quote: Vec<YahooQuote>,
    // 调整后的价格数据
    adjclose: Option<Vec<YahooAdjClose>>,
}

#[derive(Deserialize, Debug)]
struct YahooAdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Yahoo API 原始报价数据，各列与 `timestamp` 等长，缺失值为 null
#[derive(Deserialize, Debug, Default)]
struct YahooQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

fn column(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

/// # Summary
/// 将 chart 结果转换为 Bar 列表。
///
/// # Logic
/// 1. 跳过任一 OHLCV 为 null 的行。
/// 2. 时间对齐到周期起点 (日线为 UTC 零点，周线为周一)。
/// 3. 周期尚未走完的 Bar 标记为非最终态。
/// 4. 丢弃价格关系非法的行，并按时间去重保持升序。
fn parse_result(result: YahooResult, timeframe: TimeFrame, now: DateTime<Utc>) -> Vec<Bar> {
    let empty = YahooQuote::default();
    let quote = result.indicators.quote.first().unwrap_or(&empty);
    let adj_close = result
        .indicators
        .adjclose
        .as_ref()
        .and_then(|v| v.first())
        .map(|v| v.adjclose.as_slice())
        .unwrap_or(&[]);

    let mut bars: Vec<Bar> = Vec::with_capacity(result.timestamp.len());
    for (i, &ts) in result.timestamp.iter().enumerate() {
        let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
            column(&quote.open, i),
            column(&quote.high, i),
            column(&quote.low, i),
            column(&quote.close, i),
            column(&quote.volume, i),
        ) else {
            continue;
        };
        let Some(raw_time) = Utc.timestamp_opt(ts, 0).single() else {
            continue;
        };
        let time = timeframe.bucket_start(raw_time);

        let bar = Bar {
            time,
            open,
            high,
            low,
            close,
            adj_close: column(adj_close, i),
            volume,
            vwap: None,
            trade_count: None,
            is_final: time + timeframe.duration() <= now,
        };
        if !bar.is_consistent() {
            warn!("Dropping inconsistent Yahoo bar at {}", time);
            continue;
        }
        // Yahoo 偶尔在末尾追加当日实时行，时间与上一行落在同一周期
        match bars.last_mut() {
            Some(last) if last.time == bar.time => *last = bar,
            _ => bars.push(bar),
        }
    }
    bars
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
    fn source(&self) -> DataSource {
        DataSource::Yahoo
    }

    /// # Summary
    /// 从 Yahoo Finance 抓取 K 线历史数据。
    ///
    /// # Logic
    /// 1. 映射 TimeFrame 周期为 Yahoo 识别的 interval。
    /// 2. 构建包含 period1, period2 的 API URL。
    /// 3. 等待限流后发起请求，按状态码映射错误。
    /// 4. 解析嵌套的 JSON 数据，提取 adjclose 并与基础 OHLCV 合并。
    ///
    /// # Arguments
    /// * `symbol`: 标的代码。
    /// * `timeframe`: 周期。
    /// * `start`: 开始时间。
    /// * `end`: 结束时间。
    ///
    /// # Returns
    /// 成功返回 K 线列表，失败返回 MarketError。
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, MarketError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);

        self.limiter.wait().await;
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("period1", start.timestamp().to_string()),
                ("period2", end.timestamp().to_string()),
                ("interval", Self::interval(timeframe).to_string()),
                ("includePrePost", "false".to_string()),
                ("events", "div,splits".to_string()),
            ])
            .send()
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(crate::status_error("yahoo", status, symbol));
        }

        let json: YahooResponse = resp
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;

        if let Some(err) = json.chart.error {
            let description = err.description.unwrap_or_default();
            return match err.code.as_deref() {
                Some("Not Found") => Err(MarketError::NotFound(symbol.to_string())),
                _ => Err(MarketError::Unknown(description)),
            };
        }

        let Some(result) = json.chart.result.and_then(|mut r| r.pop()) else {
            return Err(MarketError::NotFound(symbol.to_string()));
        };

        let bars: Vec<Bar> = parse_result(result, timeframe, Utc::now())
            .into_iter()
            .filter(|b| b.time >= timeframe.bucket_start(start) && b.time <= end)
            .collect();
        debug!(
            "Yahoo returned {} {} bars for {}",
            bars.len(),
            timeframe,
            symbol
        );
        Ok(bars)
    }
}
