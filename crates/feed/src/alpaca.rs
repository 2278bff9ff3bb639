use crate::limiter::RateLimiter;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use kabu_core::common::TimeFrame;
use kabu_core::config::AlpacaConfig;
use kabu_core::market::entity::{Bar, DataSource};
use kabu_core::market::error::MarketError;
use kabu_core::market::port::MarketDataProvider;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// 单页最大条数
const PAGE_LIMIT: &str = "10000";
/// 翻页上限，防止服务端持续返回 token 时陷入死循环
const MAX_PAGES: usize = 100;

/// # Summary
/// Alpaca Market Data v2 行情提供者。
///
/// # Invariants
/// - 凭证通过 `APCA-API-KEY-ID` / `APCA-API-SECRET-KEY` 默认请求头发送。
/// - 每一页请求前都等待共享限流器。
#[derive(Clone)]
pub struct AlpacaDataProvider {
    client: Client,
    data_url: String,
    feed: String,
    limiter: RateLimiter,
}

impl AlpacaDataProvider {
    /// # Summary
    /// 根据 Alpaca 配置创建行情提供者。
    ///
    /// # Returns
    /// 凭证缺失时返回 `MarketError::Unauthorized`。
    pub fn new(config: &AlpacaConfig, limiter: RateLimiter) -> Result<Self, MarketError> {
        let (Some(key), Some(secret)) = (&config.api_key, &config.secret_key) else {
            return Err(MarketError::Unauthorized(
                "alpaca credentials not configured".to_string(),
            ));
        };

        let mut headers = HeaderMap::new();
        let header = |v: &str| {
            HeaderValue::from_str(v).map_err(|e| MarketError::InvalidRequest(e.to_string()))
        };
        headers.insert("APCA-API-KEY-ID", header(key.as_str())?);
        headers.insert("APCA-API-SECRET-KEY", header(secret.as_str())?);

        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .default_headers(headers)
            .build()
            .map_err(|e| MarketError::Network(e.to_string()))?;

        Ok(Self {
            client,
            data_url: config.data_url.trim_end_matches('/').to_string(),
            feed: config.data_feed.clone(),
            limiter,
        })
    }

    fn timeframe_param(timeframe: TimeFrame) -> &'static str {
        match timeframe {
            TimeFrame::Minute1 => "1Min",
            TimeFrame::Minute5 => "5Min",
            TimeFrame::Minute15 => "15Min",
            TimeFrame::Hour1 => "1Hour",
            TimeFrame::Day1 => "1Day",
            TimeFrame::Week1 => "1Week",
        }
    }
}

#[derive(Deserialize, Debug)]
struct BarsPage {
    // 区间内无数据时为 null
    bars: Option<Vec<AlpacaBar>>,
    next_page_token: Option<String>,
}

#[derive(Deserialize, Debug)]
struct AlpacaBar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
    n: Option<u64>,
    vw: Option<f64>,
}

impl AlpacaBar {
    fn into_bar(self, timeframe: TimeFrame, now: DateTime<Utc>) -> Bar {
        // 日线/周线的时间戳为美东零点，对齐到 UTC 周期起点
        let time = timeframe.bucket_start(self.t);
        Bar {
            time,
            open: self.o,
            high: self.h,
            low: self.l,
            close: self.c,
            adj_close: None,
            volume: self.v,
            vwap: self.vw,
            trade_count: self.n,
            is_final: time + timeframe.duration() <= now,
        }
    }
}

#[async_trait]
impl MarketDataProvider for AlpacaDataProvider {
    fn source(&self) -> DataSource {
        DataSource::Alpaca
    }

    /// # Summary
    /// 分页拉取历史 K 线。
    ///
    /// # Logic
    /// 1. 以 `adjustment=raw` 请求指定 feed 的 bars。
    /// 2. 沿 `next_page_token` 翻页直至耗尽。
    /// 3. 丢弃价格关系非法的行。
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, MarketError> {
        let url = format!("{}/v2/stocks/{}/bars", self.data_url, symbol);
        let now = Utc::now();
        let mut bars = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut params = vec![
                ("timeframe", Self::timeframe_param(timeframe).to_string()),
                ("start", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("end", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("limit", PAGE_LIMIT.to_string()),
                ("adjustment", "raw".to_string()),
                ("feed", self.feed.clone()),
            ];
            if let Some(token) = &page_token {
                params.push(("page_token", token.clone()));
            }

            self.limiter.wait().await;
            let resp = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .await
                .map_err(|e| MarketError::Network(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(crate::status_error("alpaca", status, symbol));
            }

            let page: BarsPage = resp
                .json()
                .await
                .map_err(|e| MarketError::Parse(e.to_string()))?;

            for raw in page.bars.unwrap_or_default() {
                let bar = raw.into_bar(timeframe, now);
                if bar.is_consistent() {
                    bars.push(bar);
                } else {
                    warn!("Dropping inconsistent Alpaca bar for {} at {}", symbol, bar.time);
                }
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => {
                    debug!(
                        "Alpaca returned {} {} bars for {}",
                        bars.len(),
                        timeframe,
                        symbol
                    );
                    return Ok(bars);
                }
            }
        }

        warn!("Alpaca pagination for {} exceeded {} pages", symbol, MAX_PAGES);
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_missing_credentials_rejected() {
        let config = AlpacaConfig {
            api_key: None,
            secret_key: Some("s".into()),
            base_url: String::new(),
            data_url: "http://localhost".into(),
            data_feed: "iex".into(),
        };
        let result = AlpacaDataProvider::new(&config, RateLimiter::unlimited());
        assert!(matches!(result, Err(MarketError::Unauthorized(_))));
    }

    #[test]
    fn test_daily_bar_aligned_to_utc_midnight() {
        let raw: AlpacaBar = serde_json::from_str(
            r#"{"t":"2026-01-06T05:00:00Z","o":10,"h":11,"l":9,"c":10.5,"v":1200,"n":42,"vw":10.2}"#,
        )
        .unwrap();
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let bar = raw.into_bar(TimeFrame::Day1, now);
        assert_eq!(bar.time, Utc.with_ymd_and_hms(2026, 1, 6, 0, 0, 0).unwrap());
        assert_eq!(bar.trade_count, Some(42));
        assert_eq!(bar.vwap, Some(10.2));
        assert!(bar.is_final);
    }
}
