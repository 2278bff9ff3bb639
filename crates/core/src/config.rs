use crate::common::TimeFrame;
use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub alpaca: AlpacaConfig,
    pub yahoo: YahooConfig,
    pub ingestion: IngestionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 设置后 `/api/alpaca` 下的接口需要 `Authorization: Bearer <token>`
    pub api_token: Option<String>,
    /// 网关整体限流 (每秒请求数)
    pub requests_per_second: u32,
    pub burst: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub data_dir: String,
}

/// Alpaca 券商与行情凭证。
///
/// # Invariants
/// - `api_key` 与 `secret_key` 必须同时存在才视为已配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlpacaConfig {
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    /// 交易 API 地址，默认纸面账户
    pub base_url: String,
    /// 行情 API 地址
    pub data_url: String,
    /// 行情源: `iex` (免费) 或 `sip`
    pub data_feed: String,
}

impl AlpacaConfig {
    pub fn is_configured(&self) -> bool {
        matches!((&self.api_key, &self.secret_key), (Some(k), Some(s)) if !k.is_empty() && !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YahooConfig {
    pub enabled: bool,
    pub base_url: String,
}

/// 行情采集与标的追踪相关的调优参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// 是否启动后台轮询
    pub enabled: bool,
    pub poll_interval_secs: u64,
    /// 轮询采集使用的周期
    pub timeframe: TimeFrame,
    /// 新标的首次采集回溯的天数
    pub backfill_days: u32,
    /// 连续多少个工作日无数据后进入退市判定
    pub delisting_threshold_days: u32,
    /// 批量更新时同时进行的标的数
    pub concurrency: usize,
    /// 外部行情源限流 (每分钟请求数)
    pub requests_per_minute: u32,
    pub burst: u32,
    /// 行情源优先级，取值 `alpaca` / `yahoo`
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 默认过滤级别，`RUST_LOG` 优先
    pub level: String,
    /// 滚动日志目录，为空时只输出到控制台
    pub dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                api_token: None,
                requests_per_second: 50,
                burst: 100,
            },
            database: DatabaseConfig {
                data_dir: "data".to_string(),
            },
            alpaca: AlpacaConfig {
                api_key: None,
                secret_key: None,
                base_url: "https://paper-api.alpaca.markets".to_string(),
                data_url: "https://data.alpaca.markets".to_string(),
                data_feed: "iex".to_string(),
            },
            yahoo: YahooConfig {
                enabled: true,
                base_url: "https://query1.finance.yahoo.com".to_string(),
            },
            ingestion: IngestionConfig {
                enabled: true,
                poll_interval_secs: 3_600,
                timeframe: TimeFrame::Day1,
                backfill_days: 365,
                delisting_threshold_days: 5,
                concurrency: 4,
                requests_per_minute: 180,
                burst: 10,
                providers: vec!["alpaca".to_string(), "yahoo".to_string()],
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                dir: Some("logs".to_string()),
            },
        }
    }
}
