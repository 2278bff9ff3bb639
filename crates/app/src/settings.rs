//! # 配置加载
//!
//! 按以下优先级从低到高合并：
//! 1. `AppConfig::default()`
//! 2. 可选的配置文件 (默认 `kabu.toml`，可由 `KABU_CONFIG` 指定)
//! 3. `KABU__SECTION__KEY` 形式的环境变量
//! 4. 常用的扁平环境变量，如 `ALPACA_API_KEY`、`KABU_API_TOKEN`

use config::{Config, ConfigError, Environment, File};
use kabu_core::config::AppConfig;
use std::collections::HashMap;

const DEFAULT_CONFIG_FILE: &str = "kabu";

/// 扁平环境变量 -> 配置键
const FLAT_OVERRIDES: &[(&str, &str)] = &[
    ("ALPACA_API_KEY", "alpaca.api_key"),
    ("ALPACA_SECRET_KEY", "alpaca.secret_key"),
    ("ALPACA_BASE_URL", "alpaca.base_url"),
    ("ALPACA_DATA_URL", "alpaca.data_url"),
    ("ALPACA_DATA_FEED", "alpaca.data_feed"),
    ("YAHOO_BASE_URL", "yahoo.base_url"),
    ("KABU_POLL_INTERVAL_SECS", "ingestion.poll_interval_secs"),
    ("KABU_RATE_LIMIT_PER_MINUTE", "ingestion.requests_per_minute"),
    ("KABU_API_TOKEN", "server.api_token"),
];

/// 从进程环境加载配置
pub fn load() -> Result<AppConfig, ConfigError> {
    let vars: HashMap<String, String> = std::env::vars().collect();
    let file = vars
        .get("KABU_CONFIG")
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    build(&file, &vars)
}

/// # Summary
/// 以给定的配置文件与环境变量集合构建配置。
///
/// # Arguments
/// * `file` - 配置文件路径 (可省略扩展名)，不存在时忽略
/// * `vars` - 环境变量快照
pub fn build(file: &str, vars: &HashMap<String, String>) -> Result<AppConfig, ConfigError> {
    let env_source: config::Map<String, String> = vars
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut builder = Config::builder()
        .add_source(Config::try_from(&AppConfig::default())?)
        .add_source(File::with_name(file).required(false))
        .add_source(
            Environment::with_prefix("KABU")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("ingestion.providers")
                .try_parsing(true)
                .source(Some(env_source)),
        );

    for (var, key) in FLAT_OVERRIDES {
        let value = vars
            .get(*var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        builder = builder.set_override_option(*key, value)?;
    }

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kabu_core::common::TimeFrame;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = build("does-not-exist", &HashMap::new()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.ingestion.timeframe, TimeFrame::Day1);
        assert_eq!(config.ingestion.providers, vec!["alpaca", "yahoo"]);
        assert!(config.server.api_token.is_none());
        assert!(!config.alpaca.is_configured());
    }

    #[test]
    fn test_layering_order() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nport = 9000\n\n[ingestion]\nbackfill_days = 30\ntimeframe = \"1h\"\npoll_interval_secs = 600"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let env = vars(&[
            ("KABU__SERVER__PORT", "9100"),
            ("KABU__INGESTION__PROVIDERS", "yahoo"),
            ("KABU_POLL_INTERVAL_SECS", "120"),
            ("ALPACA_API_KEY", "key"),
            ("ALPACA_SECRET_KEY", "secret"),
            ("KABU_API_TOKEN", " "),
            ("UNRELATED", "x"),
        ]);
        let config = build(&path, &env).unwrap();

        // 环境变量覆盖配置文件
        assert_eq!(config.server.port, 9100);
        // 配置文件覆盖默认值
        assert_eq!(config.ingestion.backfill_days, 30);
        assert_eq!(config.ingestion.timeframe, TimeFrame::Hour1);
        // 扁平变量优先级最高
        assert_eq!(config.ingestion.poll_interval_secs, 120);
        assert_eq!(config.ingestion.providers, vec!["yahoo"]);
        assert!(config.alpaca.is_configured());
        // 空白值视为未设置
        assert!(config.server.api_token.is_none());
    }
}
