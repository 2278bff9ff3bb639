use crate::common::TimeFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use utoipa::ToSchema;

/// # Summary
/// 单根 OHLCV K 线实体，记录特定时段内的行情波动。
///
/// # Invariants
/// - `time` 为该 Bar 所属周期的起始时刻 (UTC)。
/// - `high` 必须大于或等于 `low`, `open`, `close`；`low` 必须小于或等于 `open`, `close`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Bar {
    // K 线开始时间
    pub time: DateTime<Utc>,
    // 开盘价
    pub open: f64,
    // 最高价
    pub high: f64,
    // 最低价
    pub low: f64,
    // 收盘价
    pub close: f64,
    // 调整后收盘价 (处理分红、拆股等复权情况)
    pub adj_close: Option<f64>,
    // 成交量
    pub volume: f64,
    // 成交量加权均价 (部分数据源提供)
    pub vwap: Option<f64>,
    // 成交笔数 (部分数据源提供)
    pub trade_count: Option<u64>,
    // 是否为最终数据 (即该周期已收盘)
    pub is_final: bool,
}

impl Bar {
    /// # Summary
    /// 校验价格关系与数值合法性。
    ///
    /// # Logic
    /// 1. 所有价格必须是有限正数，成交量必须是有限非负数。
    /// 2. `low <= min(open, close)` 且 `high >= max(open, close)`。
    pub fn is_consistent(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return false;
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return false;
        }
        self.low <= self.open.min(self.close) && self.high >= self.open.max(self.close)
    }
}

/// # Summary
/// 行情数据来源标识。
///
/// # Invariants
/// - 序列化为小写字符串，与存储层 `source` 列一致。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Alpaca,
    Yahoo,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Alpaca => "alpaca",
            DataSource::Yahoo => "yahoo",
        }
    }
}

impl FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "alpaca" => Ok(DataSource::Alpaca),
            "yahoo" => Ok(DataSource::Yahoo),
            _ => Err(format!("Unknown DataSource: {}", s)),
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Summary
/// K 线查询条件。
///
/// # Invariants
/// - `limit` 存在时返回区间内 **最新** 的 `limit` 根，仍按时间升序排列。
#[derive(Debug, Clone)]
pub struct BarQuery {
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl BarQuery {
    pub fn new(symbol: impl Into<String>, timeframe: TimeFrame) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            start: None,
            end: None,
            limit: None,
        }
    }

    pub fn range(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// 单个标的在某周期下的数据覆盖情况
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SymbolCoverage {
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub bar_count: u64,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

/// # Summary
/// 行情库全局统计，对应 `GET /api/market-data/stats`。
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct MarketStats {
    // 被追踪的标的总数
    pub total_symbols: u64,
    // 状态为 Active 的标的数
    pub active_symbols: u64,
    // 至少存有一根 Bar 的标的数
    pub symbols_with_data: u64,
    pub total_bars: u64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    // Key 为周期字符串，如 "1d"
    pub bars_by_timeframe: BTreeMap<String, u64>,
    // Key 为数据源字符串，如 "alpaca"
    pub bars_by_source: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            adj_close: None,
            volume: 10.0,
            vwap: None,
            trade_count: None,
            is_final: true,
        }
    }

    #[test]
    fn test_bar_consistency() {
        assert!(bar(10.0, 12.0, 9.0, 11.0).is_consistent());
        assert!(!bar(10.0, 9.5, 9.0, 11.0).is_consistent());
        assert!(!bar(10.0, 12.0, 10.5, 11.0).is_consistent());
        assert!(!bar(f64::NAN, 12.0, 9.0, 11.0).is_consistent());
        assert!(!bar(0.0, 12.0, 0.0, 11.0).is_consistent());
    }

    #[test]
    fn test_data_source_roundtrip() {
        assert_eq!("Alpaca".parse::<DataSource>().unwrap(), DataSource::Alpaca);
        assert_eq!(DataSource::Yahoo.to_string(), "yahoo");
        assert!("polygon".parse::<DataSource>().is_err());
    }
}
