pub mod time;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

/// 标的代码的最大长度 (含 `BRK.B`、`RDS-A` 一类的后缀写法)
pub const MAX_SYMBOL_LEN: usize = 12;

/// # Summary
/// 标的代码校验错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    #[error("symbol is empty")]
    Empty,
    #[error("symbol exceeds {MAX_SYMBOL_LEN} characters: {0}")]
    TooLong(String),
    #[error("symbol contains invalid character '{1}': {0}")]
    InvalidChar(String, char),
}

/// # Summary
/// 规范化标的代码。
///
/// # Logic
/// 1. 去掉首尾空白并转为大写。
/// 2. 校验长度在 1..=12 之间。
/// 3. 只允许字母、数字、`.` 与 `-`。
///
/// # Arguments
/// * `raw`: 外部传入的原始代码。
///
/// # Returns
/// 规范化后的代码，或 `SymbolError`。
pub fn normalize_symbol(raw: &str) -> Result<String, SymbolError> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(SymbolError::Empty);
    }
    if symbol.chars().count() > MAX_SYMBOL_LEN {
        return Err(SymbolError::TooLong(symbol));
    }
    if let Some(bad) = symbol
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || *c == '-'))
    {
        return Err(SymbolError::InvalidChar(symbol, bad));
    }
    Ok(symbol)
}

/// # Summary
/// K 线时间周期枚举，定义一根 Bar 的时间跨度。
///
/// # Invariants
/// - 周期之间按时长全序排列 (`Minute1 < ... < Week1`)。
/// - 除 `Week1` 以 ISO 周一对齐外，其余周期均以 Unix 纪元对齐。
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, ToSchema,
)]
pub enum TimeFrame {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "1d")]
    Day1,
    #[serde(rename = "1w")]
    Week1,
}

impl TimeFrame {
    pub const ALL: [TimeFrame; 6] = [
        TimeFrame::Minute1,
        TimeFrame::Minute5,
        TimeFrame::Minute15,
        TimeFrame::Hour1,
        TimeFrame::Day1,
        TimeFrame::Week1,
    ];

    /// 周期对应的秒数
    pub fn seconds(&self) -> i64 {
        match self {
            TimeFrame::Minute1 => 60,
            TimeFrame::Minute5 => 300,
            TimeFrame::Minute15 => 900,
            TimeFrame::Hour1 => 3_600,
            TimeFrame::Day1 => 86_400,
            TimeFrame::Week1 => 604_800,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::Minute1 => "1m",
            TimeFrame::Minute5 => "5m",
            TimeFrame::Minute15 => "15m",
            TimeFrame::Hour1 => "1h",
            TimeFrame::Day1 => "1d",
            TimeFrame::Week1 => "1w",
        }
    }

    /// 日内周期 (小于一天)
    pub fn is_intraday(&self) -> bool {
        self.seconds() < TimeFrame::Day1.seconds()
    }

    /// # Summary
    /// 判断当前周期能否无损聚合为 `target` 周期。
    ///
    /// # Logic
    /// 1. 目标周期必须不小于当前周期。
    /// 2. 目标周期的时长必须是当前周期的整数倍。
    ///
    /// # Arguments
    /// * `target`: 聚合目标周期。
    ///
    /// # Returns
    /// 可聚合返回 true。
    pub fn divides(&self, target: TimeFrame) -> bool {
        *self <= target && target.seconds() % self.seconds() == 0
    }

    /// # Summary
    /// 计算某一时刻所属 Bar 的起始时间。
    ///
    /// # Logic
    /// 1. `Week1` 回退到所在 ISO 周的周一 00:00 UTC。
    /// 2. 其它周期按纪元秒数向下取整。
    pub fn bucket_start(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TimeFrame::Week1 => {
                let date = time.date_naive();
                let monday =
                    date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
                Utc.from_utc_datetime(&monday.and_time(chrono::NaiveTime::MIN))
            }
            _ => {
                let secs = time.timestamp();
                let floored = secs - secs.rem_euclid(self.seconds());
                Utc.timestamp_opt(floored, 0).single().unwrap_or(time)
            }
        }
    }
}

impl FromStr for TimeFrame {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "1min" | "minute" | "minute1" => Ok(TimeFrame::Minute1),
            "5m" | "5min" | "minute5" => Ok(TimeFrame::Minute5),
            "15m" | "15min" | "minute15" => Ok(TimeFrame::Minute15),
            "1h" | "60m" | "hour" | "hourly" | "hour1" => Ok(TimeFrame::Hour1),
            "1d" | "day" | "daily" | "day1" => Ok(TimeFrame::Day1),
            "1w" | "1wk" | "week" | "weekly" | "week1" => Ok(TimeFrame::Week1),
            _ => Err(format!("Unknown TimeFrame: {}", s)),
        }
    }
}

impl std::fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
