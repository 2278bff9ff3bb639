use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc, Weekday};
use std::sync::RwLock;

/// # Summary
/// 时间供给器接口，用于隔离物理系统时钟。
/// 标的追踪器的健康检查与增量更新窗口均通过此接口获取“当前时间”。
pub trait TimeProvider: Send + Sync {
    /// 获取当前挂载的时间
    fn now(&self) -> DateTime<Utc>;
}

/// # Summary
/// 生产环境使用的真实时钟，直接返回操作系统当前时间。
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// # Summary
/// 测试专用虚拟时钟，允许主动拨动时间以模拟连续多日缺数。
///
/// # Invariants
/// - 并发安全：内部利用 `RwLock` 提供多线程读写。锁中毒时沿用中毒前的值。
pub struct FakeClockProvider {
    current_time: RwLock<DateTime<Utc>>,
}

impl FakeClockProvider {
    /// 使用指定的初始时间创建虚拟时钟
    pub fn new(initial_time: DateTime<Utc>) -> Self {
        Self {
            current_time: RwLock::new(initial_time),
        }
    }

    /// 强制修改时钟的当前时间
    pub fn set_time(&self, new_time: DateTime<Utc>) {
        let mut time = self
            .current_time
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *time = new_time;
    }
}

impl TimeProvider for FakeClockProvider {
    fn now(&self) -> DateTime<Utc> {
        *self
            .current_time
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// # Summary
/// 解析查询参数中的时间。
///
/// # Logic
/// 1. 优先按 RFC 3339 (`2024-01-02T15:04:05Z`) 解析。
/// 2. 其次按纯日期 (`2024-01-02`) 解析，取当日 00:00 UTC。
///
/// # Arguments
/// * `raw`: 原始字符串。
///
/// # Returns
/// 解析成功返回 UTC 时间，否则返回可直接展示给调用方的错误描述。
pub fn parse_time_param(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(start_of_day(date));
    }
    Err(format!(
        "invalid time '{}', expected RFC 3339 or YYYY-MM-DD",
        raw
    ))
}

/// 某日 00:00 UTC
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// 周一至周五视为交易日 (不处理节假日)
pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// # Summary
/// 枚举闭区间 `[start, end]` 内的全部自然日。
///
/// # Returns
/// 升序日期列表；`start > end` 时为空。
pub fn dates_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_param() {
        let t = parse_time_param("2024-01-02T15:04:05Z").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 1, 2, 15, 4, 5).unwrap());

        let offset = parse_time_param("2024-01-02T10:00:00-05:00").unwrap();
        assert_eq!(offset, Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap());

        let d = parse_time_param("2024-01-02").unwrap();
        assert_eq!(d, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());

        assert!(parse_time_param("yesterday").is_err());
    }

    #[test]
    fn test_dates_between_and_weekdays() {
        let start = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(); // 周五
        let end = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap(); // 周一
        let days = dates_between(start, end);
        assert_eq!(days.len(), 4);
        let weekdays: Vec<_> = days.into_iter().filter(|d| is_weekday(*d)).collect();
        assert_eq!(weekdays.len(), 2);
        assert!(dates_between(end, start).is_empty());
    }

    #[test]
    fn test_fake_clock() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FakeClockProvider::new(t0);
        assert_eq!(clock.now(), t0);
        let t1 = t0 + chrono::Duration::days(3);
        clock.set_time(t1);
        assert_eq!(clock.now(), t1);
    }
}
