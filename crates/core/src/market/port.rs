use crate::common::TimeFrame;
use crate::market::entity::{Bar, DataSource};
use crate::market::error::MarketError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// # Summary
/// 市场行情数据提供者接口（原始数据源）。
///
/// # Invariants
/// - 返回的 Bar 按时间升序排列，且均满足 `Bar::is_consistent`。
/// - 实现者必须在每次外发请求前等待共享限流器。
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// 数据源标识，用于存储层记录来源与按源状态簿记。
    fn source(&self) -> DataSource;

    /// # Summary
    /// 获取特定标的在指定时间范围内的 K 线数据。
    ///
    /// # Logic
    /// 1. 将 TimeFrame 映射为数据源识别的周期参数。
    /// 2. 构建并执行请求，必要时翻页。
    /// 3. 解析响应数据，丢弃不完整或价格关系非法的行。
    ///
    /// # Arguments
    /// * `symbol`: 规范化后的标的代码。
    /// * `timeframe`: K 线周期。
    /// * `start`: 开始时间（包含）。
    /// * `end`: 结束时间（包含）。
    ///
    /// # Returns
    /// 成功返回 K 线列表（可能为空），失败返回 `MarketError`。
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, MarketError>;
}
