use crate::common::TimeFrame;
use crate::market::entity::DataSource;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

/// # Summary
/// 标的生命周期状态。
///
/// # Invariants
/// - `Delisted` 的标的不参与轮询更新，只能通过重新追踪恢复。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SymbolStatus {
    Active,
    Inactive,
    Delisted,
}

impl SymbolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolStatus::Active => "active",
            SymbolStatus::Inactive => "inactive",
            SymbolStatus::Delisted => "delisted",
        }
    }
}

impl FromStr for SymbolStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(SymbolStatus::Active),
            "inactive" => Ok(SymbolStatus::Inactive),
            "delisted" => Ok(SymbolStatus::Delisted),
            _ => Err(format!("Unknown SymbolStatus: {}", s)),
        }
    }
}

/// # Summary
/// 被追踪的标的实体。
///
/// # Invariants
/// - `symbol` 已规范化 (大写)，全局唯一。
/// - `delisted_at` 仅在 `status == Delisted` 时存在。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackedSymbol {
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub status: SymbolStatus,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    // 最近一次成功入库数据的时间
    pub last_data_at: Option<DateTime<Utc>>,
    pub delisted_at: Option<DateTime<Utc>>,
    // 最近一次状态变更的原因
    pub status_reason: Option<String>,
}

impl TrackedSymbol {
    pub fn new(symbol: String, now: DateTime<Utc>) -> Self {
        Self {
            symbol,
            name: None,
            exchange: None,
            status: SymbolStatus::Active,
            added_at: now,
            updated_at: now,
            last_data_at: None,
            delisted_at: None,
            status_reason: None,
        }
    }
}

/// 单日采集结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Success,
    NoData,
    Failed,
}

impl SourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceState::Success => "success",
            SourceState::NoData => "no_data",
            SourceState::Failed => "failed",
        }
    }
}

impl FromStr for SourceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(SourceState::Success),
            "no_data" => Ok(SourceState::NoData),
            "failed" => Ok(SourceState::Failed),
            _ => Err(format!("Unknown SourceState: {}", s)),
        }
    }
}

/// # Summary
/// 按 (标的, 数据源, 日期) 记录的采集状态。
///
/// # Invariants
/// - 主键为 `(symbol, source, date)`，重复写入以最后一次检查为准。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SourceStatus {
    pub symbol: String,
    pub source: DataSource,
    #[schema(value_type = String, format = Date)]
    pub date: NaiveDate,
    pub state: SourceState,
    pub bar_count: u32,
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// # Summary
/// 一次采集 (单数据源或多数据源回退) 的汇总报告。
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IngestReport {
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    // 最终提供数据的数据源，全部失败时为空
    pub source: Option<DataSource>,
    pub bars_fetched: usize,
    pub bars_stored: usize,
    // 本次写入的按日状态条数
    pub days_recorded: usize,
    // 每个失败数据源的错误描述
    pub errors: Vec<String>,
}

impl IngestReport {
    pub fn empty(symbol: &str, timeframe: TimeFrame, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            start,
            end,
            source: None,
            bars_fetched: 0,
            bars_stored: 0,
            days_recorded: 0,
            errors: Vec::new(),
        }
    }

    /// 合并分段回填的报告
    pub fn absorb(&mut self, other: IngestReport) {
        self.bars_fetched += other.bars_fetched;
        self.bars_stored += other.bars_stored;
        self.days_recorded += other.days_recorded;
        if self.source.is_none() {
            self.source = other.source;
        }
        self.errors.extend(other.errors);
    }
}

/// 健康检查结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthVerdict {
    Healthy,
    // 部分数据源缺数，但仍有数据源正常
    Degraded,
    // 全部数据源连续缺数超过阈值，但券商仍显示可交易
    Stale,
    Delisted,
}

/// 单个数据源的健康度
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SourceHealth {
    pub source: DataSource,
    #[schema(value_type = Option<String>, format = Date)]
    pub last_success: Option<NaiveDate>,
    // 截至今天，连续未成功的工作日数
    pub consecutive_misses: u32,
}

/// # Summary
/// 标的健康检查报告，对应 `GET /api/market-data/symbols/{symbol}/health`。
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthReport {
    pub symbol: String,
    pub status: SymbolStatus,
    pub verdict: HealthVerdict,
    pub sources: Vec<SourceHealth>,
    // 跨全部数据源的连续缺数工作日
    pub consecutive_misses: u32,
    pub checked_at: DateTime<Utc>,
    pub reason: Option<String>,
}
