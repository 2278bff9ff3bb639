//! # DTO (Data Transfer Object) 层
//!
//! 统一响应信封与各路由的请求体、查询参数。
//! 领域实体本身已派生 `ToSchema`，直接作为载荷返回，这里只定义 API 独有的结构。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

// ============================================================
//  通用响应信封
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// 统一成功响应: `{"status":"success","data":…,"timestamp":…}`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub status: ResponseStatus,
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    /// 构建成功响应
    pub fn ok(data: T) -> Self {
        Self {
            status: ResponseStatus::Success,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// 错误详情
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// 机器可读的错误码
    #[schema(example = "NOT_FOUND")]
    pub code: String,
    #[schema(example = "Symbol not found: XYZ")]
    pub message: String,
    /// 附加信息，如校验失败的字段列表
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

/// 统一失败响应: `{"status":"error","error":{code,message,details},"timestamp":…}`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiErrorResponse {
    pub status: ResponseStatus,
    pub error: ErrorDetail,
    pub timestamp: DateTime<Utc>,
}

impl ApiErrorResponse {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            status: ResponseStatus::Error,
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details,
            },
            timestamp: Utc::now(),
        }
    }
}

/// 存活检查
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    #[schema(example = "0.1.0")]
    pub version: String,
    /// 是否配置了券商凭证
    pub broker_configured: bool,
}

// ============================================================
//  行情 (Market Data)
// ============================================================

/// 标的列表过滤条件
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SymbolListQuery {
    /// `active` / `inactive` / `delisted`，为空时返回全部
    pub status: Option<String>,
}

/// 追踪标的请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrackSymbolRequest {
    #[schema(example = "AAPL")]
    pub symbol: String,
    #[schema(example = "Apple Inc.")]
    pub name: Option<String>,
    #[schema(example = "NASDAQ")]
    pub exchange: Option<String>,
    /// 为 true 时在后台立即执行一次回填
    #[serde(default)]
    pub backfill: bool,
}

/// 按日采集状态查询条件
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SourceStatusQuery {
    /// `alpaca` / `yahoo`，为空时返回全部数据源
    pub source: Option<String>,
    /// 最近若干天 (含今天)，默认 30
    pub days: Option<u32>,
}

/// 回填请求体，字段均可省略
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BackfillRequest {
    /// RFC 3339 或 `YYYY-MM-DD`，默认 `end - backfill_days`
    #[schema(example = "2025-01-01")]
    pub start: Option<String>,
    /// 默认当前时间
    pub end: Option<String>,
    /// 默认采集配置中的周期
    #[schema(example = "1d")]
    pub timeframe: Option<String>,
}

/// K 线查询条件
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BarsQuery {
    /// 默认 `1d`
    pub timeframe: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    /// 取区间内最新的若干根，上限 10000
    pub limit: Option<usize>,
}

/// 仅含周期的查询条件
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TimeframeQuery {
    pub timeframe: Option<String>,
}

/// OHLC 重采样查询条件
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OhlcQuery {
    /// 目标周期，默认 `1d`
    pub interval: Option<String>,
    /// 源周期，为空时自动选择
    pub source_timeframe: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<usize>,
}

/// 指标查询条件
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct IndicatorQuery {
    /// 目标周期，默认 `1d`
    pub interval: Option<String>,
    /// 逗号分隔，如 `sma_20,rsi_14,macd_12_26_9`；默认 `sma,ema,rsi`
    pub indicators: Option<String>,
    /// 默认 100，上限 1000
    pub limit: Option<usize>,
}

// ============================================================
//  券商 (Alpaca)
// ============================================================

/// 订单列表查询条件
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    /// `open` (默认) / `closed` / `all`
    pub status: Option<String>,
    /// 1..=500
    pub limit: Option<u32>,
    pub after: Option<String>,
    pub until: Option<String>,
    /// `asc` / `desc`
    pub direction: Option<String>,
    /// 逗号分隔的标的代码
    pub symbols: Option<String>,
}

/// 成交流水查询条件
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TradesQuery {
    /// `YYYY-MM-DD`
    pub date: Option<String>,
    /// 1..=100
    pub limit: Option<u32>,
}

/// 撤单结果
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelOrderResponse {
    pub order_id: String,
    pub canceled: bool,
}
