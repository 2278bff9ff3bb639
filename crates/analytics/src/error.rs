use kabu_core::common::TimeFrame;
use kabu_core::store::error::StoreError;
use thiserror::Error;

/// 分析域错误
#[derive(Error, Debug)]
pub enum AnalyticsError {
    // 目标周期比源周期更细，或不是源周期的整数倍
    #[error("Cannot resample {from} bars into {to}")]
    UnsupportedResample { from: TimeFrame, to: TimeFrame },
    #[error("Invalid indicator: {0}")]
    InvalidIndicator(String),
    // 没有可用于计算的源数据
    #[error("No data available for {0}")]
    NoData(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
