//! # `kabu-analytics` - 行情分析
//!
//! K 线重采样、技术指标序列计算，以及按请求周期自动选择源数据的指标服务。

pub mod error;
pub mod indicators;
pub mod resample;
pub mod service;
