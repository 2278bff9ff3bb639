//! # `kabu-market` - 行情采集与查询
//!
//! - [`tracker::SymbolTracker`]: 标的生命周期、多数据源采集、回填与退市判定。
//! - [`service::MarketDataService`]: 面向 API 的只读查询门面。

pub mod error;
pub mod service;
pub mod tracker;
