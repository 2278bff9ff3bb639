//! # `kabu-store` - SQLite 持久化
//!
//! `MarketStore` 与 `SymbolStore` 的 SQLite 实现。数据根目录由 [`config::set_root_dir`] 设定。

pub mod config;
pub mod market;
pub mod symbol;
