//! # `kabu-broker` - 券商通道
//!
//! `BrokerPort` 的 Alpaca Trading API v2 实现。

pub mod alpaca;
mod wire;
