//! # `kabu-api` - HTTP API 网关
//!
//! 本 crate 是 Kabu 行情与券商网关的 HTTP/REST 服务入口。
//! 使用 `axum` 构建路由与控制器，通过 `utoipa` 自动生成 OpenAPI 3.0 Swagger 文档。
//!
//! ## 架构职责
//! - `/api/market-data`: 标的追踪管理、K 线查询、重采样与技术指标
//! - `/api/alpaca`: 经 Bearer Token 鉴权后代理券商账户、持仓与订单接口
//! - 所有响应使用统一的 `status` / `data` / `timestamp` 信封

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod types;
