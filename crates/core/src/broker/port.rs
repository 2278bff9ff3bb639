use super::entity::{
    Account, AssetInfo, ClosePositionRequest, MarketClock, Order, OrderQuery, OrderRequest,
    Position, TradeActivity, TradeQuery,
};
use async_trait::async_trait;
use thiserror::Error;

/// # Summary
/// 券商通道错误。
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker rejected credentials: {0}")]
    Unauthorized(String),
    // 券商拒绝该操作 (如购买力不足、账户被冻结)
    #[error("Broker forbade the request: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    // 券商侧参数校验失败 (422)
    #[error("Rejected by broker: {0}")]
    Rejected(String),
    #[error("Rate limited by broker")]
    RateLimited,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Broker returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },
}

/// # Summary
/// 券商交易端口。
/// API 网关的 `/api/alpaca` 路由与标的追踪器的退市确认都通过此端口访问券商。
///
/// # Invariants
/// - 此接口必须是异步且线程安全的 (`Send + Sync`)。
/// - 实现者只负责协议转换，不做本地撮合或缓存。
#[async_trait]
pub trait BrokerPort: Send + Sync {
    /// 查询账户资金快照
    async fn get_account(&self) -> Result<Account, BrokerError>;

    /// 查询全部持仓
    async fn list_positions(&self) -> Result<Vec<Position>, BrokerError>;

    /// 查询单个持仓，无持仓返回 `NotFound`
    async fn get_position(&self, symbol: &str) -> Result<Position, BrokerError>;

    /// # Summary
    /// 平掉指定标的的持仓。
    ///
    /// # Arguments
    /// * `symbol` - 标的代码
    /// * `request` - 部分平仓参数，全空时全部平仓
    ///
    /// # Returns
    /// * `Ok(Order)` - 券商生成的平仓订单
    async fn close_position(
        &self,
        symbol: &str,
        request: &ClosePositionRequest,
    ) -> Result<Order, BrokerError>;

    /// 按条件查询订单列表
    async fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>, BrokerError>;

    /// 查询单个订单
    async fn get_order(&self, order_id: &str) -> Result<Order, BrokerError>;

    /// 提交订单，调用方需先完成 `OrderRequest::validate`
    async fn submit_order(&self, request: &OrderRequest) -> Result<Order, BrokerError>;

    /// 撤销订单
    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError>;

    /// 查询成交流水
    async fn list_trades(&self, query: &TradeQuery) -> Result<Vec<TradeActivity>, BrokerError>;

    /// 查询交易所时钟
    async fn get_clock(&self) -> Result<MarketClock, BrokerError>;

    /// # Summary
    /// 查询资产目录。
    ///
    /// # Returns
    /// * `Ok(None)` - 券商不认识该标的
    async fn get_asset(&self, symbol: &str) -> Result<Option<AssetInfo>, BrokerError>;
}
