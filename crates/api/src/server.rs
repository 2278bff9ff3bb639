//! # API 服务启动器
//!
//! 组装 axum 路由、挂载 Swagger UI、配置 CORS 与限流并绑定 TCP 端口对外提供服务。
//! 本模块不直接启动 `main()`, 而是由 `crates/app` 组装好 `AppState` 后调用。

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;
use utoipa_swagger_ui::SwaggerUi;

use kabu_analytics::service::IndicatorService;
use kabu_core::broker::port::BrokerPort;
use kabu_core::config::AppConfig;
use kabu_market::service::MarketDataService;
use kabu_market::tracker::SymbolTracker;

use crate::middleware::auth::auth_middleware;
use crate::middleware::rate_limit::{GatewayLimiter, rate_limit_middleware};
use crate::routes::{alpaca, market, strategy, symbols, system};
use crate::types::ApiErrorResponse;

// ============================================================
//  共享应用状态
// ============================================================

/// 全局应用状态，通过 axum 的 `State` 提取器注入到每个 Handler 中。
///
/// # Invariants
/// - 各服务在启动前由 `crates/app` 注入，生命周期与进程等同。
/// - `broker` 为 `None` 表示未配置券商凭证，`/api/alpaca` 全部返回 503。
#[derive(Clone)]
pub struct AppState {
    /// 行情查询门面
    pub market: Arc<MarketDataService>,
    /// 标的追踪与采集
    pub tracker: Arc<SymbolTracker>,
    /// 技术指标计算
    pub indicators: Arc<IndicatorService>,
    pub broker: Option<Arc<dyn BrokerPort>>,
    pub config: Arc<AppConfig>,
    /// 网关整体限流
    pub limiter: GatewayLimiter,
}

// ============================================================
//  OpenAPI 文档定义
// ============================================================

/// 全局 OpenAPI 文档结构
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kabu 行情网关 API",
        version = "0.1.0",
        description = "美股行情采集与券商代理网关。提供标的追踪、K 线与技术指标查询、以及 Alpaca 账户与订单接口。",
        contact(name = "Kabu Team"),
        license(name = "MIT")
    ),
    tags(
        (name = "标的 (Symbols)", description = "追踪标的的增删、采集状态、健康度与回填"),
        (name = "行情 (Market Data)", description = "K 线、OHLC 重采样与技术指标"),
        (name = "券商 (Alpaca)", description = "账户、持仓、订单、成交与交易所时钟"),
        (name = "策略 (Strategy)", description = "尚未实现"),
        (name = "系统 (System)", description = "存活检查")
    ),
    components(schemas(ApiErrorResponse)),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// 为 OpenAPI 文档注入 Bearer Token 鉴权方案。
///
/// 注册后，Swagger UI 页面顶部将显示 Authorize 按钮，
/// 填入 `server.api_token` 后即可调试 `/api/alpaca` 下的接口。
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_token",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .description(Some("填入配置中的 API Token（无需 'Bearer ' 前缀）"))
                    .build(),
            ),
        );
    }
}

// ============================================================
//  服务构建与启动
// ============================================================

/// # Summary
/// 构建完整的 axum 应用路由树。
///
/// # Logic
/// 1. 行情与标的路由公开访问。
/// 2. 券商路由挂载 Bearer Token 鉴权。
/// 3. 以上业务路由统一经过网关限流；存活检查与 Swagger 不限流。
/// 4. 未匹配的路径与方法统一返回错误信封。
/// 5. 最外层挂载请求追踪与 CORS。
pub fn build_router(state: AppState) -> Router {
    let market_router = OpenApiRouter::new()
        .routes(routes!(market::get_stats))
        .routes(routes!(symbols::list_symbols, symbols::track_symbol))
        .routes(routes!(symbols::untrack_symbol))
        .routes(routes!(symbols::source_status))
        .routes(routes!(symbols::symbol_health))
        .routes(routes!(symbols::backfill_symbol))
        .routes(routes!(market::get_bars))
        .routes(routes!(market::get_latest))
        .routes(routes!(market::get_count))
        .routes(routes!(market::get_ohlc))
        .routes(routes!(market::get_indicators));

    let broker_router = OpenApiRouter::new()
        .routes(routes!(alpaca::get_account))
        .routes(routes!(alpaca::list_positions))
        .routes(routes!(alpaca::get_position))
        .routes(routes!(alpaca::close_position))
        .routes(routes!(alpaca::list_orders, alpaca::submit_order))
        .routes(routes!(alpaca::get_order, alpaca::cancel_order))
        .routes(routes!(alpaca::list_trades))
        .routes(routes!(alpaca::get_clock))
        .routes(routes!(alpaca::get_asset))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let strategy_router = OpenApiRouter::new().routes(routes!(
        strategy::list_strategies,
        strategy::create_strategy
    ));

    let limited = OpenApiRouter::new()
        .merge(market_router)
        .merge(broker_router)
        .merge(strategy_router)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .merge(limited)
        .routes(routes!(system::health))
        .with_state(state)
        .split_for_parts();

    // 开发阶段允许所有来源
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .fallback(system::not_found)
        .method_not_allowed_fallback(system::method_not_allowed)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// # Summary
/// 绑定端口并启动 HTTP 服务，`shutdown` 完成后优雅退出。
///
/// # Arguments
/// * `state` - 由 `crates/app` 组装的共享状态
/// * `bind_addr` - 监听的地址与端口，如 `"0.0.0.0:8080"`
/// * `shutdown` - 关闭信号
pub async fn start_server<F>(state: AppState, bind_addr: &str, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;

    tracing::info!("Kabu API server listening on {}", listener.local_addr()?);
    tracing::info!("Swagger UI: http://{}/swagger-ui/", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
