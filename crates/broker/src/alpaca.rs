use crate::wire::{ErrorBody, FillActivity, SubmitOrderBody};
use async_trait::async_trait;
use chrono::SecondsFormat;
use kabu_core::broker::entity::{
    Account, AssetInfo, ClosePositionRequest, MarketClock, Order, OrderQuery, OrderRequest,
    Position, TradeActivity, TradeQuery,
};
use kabu_core::broker::port::{BrokerError, BrokerPort};
use kabu_core::config::AlpacaConfig;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error};

/// # Summary
/// Alpaca Trading API v2 客户端。
///
/// # Invariants
/// - 只做协议转换，业务校验 (如 `OrderRequest::validate`) 由调用方完成。
/// - 凭证以默认请求头随每个请求发送。
#[derive(Clone)]
pub struct AlpacaBroker {
    client: Client,
    base_url: String,
}

impl AlpacaBroker {
    /// # Summary
    /// 根据配置创建客户端。
    ///
    /// # Returns
    /// 凭证缺失时返回 `BrokerError::Unauthorized`。
    pub fn new(config: &AlpacaConfig) -> Result<Self, BrokerError> {
        let (Some(key), Some(secret)) = (&config.api_key, &config.secret_key) else {
            return Err(BrokerError::Unauthorized(
                "alpaca credentials not configured".to_string(),
            ));
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            "APCA-API-KEY-ID",
            HeaderValue::from_str(key).map_err(|e| BrokerError::Unauthorized(e.to_string()))?,
        );
        headers.insert(
            "APCA-API-SECRET-KEY",
            HeaderValue::from_str(secret).map_err(|e| BrokerError::Unauthorized(e.to_string()))?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .default_headers(headers)
            .build()
            .map_err(|e| BrokerError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!("{} {}", method, url);
        self.client.request(method, url)
    }

    /// # Summary
    /// 发送请求并按状态码映射错误。
    ///
    /// # Logic
    /// 1. 2xx 直接返回响应。
    /// 2. 其余状态读取 Alpaca 错误体中的 `message`，映射为对应 `BrokerError`。
    async fn send(&self, request: RequestBuilder) -> Result<Response, BrokerError> {
        let response = request
            .send()
            .await
            .map_err(|e| BrokerError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(text);
        Err(map_status(status, message))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, BrokerError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| BrokerError::Parse(e.to_string()))
    }
}

fn map_status(status: StatusCode, message: String) -> BrokerError {
    match status {
        StatusCode::UNAUTHORIZED => BrokerError::Unauthorized(message),
        StatusCode::FORBIDDEN => BrokerError::Forbidden(message),
        StatusCode::NOT_FOUND => BrokerError::NotFound(message),
        StatusCode::UNPROCESSABLE_ENTITY => BrokerError::Rejected(message),
        StatusCode::TOO_MANY_REQUESTS => BrokerError::RateLimited,
        _ => {
            error!("Alpaca request failed with status {}: {}", status, message);
            BrokerError::Upstream {
                status: status.as_u16(),
                message,
            }
        }
    }
}

fn rfc3339(t: chrono::DateTime<chrono::Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl BrokerPort for AlpacaBroker {
    async fn get_account(&self) -> Result<Account, BrokerError> {
        self.send_json(self.request(Method::GET, "/v2/account"))
            .await
    }

    async fn list_positions(&self) -> Result<Vec<Position>, BrokerError> {
        self.send_json(self.request(Method::GET, "/v2/positions"))
            .await
    }

    async fn get_position(&self, symbol: &str) -> Result<Position, BrokerError> {
        self.send_json(self.request(Method::GET, &format!("/v2/positions/{}", symbol)))
            .await
    }

    async fn close_position(
        &self,
        symbol: &str,
        request: &ClosePositionRequest,
    ) -> Result<Order, BrokerError> {
        let mut params = Vec::new();
        if let Some(qty) = request.qty {
            params.push(("qty", qty.to_string()));
        }
        if let Some(pct) = request.percentage {
            params.push(("percentage", pct.to_string()));
        }
        let req = self
            .request(Method::DELETE, &format!("/v2/positions/{}", symbol))
            .query(&params);
        self.send_json(req).await
    }

    /// # Summary
    /// 查询订单列表。
    ///
    /// # Logic
    /// 1. `status` 始终下发，其余条件仅在提供时下发。
    /// 2. `symbols` 以逗号拼接。
    async fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>, BrokerError> {
        let mut params = vec![("status", query.status.as_str().to_string())];
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(after) = query.after {
            params.push(("after", rfc3339(after)));
        }
        if let Some(until) = query.until {
            params.push(("until", rfc3339(until)));
        }
        if let Some(direction) = query.direction {
            params.push(("direction", direction.as_str().to_string()));
        }
        if !query.symbols.is_empty() {
            params.push(("symbols", query.symbols.join(",")));
        }
        self.send_json(self.request(Method::GET, "/v2/orders").query(&params))
            .await
    }

    async fn get_order(&self, order_id: &str) -> Result<Order, BrokerError> {
        self.send_json(self.request(Method::GET, &format!("/v2/orders/{}", order_id)))
            .await
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<Order, BrokerError> {
        let body = SubmitOrderBody::from(request);
        self.send_json(self.request(Method::POST, "/v2/orders").json(&body))
            .await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        self.send(self.request(Method::DELETE, &format!("/v2/orders/{}", order_id)))
            .await?;
        Ok(())
    }

    async fn list_trades(&self, query: &TradeQuery) -> Result<Vec<TradeActivity>, BrokerError> {
        let mut params = vec![("direction", "desc".to_string())];
        if let Some(date) = query.date {
            params.push(("date", date.format("%Y-%m-%d").to_string()));
        }
        if let Some(after) = query.after {
            params.push(("after", rfc3339(after)));
        }
        if let Some(until) = query.until {
            params.push(("until", rfc3339(until)));
        }
        if let Some(size) = query.page_size {
            params.push(("page_size", size.to_string()));
        }
        let fills: Vec<FillActivity> = self
            .send_json(
                self.request(Method::GET, "/v2/account/activities/FILL")
                    .query(&params),
            )
            .await?;
        Ok(fills.into_iter().map(TradeActivity::from).collect())
    }

    async fn get_clock(&self) -> Result<MarketClock, BrokerError> {
        self.send_json(self.request(Method::GET, "/v2/clock"))
            .await
    }

    async fn get_asset(&self, symbol: &str) -> Result<Option<AssetInfo>, BrokerError> {
        match self
            .send_json(self.request(Method::GET, &format!("/v2/assets/{}", symbol)))
            .await
        {
            Ok(asset) => Ok(Some(asset)),
            Err(BrokerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
