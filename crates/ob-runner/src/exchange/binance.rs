use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::TimeDelta;
use futures::{future::BoxFuture, FutureExt};
use hmac::{Hmac, Mac};
use ob_common::{
    clock_offset, exchange_timestamp_ms, timestamp_ms, ConfigurationError, ExchangeClient,
    ExchangeError, OrderAck, OrderSpec,
};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;
use uuid::Uuid;

use super::{credential, ExchangeConfig};

type HmacSha256 = Hmac<Sha256>;

const ORDER_ENDPOINT: &str = "/fapi/v1/order";
const TIME_ENDPOINT: &str = "/fapi/v1/time";
const RECV_WINDOW_MS: &str = "5000";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTime {
    server_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    status: String,
}

/// USDⓈ-M futures REST client. Requests are HMAC-SHA256 signed and
/// timestamped on the server clock measured by [`ExchangeClient::clock_offset`].
pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
    api_secret: String,
    offset_ms: AtomicI64,
}

impl BinanceClient {
    pub(super) fn credentials(
        config: &ExchangeConfig,
    ) -> Result<(&str, &str), ConfigurationError> {
        let api_key = credential(config.api_key.as_deref(), "API_KEY")?;
        let api_secret = credential(config.api_secret.as_deref(), "API_SECRET")?;
        Ok((api_key, api_secret))
    }

    pub fn connect(config: &ExchangeConfig) -> Result<Self> {
        let (api_key, api_secret) = Self::credentials(config)?;

        let mut headers = HeaderMap::new();
        let key_header =
            HeaderValue::from_str(api_key).map_err(|e| ConfigurationError::InvalidCredential {
                name: "API_KEY",
                reason: e.to_string(),
            })?;
        headers.insert("X-MBX-APIKEY", key_header);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            base_url: config.network.binance_base_url().to_string(),
            api_secret: api_secret.to_string(),
            offset_ms: AtomicI64::new(0),
        })
    }

    async fn fetch_offset(&self) -> Result<TimeDelta, ExchangeError> {
        let url = format!("{}{}", self.base_url, TIME_ENDPOINT);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        let body = read_body(response).await?;
        let server: ServerTime =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(e.to_string()))?;

        let offset = clock_offset(server.server_time, timestamp_ms());
        self.offset_ms
            .store(offset.num_milliseconds(), Ordering::Relaxed);
        Ok(offset)
    }

    async fn place(&self, spec: &OrderSpec) -> Result<OrderAck, ExchangeError> {
        let offset = TimeDelta::milliseconds(self.offset_ms.load(Ordering::Relaxed));
        let timestamp = exchange_timestamp_ms(timestamp_ms(), offset);
        let client_order_id = Uuid::new_v4().simple().to_string();

        let query = encode_query(&order_params(spec, &client_order_id, timestamp));
        let signature = sign(&self.api_secret, &query)?;
        debug!(
            symbol = %spec.symbol,
            client_order_id = %client_order_id,
            "POST {ORDER_ENDPOINT}?{query}"
        );

        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, ORDER_ENDPOINT, query, signature
        );
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        let body = read_body(response).await?;

        let order: OrderResponse =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(e.to_string()))?;
        Ok(OrderAck {
            order_id: order.order_id.to_string(),
            status: order.status,
        })
    }
}

impl ExchangeClient for BinanceClient {
    fn name(&self) -> &'static str {
        "binance"
    }

    fn clock_offset(&self) -> BoxFuture<'_, Result<TimeDelta, ExchangeError>> {
        self.fetch_offset().boxed()
    }

    fn submit_order<'a>(
        &'a self,
        spec: &'a OrderSpec,
    ) -> BoxFuture<'a, Result<OrderAck, ExchangeError>> {
        self.place(spec).boxed()
    }
}

async fn read_body(response: reqwest::Response) -> Result<String, ExchangeError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ExchangeError::Transport(e.to_string()))?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(parse_error(status.as_u16(), &body))
    }
}

fn parse_error(status: u16, body: &str) -> ExchangeError {
    if let Ok(error) = serde_json::from_str::<ApiError>(body) {
        return ExchangeError::Rejected {
            code: Some(error.code),
            message: error.msg,
        };
    }
    if status >= 500 {
        ExchangeError::Transport(format!("http {status}: {body}"))
    } else {
        ExchangeError::Rejected {
            code: None,
            message: format!("http {status}: {body}"),
        }
    }
}

fn order_params(
    spec: &OrderSpec,
    client_order_id: &str,
    timestamp: i64,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("symbol", spec.symbol.clone()),
        ("side", spec.side.as_str().to_string()),
        ("type", spec.order_type.as_str().to_string()),
        ("quantity", spec.quantity.to_string()),
    ];
    if let Some(price) = spec.price {
        params.push(("price", price.to_string()));
    }
    if let Some(stop_price) = spec.stop_price {
        params.push(("stopPrice", stop_price.to_string()));
    }
    if let Some(tif) = spec.time_in_force {
        params.push(("timeInForce", tif.as_str().to_string()));
    }
    params.push(("newClientOrderId", client_order_id.to_string()));
    params.push(("timestamp", timestamp.to_string()));
    params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
    params
}

// Values are symbols, enums, decimals and hex ids; none need escaping.
fn encode_query(params: &[(&'static str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn sign(secret: &str, payload: &str) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Unsupported(format!("invalid signing key: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
