use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use ethers::signers::{LocalWallet, Signer};
use futures::{future::BoxFuture, FutureExt};
use hyperliquid_rust_sdk::{
    ClientLimit, ClientOrder, ClientOrderRequest, ClientTrigger,
    ExchangeClient as SdkExchangeClient, ExchangeDataStatus, ExchangeResponseStatus, InfoClient,
};
use ob_common::{
    ConfigurationError, ExchangeClient, ExchangeError, OrderAck, OrderSpec, OrderType, TimeInForce,
};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{credential, ExchangeConfig};

const QUOTE_SUFFIXES: [&str; 2] = ["USDT", "USDC"];
const PRICE_SIG_FIGS: i32 = 5;

/// Hyperliquid perps through the official SDK. Market and stop-market orders
/// are sent as aggressive limits bounded by the configured slippage.
pub struct HyperliquidClient {
    exchange: SdkExchangeClient,
    info: Mutex<InfoClient>,
    slippage: f64,
}

impl HyperliquidClient {
    pub(super) fn wallet(config: &ExchangeConfig) -> Result<LocalWallet, ConfigurationError> {
        let private_key = credential(config.private_key.as_deref(), "HL_PRIVATE_KEY")?;
        LocalWallet::from_str(private_key).map_err(|e| ConfigurationError::InvalidCredential {
            name: "HL_PRIVATE_KEY",
            reason: e.to_string(),
        })
    }

    pub async fn connect(config: &ExchangeConfig) -> Result<Self> {
        let wallet = Self::wallet(config)?;
        info!("trading wallet 0x{:x}", wallet.address());

        let base_url = config.network.hyperliquid_base_url();
        let exchange = SdkExchangeClient::new(None, wallet, Some(base_url), None, None)
            .await
            .context("failed to initialise exchange client")?;
        let info = InfoClient::new(None, Some(base_url))
            .await
            .context("failed to initialise info client")?;

        Ok(Self {
            exchange,
            info: Mutex::new(info),
            slippage: config.slippage,
        })
    }

    async fn mid_price(&self, coin: &str) -> Result<f64, ExchangeError> {
        let mids = self
            .info
            .lock()
            .await
            .all_mids()
            .await
            .map_err(|e| ExchangeError::Transport(format!("failed to fetch all mids: {e}")))?;
        mids.get(coin)
            .and_then(|px| px.parse::<f64>().ok())
            .ok_or_else(|| ExchangeError::rejected(format!("mid price unavailable for {coin}")))
    }

    async fn place(&self, spec: &OrderSpec) -> Result<OrderAck, ExchangeError> {
        let coin = coin_for_symbol(&spec.symbol);
        let is_buy = spec.side.is_buy();

        let (limit_px, order_type) = match spec.order_type {
            OrderType::Limit => (
                required(spec.price, "price")?,
                ClientOrder::Limit(ClientLimit {
                    tif: sdk_tif(spec.time_in_force.unwrap_or_default())?.to_string(),
                }),
            ),
            OrderType::Market => {
                let mid = self.mid_price(&coin).await?;
                (
                    slippage_price(mid, is_buy, self.slippage),
                    ClientOrder::Limit(ClientLimit {
                        tif: "Ioc".to_string(),
                    }),
                )
            }
            OrderType::Stop => {
                let trigger_px = required(spec.stop_price, "stopPrice")?;
                (
                    required(spec.price, "price")?,
                    ClientOrder::Trigger(ClientTrigger {
                        is_market: false,
                        trigger_px,
                        tpsl: "sl".to_string(),
                    }),
                )
            }
            OrderType::StopMarket => {
                let trigger_px = required(spec.stop_price, "stopPrice")?;
                (
                    slippage_price(trigger_px, is_buy, self.slippage),
                    ClientOrder::Trigger(ClientTrigger {
                        is_market: true,
                        trigger_px,
                        tpsl: "sl".to_string(),
                    }),
                )
            }
        };

        let cloid = Uuid::new_v4();
        let request = ClientOrderRequest {
            asset: coin,
            is_buy,
            reduce_only: false,
            limit_px,
            sz: spec.quantity,
            cloid: Some(cloid),
            order_type,
        };

        let status = self
            .exchange
            .bulk_order(vec![request], None)
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        debug!(response = ?status, "order response");

        match status {
            ExchangeResponseStatus::Ok(resp) => {
                let statuses = resp.data.map(|data| data.statuses).unwrap_or_default();
                let first = statuses
                    .first()
                    .ok_or_else(|| ExchangeError::Decode("empty status list".to_string()))?;
                ack_from_status(first, &cloid)
            }
            ExchangeResponseStatus::Err(message) => Err(ExchangeError::rejected(message)),
        }
    }
}

impl ExchangeClient for HyperliquidClient {
    fn name(&self) -> &'static str {
        "hyperliquid"
    }

    // Actions are nonced on local time; there is no server clock to track.
    fn clock_offset(&self) -> BoxFuture<'_, Result<TimeDelta, ExchangeError>> {
        async { Ok(TimeDelta::zero()) }.boxed()
    }

    fn submit_order<'a>(
        &'a self,
        spec: &'a OrderSpec,
    ) -> BoxFuture<'a, Result<OrderAck, ExchangeError>> {
        self.place(spec).boxed()
    }
}

/// `BTCUSDT` -> `BTC`. Symbols without a known quote suffix pass through.
fn coin_for_symbol(symbol: &str) -> String {
    QUOTE_SUFFIXES
        .iter()
        .find_map(|suffix| symbol.strip_suffix(suffix))
        .filter(|coin| !coin.is_empty())
        .unwrap_or(symbol)
        .to_string()
}

fn sdk_tif(tif: TimeInForce) -> Result<&'static str, ExchangeError> {
    match tif {
        TimeInForce::Gtc => Ok("Gtc"),
        TimeInForce::Ioc => Ok("Ioc"),
        TimeInForce::Gtx => Ok("Alo"),
        TimeInForce::Fok => Err(ExchangeError::Unsupported(
            "FOK time in force".to_string(),
        )),
    }
}

fn required(value: Option<f64>, field: &str) -> Result<f64, ExchangeError> {
    value.ok_or_else(|| ExchangeError::Unsupported(format!("order without {field}")))
}

/// Worst acceptable price for an aggressive order, rounded to the venue's
/// significant-figure limit.
fn slippage_price(reference: f64, is_buy: bool, slippage: f64) -> f64 {
    let px = if is_buy {
        reference * (1.0 + slippage)
    } else {
        reference * (1.0 - slippage)
    };
    round_sig_figs(px, PRICE_SIG_FIGS)
}

fn round_sig_figs(value: f64, figs: i32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let factor = 10f64.powi(figs - 1 - magnitude);
    (value * factor).round() / factor
}

fn ack_from_status(status: &ExchangeDataStatus, cloid: &Uuid) -> Result<OrderAck, ExchangeError> {
    let (order_id, status) = match status {
        ExchangeDataStatus::Resting(order) => (order.oid.to_string(), "NEW"),
        ExchangeDataStatus::Filled(filled) => (filled.oid.to_string(), "FILLED"),
        ExchangeDataStatus::WaitingForTrigger => (cloid.to_string(), "WAITING_FOR_TRIGGER"),
        ExchangeDataStatus::WaitingForFill => (cloid.to_string(), "WAITING_FOR_FILL"),
        ExchangeDataStatus::Success => (cloid.to_string(), "SUCCESS"),
        ExchangeDataStatus::Error(message) => return Err(ExchangeError::rejected(message.clone())),
    };
    Ok(OrderAck {
        order_id,
        status: status.to_string(),
    })
}
