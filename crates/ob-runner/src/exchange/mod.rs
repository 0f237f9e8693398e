mod binance;
mod demo;
mod hyperliquid;

use anyhow::Result;
use clap::ValueEnum;
use hyperliquid_rust_sdk::BaseUrl;
use ob_common::{ConfigurationError, ExchangeClient};

pub use binance::BinanceClient;
pub use demo::DemoClient;
pub use hyperliquid::HyperliquidClient;

/// Default worst-price tolerance for orders the venue can only express as
/// aggressive limits.
pub const DEFAULT_SLIPPAGE: f64 = 0.05;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ExchangeKind {
    Binance,
    Hyperliquid,
    /// Local paper backend, no network.
    Demo,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Binance => "binance",
            ExchangeKind::Hyperliquid => "hyperliquid",
            ExchangeKind::Demo => "demo",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn binance_base_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://fapi.binance.com",
            Network::Testnet => "https://testnet.binancefuture.com",
        }
    }

    pub fn hyperliquid_base_url(&self) -> BaseUrl {
        match self {
            Network::Mainnet => BaseUrl::Mainnet,
            Network::Testnet => BaseUrl::Testnet,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

/// Everything a backend needs to open a session. Built once from the command
/// line and environment, then handed to [`connect`].
#[derive(Clone, Debug)]
pub struct ExchangeConfig {
    pub kind: ExchangeKind,
    pub network: Network,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub private_key: Option<String>,
    pub slippage: f64,
}

impl ExchangeConfig {
    /// Checks the credentials the selected backend needs, without touching
    /// the network.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self.kind {
            ExchangeKind::Binance => BinanceClient::credentials(self).map(|_| ()),
            ExchangeKind::Hyperliquid => HyperliquidClient::wallet(self).map(|_| ()),
            ExchangeKind::Demo => Ok(()),
        }
    }
}

fn credential<'a>(
    value: Option<&'a str>,
    name: &'static str,
) -> Result<&'a str, ConfigurationError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ConfigurationError::MissingCredential(name))
}

pub async fn connect(config: &ExchangeConfig) -> Result<Box<dyn ExchangeClient>> {
    let client: Box<dyn ExchangeClient> = match config.kind {
        ExchangeKind::Binance => Box::new(BinanceClient::connect(config)?),
        ExchangeKind::Hyperliquid => Box::new(HyperliquidClient::connect(config).await?),
        ExchangeKind::Demo => Box::new(DemoClient::new()),
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use ob_common::ConfigurationError;

    use super::*;

    fn config(kind: ExchangeKind) -> ExchangeConfig {
        ExchangeConfig {
            kind,
            network: Network::Testnet,
            api_key: None,
            api_secret: None,
            private_key: None,
            slippage: DEFAULT_SLIPPAGE,
        }
    }

    #[tokio::test]
    async fn demo_needs_no_credentials() {
        let client = connect(&config(ExchangeKind::Demo)).await.unwrap();
        assert_eq!(client.name(), "demo");
    }

    #[tokio::test]
    async fn binance_without_key_is_a_configuration_error() {
        let err = match connect(&config(ExchangeKind::Binance)).await {
            Ok(_) => panic!("expected missing credential"),
            Err(err) => err,
        };
        assert_eq!(
            err.downcast_ref::<ConfigurationError>(),
            Some(&ConfigurationError::MissingCredential("API_KEY"))
        );
    }

    #[tokio::test]
    async fn hyperliquid_rejects_malformed_key() {
        let mut cfg = config(ExchangeKind::Hyperliquid);
        cfg.private_key = Some("not-a-key".to_string());
        let err = match connect(&cfg).await {
            Ok(_) => panic!("expected invalid credential"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::InvalidCredential {
                name: "HL_PRIVATE_KEY",
                ..
            })
        ));
    }

    #[test]
    fn validate_checks_credentials_per_backend() {
        assert_eq!(config(ExchangeKind::Demo).validate(), Ok(()));

        let mut binance = config(ExchangeKind::Binance);
        binance.api_key = Some("key".to_string());
        binance.api_secret = Some("   ".to_string());
        assert_eq!(
            binance.validate(),
            Err(ConfigurationError::MissingCredential("API_SECRET"))
        );
        binance.api_secret = Some("secret".to_string());
        assert_eq!(binance.validate(), Ok(()));

        assert_eq!(
            config(ExchangeKind::Hyperliquid).validate(),
            Err(ConfigurationError::MissingCredential("HL_PRIVATE_KEY"))
        );
        let mut hyperliquid = config(ExchangeKind::Hyperliquid);
        hyperliquid.private_key = Some(
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318".to_string(),
        );
        assert_eq!(hyperliquid.validate(), Ok(()));
    }

    #[test]
    fn testnet_urls() {
        assert_eq!(
            Network::Testnet.binance_base_url(),
            "https://testnet.binancefuture.com"
        );
        assert_eq!(Network::Mainnet.as_str(), "mainnet");
    }
}
