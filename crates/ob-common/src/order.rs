use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

const MIN_SYMBOL_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, OrderSide::Buy)
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            _ => Err(ValidationError::InvalidSide(s.to_string())),
        }
    }
}

impl Serialize for OrderSide {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderSide {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    /// Stop-limit: rests as a limit at `price` once `stop_price` trades.
    Stop,
    StopMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::Stop => "STOP",
            OrderType::StopMarket => "STOP_MARKET",
        }
    }

    pub fn requires_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::Stop)
    }

    pub fn requires_stop_price(&self) -> bool {
        matches!(self, OrderType::Stop | OrderType::StopMarket)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            "STOP" | "STOP_LIMIT" => Ok(OrderType::Stop),
            "STOP_MARKET" => Ok(OrderType::StopMarket),
            _ => Err(ValidationError::InvalidOrderType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    #[default]
    #[serde(alias = "Gtc", alias = "gtc")]
    Gtc,
    #[serde(alias = "Ioc", alias = "ioc")]
    Ioc,
    #[serde(alias = "Fok", alias = "fok")]
    Fok,
    /// Post-only.
    #[serde(alias = "Gtx", alias = "gtx")]
    Gtx,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
            TimeInForce::Gtx => "GTX",
        }
    }
}

/// Normalized, validated order request handed to an exchange client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSpec {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
}

/// Raw inputs for [`build_order`].
#[derive(Debug, Clone, Copy)]
pub struct OrderParams<'a> {
    pub symbol: &'a str,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub time_in_force: Option<TimeInForce>,
}

impl<'a> OrderParams<'a> {
    pub fn new(symbol: &'a str, side: OrderSide, order_type: OrderType, quantity: f64) -> Self {
        Self {
            symbol,
            side,
            order_type,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: None,
        }
    }

    pub fn price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn stop_price(mut self, stop_price: f64) -> Self {
        self.stop_price = Some(stop_price);
        self
    }

    pub fn time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = Some(tif);
        self
    }
}

/// Validates and normalizes order parameters. Pure: no I/O.
///
/// The symbol is trimmed and upper-cased. Price fields the order type does not
/// use are dropped, and resting types (LIMIT, STOP) default to GTC.
pub fn build_order(params: OrderParams<'_>) -> Result<OrderSpec, ValidationError> {
    let symbol = params.symbol.trim();
    if symbol.chars().count() < MIN_SYMBOL_LEN {
        return Err(ValidationError::InvalidSymbol(params.symbol.to_string()));
    }
    if !(params.quantity.is_finite() && params.quantity > 0.0) {
        return Err(ValidationError::NonPositiveQuantity(params.quantity));
    }

    let order_type = params.order_type;
    let price = if order_type.requires_price() {
        Some(require_positive("price", params.price, order_type)?)
    } else {
        None
    };
    let stop_price = if order_type.requires_stop_price() {
        Some(require_positive("stopPrice", params.stop_price, order_type)?)
    } else {
        None
    };

    let time_in_force = if order_type.requires_price() {
        Some(params.time_in_force.unwrap_or_default())
    } else {
        None
    };

    Ok(OrderSpec {
        symbol: symbol.to_ascii_uppercase(),
        side: params.side,
        order_type,
        quantity: params.quantity,
        price,
        stop_price,
        time_in_force,
    })
}

fn require_positive(
    field: &'static str,
    value: Option<f64>,
    order_type: OrderType,
) -> Result<f64, ValidationError> {
    let value = value.ok_or(ValidationError::MissingPrice { field, order_type })?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ValidationError::NonPositivePrice { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_parses_case_insensitively() {
        assert_eq!("buy".parse::<OrderSide>().unwrap(), OrderSide::Buy);
        assert_eq!(" SELL ".parse::<OrderSide>().unwrap(), OrderSide::Sell);
        assert_eq!(
            "hold".parse::<OrderSide>().unwrap_err(),
            ValidationError::InvalidSide("hold".to_string())
        );
    }

    #[test]
    fn order_type_accepts_aliases() {
        assert_eq!("stop-limit".parse::<OrderType>().unwrap(), OrderType::Stop);
        assert_eq!(
            "stop_market".parse::<OrderType>().unwrap(),
            OrderType::StopMarket
        );
        assert!("trailing".parse::<OrderType>().is_err());
    }

    #[test]
    fn limit_order_normalizes_symbol_and_tif() {
        let spec = build_order(
            OrderParams::new(" btcusdt ", OrderSide::Buy, OrderType::Limit, 0.01).price(60_000.0),
        )
        .unwrap();
        assert_eq!(spec.symbol, "BTCUSDT");
        assert_eq!(spec.price, Some(60_000.0));
        assert_eq!(spec.time_in_force, Some(TimeInForce::Gtc));
        assert_eq!(spec.stop_price, None);
    }

    #[test]
    fn market_order_drops_unused_prices() {
        let spec = build_order(
            OrderParams::new("ETHUSDT", OrderSide::Sell, OrderType::Market, 1.5)
                .price(3_000.0)
                .stop_price(2_900.0),
        )
        .unwrap();
        assert_eq!(spec.price, None);
        assert_eq!(spec.stop_price, None);
        assert_eq!(spec.time_in_force, None);
    }

    #[test]
    fn negative_quantity_is_rejected() {
        let err = build_order(OrderParams::new(
            "BTCUSDT",
            OrderSide::Buy,
            OrderType::Market,
            -1.0,
        ))
        .unwrap_err();
        assert_eq!(err, ValidationError::NonPositiveQuantity(-1.0));

        let err = build_order(OrderParams::new(
            "BTCUSDT",
            OrderSide::Buy,
            OrderType::Market,
            f64::NAN,
        ))
        .unwrap_err();
        assert!(matches!(err, ValidationError::NonPositiveQuantity(_)));
    }

    #[test]
    fn short_symbol_is_rejected() {
        let err = build_order(OrderParams::new("BT", OrderSide::Buy, OrderType::Market, 1.0))
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidSymbol("BT".to_string()));
    }

    #[test]
    fn stop_orders_require_their_prices() {
        let err = build_order(
            OrderParams::new("BTCUSDT", OrderSide::Buy, OrderType::Stop, 0.01).price(59_100.0),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingPrice {
                field: "stopPrice",
                order_type: OrderType::Stop,
            }
        );

        let err = build_order(
            OrderParams::new("BTCUSDT", OrderSide::Sell, OrderType::StopMarket, 0.01)
                .stop_price(0.0),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::NonPositivePrice {
                field: "stopPrice",
                value: 0.0,
            }
        );

        let spec = build_order(
            OrderParams::new("BTCUSDT", OrderSide::Buy, OrderType::Stop, 0.01)
                .stop_price(59_000.0)
                .price(59_100.0),
        )
        .unwrap();
        assert_eq!(spec.stop_price, Some(59_000.0));
        assert_eq!(spec.time_in_force, Some(TimeInForce::Gtc));
    }

    #[test]
    fn spec_serializes_with_exchange_field_names() {
        let spec = build_order(
            OrderParams::new("BTCUSDT", OrderSide::Sell, OrderType::StopMarket, 0.01)
                .stop_price(58_000.0),
        )
        .unwrap();
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["type"], "STOP_MARKET");
        assert_eq!(value["side"], "SELL");
        assert_eq!(value["stopPrice"], 58_000.0);
        assert!(value.get("price").is_none());
    }
}
