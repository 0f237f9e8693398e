use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{order::OrderType, schedule::MAX_SLICES};

/// Bad caller input. Raised before any exchange call and never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("invalid symbol '{0}': expected at least 3 characters")]
    InvalidSymbol(String),
    #[error("side must be BUY or SELL, got '{0}'")]
    InvalidSide(String),
    #[error("unknown order type '{0}'")]
    InvalidOrderType(String),
    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(f64),
    #[error("{field} must be positive, got {value}")]
    NonPositivePrice { field: &'static str, value: f64 },
    #[error("{field} is required for {order_type} orders")]
    MissingPrice {
        field: &'static str,
        order_type: OrderType,
    },
    #[error("part count must be between 1 and {}, got {0}", MAX_SLICES)]
    PartCount(u32),
    #[error("grid levels must be between 2 and {}, got {0}", MAX_SLICES)]
    LevelCount(u32),
    #[error("lower price {lower} must be below upper price {upper}")]
    InvertedRange { lower: f64, upper: f64 },
    #[error("price step {step} is smaller than one tick at {precision} decimals")]
    StepBelowTick { step: f64, precision: u32 },
    #[error("slice quantity {total}/{parts} rounds to zero at {precision} decimals")]
    SliceRoundsToZero {
        total: f64,
        parts: u32,
        precision: u32,
    },
}

/// Coarse classification of a submission failure, recorded per slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExchangeErrorKind {
    Rejected,
    Transport,
    Decode,
    Unsupported,
}

/// Submission rejected by the venue or lost in transport.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
    #[error("order rejected{}: {message}", code.map(|c| format!(" (code {c})")).unwrap_or_default())]
    Rejected { code: Option<i64>, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("failed to decode exchange response: {0}")]
    Decode(String),
    #[error("unsupported by this exchange: {0}")]
    Unsupported(String),
}

impl ExchangeError {
    pub fn kind(&self) -> ExchangeErrorKind {
        match self {
            ExchangeError::Rejected { .. } => ExchangeErrorKind::Rejected,
            ExchangeError::Transport(_) => ExchangeErrorKind::Transport,
            ExchangeError::Decode(_) => ExchangeErrorKind::Decode,
            ExchangeError::Unsupported(_) => ExchangeErrorKind::Unsupported,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        ExchangeError::Rejected {
            code: None,
            message: message.into(),
        }
    }
}

/// Missing or malformed credentials. Fatal, surfaces before scheduling.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("missing credential {0}")]
    MissingCredential(&'static str),
    #[error("invalid credential {name}: {reason}")]
    InvalidCredential { name: &'static str, reason: String },
}

/// Tagged union over the three failure families so callers can tell
/// pre-flight failures from isolated per-slice ones.
#[derive(Debug, Error)]
pub enum OrderBotError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
