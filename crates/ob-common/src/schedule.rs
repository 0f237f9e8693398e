use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::ValidationError,
    order::{build_order, OrderParams, OrderSide, OrderSpec, OrderType, TimeInForce},
};

pub const DEFAULT_QUANTITY_PRECISION: u32 = 8;
pub const DEFAULT_PRICE_PRECISION: u32 = 2;
/// Upper bound on TWAP parts and grid levels.
pub const MAX_SLICES: u32 = 10_000;

/// Decimal places used when rounding slice quantities and ladder prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Precision {
    pub quantity: u32,
    pub price: u32,
}

impl Default for Precision {
    fn default() -> Self {
        Self {
            quantity: DEFAULT_QUANTITY_PRECISION,
            price: DEFAULT_PRICE_PRECISION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Market,
    Limit,
    StopLimit,
    Oco,
    Twap,
    Grid,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Market => "market",
            StrategyKind::Limit => "limit",
            StrategyKind::StopLimit => "stop_limit",
            StrategyKind::Oco => "oco",
            StrategyKind::Twap => "twap",
            StrategyKind::Grid => "grid",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSlice {
    pub spec: OrderSpec,
    #[serde(rename = "delayMs", serialize_with = "serialize_duration_ms")]
    pub delay_before_submit: Duration,
}

/// Ordered, immutable sequence of slices produced once per strategy
/// invocation and consumed by the runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlicePlan {
    strategy: StrategyKind,
    slices: Vec<PlannedSlice>,
}

impl SlicePlan {
    fn new(strategy: StrategyKind, slices: Vec<PlannedSlice>) -> Self {
        Self { strategy, slices }
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn slices(&self) -> &[PlannedSlice] {
        &self.slices
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn total_quantity(&self) -> f64 {
        self.slices.iter().map(|slice| slice.spec.quantity).sum()
    }

    pub fn as_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn serialize_duration_ms<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSlicedParams {
    pub symbol: String,
    pub side: OrderSide,
    pub total_quantity: f64,
    pub parts: u32,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LadderParams {
    pub symbol: String,
    pub lower_price: f64,
    pub upper_price: f64,
    pub levels: u32,
    pub quantity_per_level: f64,
}

/// Take-profit / stop-loss pair placed as two independent orders.
#[derive(Debug, Clone, PartialEq)]
pub struct BracketParams {
    pub symbol: String,
    /// Side that closes the position (SELL exits a long).
    pub side: OrderSide,
    pub quantity: f64,
    pub take_profit_price: f64,
    pub stop_price: f64,
}

/// Splits `total_quantity` into `parts` MARKET slices paced `interval` apart.
///
/// Every slice but the last gets the per-part quantity floored to
/// `precision.quantity` decimals; the last slice absorbs the remainder so the
/// plan sums to the requested total at that precision.
pub fn time_sliced(
    params: &TimeSlicedParams,
    precision: Precision,
) -> Result<SlicePlan, ValidationError> {
    if !(1..=MAX_SLICES).contains(&params.parts) {
        return Err(ValidationError::PartCount(params.parts));
    }
    let total = params.total_quantity;
    if !(total.is_finite() && total > 0.0) {
        return Err(ValidationError::NonPositiveQuantity(total));
    }

    let parts = params.parts;
    let per_part = floor_to(total / f64::from(parts), precision.quantity);
    if per_part <= 0.0 {
        return Err(ValidationError::SliceRoundsToZero {
            total,
            parts,
            precision: precision.quantity,
        });
    }
    let last_part = round_to(
        total - per_part * f64::from(parts - 1),
        precision.quantity,
    );

    let mut slices = Vec::with_capacity(parts as usize);
    for idx in 0..parts {
        let quantity = if idx + 1 == parts { last_part } else { per_part };
        let spec = build_order(OrderParams::new(
            &params.symbol,
            params.side,
            OrderType::Market,
            quantity,
        ))?;
        let delay_before_submit = if idx == 0 {
            Duration::ZERO
        } else {
            params.interval
        };
        slices.push(PlannedSlice {
            spec,
            delay_before_submit,
        });
    }

    Ok(SlicePlan::new(StrategyKind::Twap, slices))
}

/// Builds a grid of LIMIT orders evenly spaced between the two bounds.
///
/// The lowest `levels / 2` levels are BUY, the remainder SELL (the middle level
/// of an odd grid sells). Prices are rounded to `precision.price` decimals and
/// the top level is pinned to `upper_price`.
pub fn ladder(params: &LadderParams, precision: Precision) -> Result<SlicePlan, ValidationError> {
    if !(2..=MAX_SLICES).contains(&params.levels) {
        return Err(ValidationError::LevelCount(params.levels));
    }
    let (lower, upper) = (params.lower_price, params.upper_price);
    if !(lower < upper) {
        return Err(ValidationError::InvertedRange { lower, upper });
    }

    let levels = params.levels;
    let step = (upper - lower) / f64::from(levels - 1);
    let tick = 1.0 / scale(precision.price);
    if step < tick {
        return Err(ValidationError::StepBelowTick {
            step,
            precision: precision.price,
        });
    }

    let buy_levels = levels / 2;
    let mut slices: Vec<PlannedSlice> = Vec::with_capacity(levels as usize);
    for idx in 0..levels {
        let raw = if idx + 1 == levels {
            upper
        } else {
            lower + f64::from(idx) * step
        };
        let price = round_to(raw, precision.price);
        if let Some(prev) = slices.last().and_then(|slice| slice.spec.price) {
            if price <= prev {
                return Err(ValidationError::StepBelowTick {
                    step,
                    precision: precision.price,
                });
            }
        }
        let side = if idx < buy_levels {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        let spec = build_order(
            OrderParams::new(
                &params.symbol,
                side,
                OrderType::Limit,
                params.quantity_per_level,
            )
            .price(price)
            .time_in_force(TimeInForce::Gtc),
        )?;
        slices.push(PlannedSlice {
            spec,
            delay_before_submit: Duration::ZERO,
        });
    }

    Ok(SlicePlan::new(StrategyKind::Grid, slices))
}

/// One-slice plan for a plain market, limit or stop-limit order.
pub fn single(spec: OrderSpec) -> SlicePlan {
    let strategy = match spec.order_type {
        OrderType::Market => StrategyKind::Market,
        OrderType::Limit => StrategyKind::Limit,
        OrderType::Stop | OrderType::StopMarket => StrategyKind::StopLimit,
    };
    SlicePlan::new(
        strategy,
        vec![PlannedSlice {
            spec,
            delay_before_submit: Duration::ZERO,
        }],
    )
}

/// OCO-style pair: a LIMIT take-profit followed by a STOP_MARKET stop-loss.
///
/// The exchange does not link the two legs; whichever fills first leaves the
/// other resting.
pub fn bracket(params: &BracketParams) -> Result<SlicePlan, ValidationError> {
    let (tp, stop) = (params.take_profit_price, params.stop_price);
    // Exiting a long sells above the stop; exiting a short buys below it.
    let ordered = match params.side {
        OrderSide::Sell => stop < tp,
        OrderSide::Buy => tp < stop,
    };
    if !ordered && tp.is_finite() && stop.is_finite() && tp > 0.0 && stop > 0.0 {
        return Err(ValidationError::InvertedRange {
            lower: tp.min(stop),
            upper: tp.max(stop),
        });
    }

    let take_profit = build_order(
        OrderParams::new(&params.symbol, params.side, OrderType::Limit, params.quantity)
            .price(tp)
            .time_in_force(TimeInForce::Gtc),
    )?;
    let stop_loss = build_order(
        OrderParams::new(
            &params.symbol,
            params.side,
            OrderType::StopMarket,
            params.quantity,
        )
        .stop_price(stop),
    )?;

    Ok(SlicePlan::new(
        StrategyKind::Oco,
        vec![
            PlannedSlice {
                spec: take_profit,
                delay_before_submit: Duration::ZERO,
            },
            PlannedSlice {
                spec: stop_loss,
                delay_before_submit: Duration::ZERO,
            },
        ],
    ))
}

fn scale(precision: u32) -> f64 {
    10f64.powi(precision as i32)
}

/// Rounds half away from zero at `precision` decimals.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let scale = scale(precision);
    (value * scale).round() / scale
}

/// Floors at `precision` decimals, tolerating representation error just
/// below an exact boundary (0.3 / 3 floors to 0.1, not 0.09999999).
pub fn floor_to(value: f64, precision: u32) -> f64 {
    let scale = scale(precision);
    (value * scale + 1e-6).floor() / scale
}
