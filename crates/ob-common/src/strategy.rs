use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    error::ValidationError,
    order::{build_order, OrderParams, OrderSide, OrderType, TimeInForce},
    schedule::{
        bracket, ladder, single, time_sliced, BracketParams, LadderParams, Precision, SlicePlan,
        TimeSlicedParams,
    },
};

/// A strategy invocation, as parsed from the command line or a strategy file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategySpec {
    Market(MarketStrategy),
    Limit(LimitStrategy),
    StopLimit(StopLimitStrategy),
    Oco(OcoStrategy),
    Twap(TwapStrategy),
    Grid(GridStrategy),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketStrategy {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitStrategy {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tif: Option<TimeInForce>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopLimitStrategy {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub stop_price: f64,
    pub limit_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcoStrategy {
    pub symbol: String,
    #[serde(default = "default_exit_side")]
    pub side: OrderSide,
    pub quantity: f64,
    pub take_profit_price: f64,
    pub stop_price: f64,
}

fn default_exit_side() -> OrderSide {
    OrderSide::Sell
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwapStrategy {
    pub symbol: String,
    pub side: OrderSide,
    pub total_quantity: f64,
    pub parts: u32,
    #[serde(alias = "interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridStrategy {
    pub symbol: String,
    pub lower_price: f64,
    pub upper_price: f64,
    pub levels: u32,
    pub quantity_per_level: f64,
}

impl StrategySpec {
    /// Validates the parameters and computes the slice plan.
    pub fn plan(&self, precision: Precision) -> Result<SlicePlan, ValidationError> {
        match self {
            StrategySpec::Market(s) => {
                let spec = build_order(OrderParams::new(
                    &s.symbol,
                    s.side,
                    OrderType::Market,
                    s.quantity,
                ))?;
                Ok(single(spec))
            }
            StrategySpec::Limit(s) => {
                let mut params =
                    OrderParams::new(&s.symbol, s.side, OrderType::Limit, s.quantity).price(s.price);
                if let Some(tif) = s.tif {
                    params = params.time_in_force(tif);
                }
                Ok(single(build_order(params)?))
            }
            StrategySpec::StopLimit(s) => {
                let spec = build_order(
                    OrderParams::new(&s.symbol, s.side, OrderType::Stop, s.quantity)
                        .stop_price(s.stop_price)
                        .price(s.limit_price),
                )?;
                Ok(single(spec))
            }
            StrategySpec::Oco(s) => bracket(&BracketParams {
                symbol: s.symbol.clone(),
                side: s.side,
                quantity: s.quantity,
                take_profit_price: s.take_profit_price,
                stop_price: s.stop_price,
            }),
            StrategySpec::Twap(s) => time_sliced(
                &TimeSlicedParams {
                    symbol: s.symbol.clone(),
                    side: s.side,
                    total_quantity: s.total_quantity,
                    parts: s.parts,
                    interval: Duration::from_secs(s.interval_secs),
                },
                precision,
            ),
            StrategySpec::Grid(s) => ladder(
                &LadderParams {
                    symbol: s.symbol.clone(),
                    lower_price: s.lower_price,
                    upper_price: s.upper_price,
                    levels: s.levels,
                    quantity_per_level: s.quantity_per_level,
                },
                precision,
            ),
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            StrategySpec::Market(s) => &s.symbol,
            StrategySpec::Limit(s) => &s.symbol,
            StrategySpec::StopLimit(s) => &s.symbol,
            StrategySpec::Oco(s) => &s.symbol,
            StrategySpec::Twap(s) => &s.symbol,
            StrategySpec::Grid(s) => &s.symbol,
        }
    }
}

/// Loads a strategy from a JSON file, or from one line of a JSONL file when
/// the path ends in `:<line>` (1-based).
pub fn load_strategy_from_spec(spec: &str) -> Result<StrategySpec> {
    let (path, selector) = split_spec(spec);
    let source = if let Some(index) = selector {
        read_jsonl_entry(&path, index)?
    } else {
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read strategy file {}", path.display()))?
    };

    let strategy: StrategySpec = serde_json::from_str(&source)
        .with_context(|| format!("failed to deserialize strategy from {}", path.display()))?;
    Ok(strategy)
}

fn read_jsonl_entry(path: &Path, index: usize) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("failed to open strategy jsonl {}", path.display()))?;
    let reader = BufReader::new(file);
    for (idx, line) in reader.lines().enumerate() {
        let idx = idx + 1; // 1-based for humans
        let content =
            line.with_context(|| format!("failed to read line {idx} from {}", path.display()))?;
        if idx == index && !content.trim().is_empty() {
            return Ok(content);
        }
    }
    Err(anyhow!("line {} not found in {}", index, path.display()))
}

fn split_spec(spec: &str) -> (PathBuf, Option<usize>) {
    if let Some((prefix, trailing)) = spec.rsplit_once(':') {
        if let Ok(index) = usize::from_str(trailing) {
            return (PathBuf::from(prefix), Some(index));
        }
    }
    (PathBuf::from(spec), None)
}
