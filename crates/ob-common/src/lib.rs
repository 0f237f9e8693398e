pub mod artifacts;
pub mod error;
pub mod order;
pub mod runner;
pub mod schedule;
pub mod strategy;
pub mod time;

pub use artifacts::{RoutedOrderRecord, RunArtifacts, SliceLogRecord};
pub use error::{
    ConfigurationError, ExchangeError, ExchangeErrorKind, OrderBotError, ValidationError,
};
pub use order::{build_order, OrderParams, OrderSide, OrderSpec, OrderType, TimeInForce};
pub use runner::{
    CancelSignal, ExchangeClient, OrderAck, SliceOutcome, SliceResult, StrategyReport,
    StrategyRunner,
};
pub use schedule::{
    bracket, ladder, single, time_sliced, BracketParams, LadderParams, PlannedSlice, Precision,
    SlicePlan, StrategyKind, TimeSlicedParams,
};
pub use strategy::{load_strategy_from_spec, StrategySpec};
pub use time::{clock_offset, exchange_timestamp_ms, timestamp_ms};
