use chrono::{TimeDelta, Utc};

/// Margin subtracted from corrected timestamps so a request never lands
/// ahead of the exchange clock.
pub const TIMESTAMP_SAFETY_MARGIN_MS: i64 = 1_000;

/// Returns the current unix timestamp in milliseconds.
pub fn timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Local time shifted onto the exchange clock, minus the safety margin.
pub fn exchange_timestamp_ms(local_ms: i64, offset: TimeDelta) -> i64 {
    local_ms + offset.num_milliseconds() - TIMESTAMP_SAFETY_MARGIN_MS
}

/// Offset that maps local time onto server time.
pub fn clock_offset(server_ms: i64, local_ms: i64) -> TimeDelta {
    TimeDelta::milliseconds(server_ms - local_ms)
}
