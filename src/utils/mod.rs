//! Logging, clock and test helpers.

pub mod log;
pub mod test_utils;

/// Current wall-clock time in unix nanoseconds.
pub fn unix_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}
