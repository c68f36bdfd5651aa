//! # Update interval clock

use chrono::Utc;

/// Length of one graphing interval in seconds.
pub const UPDATE_INTERVAL_SECS: i64 = 30 * 60;

/// Source of wall-clock time, injectable so buckets can be tested.
pub trait Clock: Send + Sync {
    fn now_seconds(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seconds(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_seconds(&self) -> i64 {
        self.0
    }
}

/// Start of the interval `now` is attributed to.
///
/// Rounds `(now - interval/2) / interval` to the nearest whole number. The
/// half-interval shift makes this the interval start for positive `now`; an
/// exact boundary is a `.5` tie that rounds up into its own interval.
pub fn bucket(now: i64) -> i64 {
    bucket_with(now, UPDATE_INTERVAL_SECS)
}

pub fn bucket_with(now: i64, interval: i64) -> i64 {
    let shifted = (now - interval / 2) as f64 / interval as f64;
    shifted.round() as i64 * interval
}
