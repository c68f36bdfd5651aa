//! The domain core of the metrics collector.
//!
//! Decoding, validation and the anti-abuse rules are pure functions over
//! already-fetched data. Storage is reached only through the traits in
//! [`ports`].

pub mod changes;
pub mod codec;
pub mod decoder;
pub mod error;
pub mod interval;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod violation;

// Re-exporting for easier access in other crates
pub use changes::*;
pub use codec::{parse_fields, Fields};
pub use decoder::{decode, decode_body, MAX_PLAYERS};
pub use error::*;
pub use interval::{bucket, Clock, FixedClock, SystemClock, UPDATE_INTERVAL_SECS};
pub use metrics::{MetricScheme, DEFAULT_GRAPH};
pub use models::*;
pub use ports::*;
pub use violation::{Verdict, ViolationPolicy, MAX_VIOLATIONS};
