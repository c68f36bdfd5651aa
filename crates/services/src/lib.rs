//! Application services of the metrics collector.
//!
//! [`ReportService`] is what the HTTP layer calls; it owns the per-GUID
//! locking and hands finished outcomes to the [`ReportSink`](domains::ReportSink).

pub mod locks;
pub mod processor;
pub mod resolver;
pub mod service;

pub use locks::{GuidGuard, GuidLocks};
pub use processor::{Acknowledgement, Outcome, ProcessedReport, ReportProcessor, Repositories};
pub use resolver::MetricResolver;
pub use service::{ReportRequest, ReportService};
