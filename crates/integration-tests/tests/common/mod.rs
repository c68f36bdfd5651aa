//! Shared wiring: a full service over the in-memory store and a fixed clock.

#![allow(dead_code)]

use std::sync::Arc;

use domains::FixedClock;
use services::{ReportProcessor, ReportRequest, ReportService, Repositories};
use storage_adapters::MemoryStore;

/// Mid-interval instant; its bucket starts at 1_800_000_000.
pub const NOW: i64 = 1_800_000_600;

pub const FIRST_UPDATE: &str = "OK This is your first update this hour.";
pub const BLACKLISTED: &str =
    "ERR Your server is blacklisted for running multiple servers on the same GUID.";

pub fn service_at(now: i64) -> (ReportService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (service_over(store.clone(), now), store)
}

/// A service reading the clock as `now` over an existing store.
pub fn service_over(store: Arc<MemoryStore>, now: i64) -> ReportService {
    let processor = ReportProcessor::new(
        Repositories::from_store(store.clone()),
        Arc::new(FixedClock(now)),
    );
    ReportService::new(processor, store)
}

pub fn service() -> (ReportService, Arc<MemoryStore>) {
    service_at(NOW)
}

pub async fn report(service: &ReportService, plugin: &str, body: &str) -> &'static str {
    service
        .handle(ReportRequest {
            plugin: Some(plugin),
            body,
            country: None,
        })
        .await
}
