//! # Report service
//!
//! Entry point for one submission: decode, serialize on the GUID, process,
//! persist, answer. Always produces exactly one response line.

use std::sync::Arc;

use domains::{decode_body, DecodedReport, ReportError, ReportSink};
use tracing::Instrument;

use crate::locks::GuidLocks;
use crate::processor::{Outcome, ReportProcessor};

/// One inbound submission as the HTTP layer saw it.
#[derive(Debug, Clone, Copy)]
pub struct ReportRequest<'a> {
    /// `None` when the route carried no plugin name.
    pub plugin: Option<&'a str>,
    pub body: &'a str,
    /// GeoIP country header, if the proxy set one.
    pub country: Option<&'a str>,
}

pub struct ReportService {
    processor: ReportProcessor,
    sink: Arc<dyn ReportSink>,
    locks: GuidLocks,
}

impl ReportService {
    pub fn new(processor: ReportProcessor, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            processor,
            sink,
            locks: GuidLocks::new(),
        }
    }

    /// Handles a submission and returns the line to send back.
    pub async fn handle(&self, request: ReportRequest<'_>) -> &'static str {
        match self.try_handle(request).await {
            Ok(line) => line,
            Err(err) => {
                match &err {
                    ReportError::InvalidArguments(reason) => {
                        tracing::debug!(
                            plugin = ?request.plugin,
                            %reason,
                            "rejecting malformed report"
                        );
                    }
                    ReportError::Blacklisted => {}
                    ReportError::Inconsistent(_) | ReportError::Storage(_) => {
                        tracing::error!(
                            plugin = ?request.plugin,
                            error = %err,
                            "failed to process report"
                        );
                    }
                }
                err.response_line()
            }
        }
    }

    async fn try_handle(&self, request: ReportRequest<'_>) -> Result<&'static str, ReportError> {
        let plugin = request
            .plugin
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ReportError::InvalidArguments("missing plugin name".to_owned()))?;

        // Multi-line bodies are joined before decoding.
        let body: String = request
            .body
            .chars()
            .filter(|c| !matches!(c, '\r' | '\n'))
            .collect();
        let report = decode_body(&body)?;

        let span = tracing::debug_span!(
            "report",
            plugin,
            guid = %report.guid,
            revision = report.revision
        );
        self.process_exclusive(plugin, &report, request.country)
            .instrument(span)
            .await
    }

    async fn process_exclusive(
        &self,
        plugin: &str,
        report: &DecodedReport,
        country: Option<&str>,
    ) -> Result<&'static str, ReportError> {
        let _guard = self.locks.lock(&report.guid).await;

        match self.processor.process(plugin, report, country).await? {
            Outcome::Accepted(processed) => {
                self.sink
                    .persist(&processed.changes, &processed.write_plan)
                    .await?;
                Ok(processed.acknowledgement.response_line())
            }
            Outcome::Rejected { error, escalation } => {
                if let Some(escalation) = escalation {
                    self.sink.apply_changes(&escalation).await?;
                }
                Err(error)
            }
        }
    }
}
