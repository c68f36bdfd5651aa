//! # Report processor
//!
//! Runs one decoded report against the entities it belongs to and describes
//! the result: the changes to persist, the custom data to upsert and the
//! line to answer with. Nothing here writes except the blacklist notification,
//! which must happen even when the rest of the request is later discarded.

use std::sync::Arc;

use domains::{
    bucket, BlacklistStore, ChangeSet, Clock, DecodedReport, GraphRepository, MetricScheme,
    PluginRepository, ReportError, ServerPluginRepository, ServerRepository, Verdict,
    ViolationPolicy, WritePlan,
};

use crate::resolver::MetricResolver;

/// Custom data is only accepted from revision 4 onwards.
const CUSTOM_DATA_REVISION: i32 = 4;

/// Line sent for an accepted report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Ok,
    /// First accepted report of this server/plugin in the current interval.
    FirstUpdate,
}

impl Acknowledgement {
    pub fn response_line(self) -> &'static str {
        match self {
            Acknowledgement::Ok => "OK",
            Acknowledgement::FirstUpdate => "OK This is your first update this hour.",
        }
    }
}

/// An accepted report, ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedReport {
    pub changes: ChangeSet,
    pub write_plan: WritePlan,
    pub acknowledgement: Acknowledgement,
}

#[derive(Debug)]
pub enum Outcome {
    Accepted(ProcessedReport),
    /// Refused by the violation policy. `escalation` carries the violation
    /// state the policy forced, which is still persisted.
    Rejected {
        error: ReportError,
        escalation: Option<ChangeSet>,
    },
}

/// Read-side ports the processor loads entities through.
#[derive(Clone)]
pub struct Repositories {
    pub plugins: Arc<dyn PluginRepository>,
    pub servers: Arc<dyn ServerRepository>,
    pub server_plugins: Arc<dyn ServerPluginRepository>,
    pub graphs: Arc<dyn GraphRepository>,
    pub blacklist: Arc<dyn BlacklistStore>,
}

impl Repositories {
    /// Every port served by one store.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: PluginRepository
            + ServerRepository
            + ServerPluginRepository
            + GraphRepository
            + BlacklistStore
            + 'static,
    {
        Self {
            plugins: store.clone(),
            servers: store.clone(),
            server_plugins: store.clone(),
            graphs: store.clone(),
            blacklist: store,
        }
    }
}

pub struct ReportProcessor {
    repositories: Repositories,
    clock: Arc<dyn Clock>,
    policy: ViolationPolicy,
}

impl ReportProcessor {
    pub fn new(repositories: Repositories, clock: Arc<dyn Clock>) -> Self {
        Self {
            repositories,
            clock,
            policy: ViolationPolicy::default(),
        }
    }

    /// Processes `report` for `plugin_name`.
    ///
    /// The caller must hold exclusive access to the report's GUID for the
    /// whole call and until the outcome is persisted.
    pub async fn process(
        &self,
        plugin_name: &str,
        report: &DecodedReport,
        country: Option<&str>,
    ) -> Result<Outcome, ReportError> {
        let repos = &self.repositories;

        let plugin = repos
            .plugins
            .load_plugin(plugin_name)
            .await?
            .ok_or(ReportError::Inconsistent("plugin could not be loaded"))?;
        let mut server = repos
            .servers
            .load_server(&report.guid)
            .await?
            .ok_or(ReportError::Inconsistent("server could not be loaded"))?;

        let mut changes = ChangeSet::new(server.id, plugin.id);

        // 1. Violations and blacklist.
        let before = (server.violation_count, server.blacklisted);
        let listed = if self.policy.needs_blacklist_lookup(&server) {
            repos.blacklist.is_blacklisted(&server.guid).await?
        } else {
            false
        };
        let verdict = self.policy.evaluate(&mut server, listed);
        changes.server.record_violation_state(before, &server);

        match verdict {
            Verdict::Reject => {
                tracing::debug!(
                    guid = %server.guid,
                    plugin = %plugin.name,
                    "rejecting blacklisted server"
                );
                let escalation = (!changes.is_empty()).then_some(changes);
                return Ok(Outcome::Rejected {
                    error: ReportError::Blacklisted,
                    escalation,
                });
            }
            Verdict::ProceedAndBlacklist => {
                tracing::info!(
                    guid = %server.guid,
                    violations = server.violation_count,
                    "violation threshold reached, blacklisting server"
                );
                repos.blacklist.blacklist(&server).await?;
            }
            Verdict::Proceed => {}
        }

        let server_plugin = repos
            .server_plugins
            .load_server_plugin(&server, &plugin, &report.plugin_version)
            .await?
            .ok_or(ReportError::Inconsistent("server plugin could not be loaded"))?;

        // 2. Plugin version history. A blank server version means this is the
        // server's first contact, which is not a version change.
        if server_plugin.version != report.plugin_version {
            if !server.server_version.is_empty() {
                changes.version_history = repos
                    .server_plugins
                    .load_plugin_version(&plugin, &report.plugin_version)
                    .await?;
            }
            changes.plugin_version = Some(report.plugin_version.clone());
        }

        // 3. Server fields, only when they moved.
        changes
            .server
            .set_server_version(&mut server, &report.server_version);
        changes
            .server
            .set_players(&mut server, report.players_online);
        changes.server.set_country(&mut server, country);
        if let Some(environment) = &report.environment {
            changes.server.set_environment(&mut server, environment);
        }

        // 4. Global hits.
        if !report.is_ping {
            changes.global_hits = 1;
        }

        // 5. Custom data.
        let now = self.clock.now_seconds();
        let mut write_plan = WritePlan::new(server.id, plugin.id, now);
        if report.revision >= CUSTOM_DATA_REVISION && !report.metrics.is_empty() {
            let dropped = MetricResolver::new(repos.graphs.as_ref())
                .resolve_into(
                    &plugin,
                    MetricScheme::for_revision(report.revision),
                    &report.metrics,
                    &mut write_plan,
                )
                .await;
            if dropped > 0 {
                tracing::debug!(
                    guid = %server.guid,
                    plugin = %plugin.name,
                    dropped,
                    "dropped unresolvable metrics"
                );
            }
        }

        // 6. Interval bookkeeping.
        let acknowledgement = if bucket(now) > server_plugin.updated_at {
            changes.server.set_violation_count(&mut server, 0);
            Acknowledgement::FirstUpdate
        } else {
            Acknowledgement::Ok
        };

        // 7. Stamp with the wall clock, not the bucket.
        changes.updated_at = Some(now);

        Ok(Outcome::Accepted(ProcessedReport {
            changes,
            write_plan,
            acknowledgement,
        }))
    }
}
