//! # Ports
//!
//! Every storage adapter must implement these traits to be wired into the
//! report service. Each `load_*` call loads the entity or creates it on first
//! sight; `Ok(None)` means the backend could not produce it at all.

use async_trait::async_trait;

use crate::changes::{ChangeSet, WritePlan};
use crate::error::StorageResult;
use crate::models::{Column, Graph, Plugin, PluginVersion, Server, ServerPlugin};

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

/// Plugin lookup by its public name.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait PluginRepository: Send + Sync {
    async fn load_plugin(&self, name: &str) -> StorageResult<Option<Plugin>>;
}

/// Server lookup by GUID.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ServerRepository: Send + Sync {
    async fn load_server(&self, guid: &str) -> StorageResult<Option<Server>>;
}

/// Server/plugin link and plugin version lookups.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ServerPluginRepository: Send + Sync {
    /// `version` seeds a link that does not exist yet.
    async fn load_server_plugin(
        &self,
        server: &Server,
        plugin: &Plugin,
        version: &str,
    ) -> StorageResult<Option<ServerPlugin>>;

    async fn load_plugin_version(
        &self,
        plugin: &Plugin,
        version: &str,
    ) -> StorageResult<Option<PluginVersion>>;
}

/// Custom graph and column lookup.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait GraphRepository: Send + Sync {
    async fn load_graph(&self, plugin: &Plugin, name: &str) -> StorageResult<Option<Graph>>;
    async fn load_column(&self, graph: &Graph, name: &str) -> StorageResult<Option<Column>>;
}

/// The persistent GUID blacklist.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait BlacklistStore: Send + Sync {
    async fn is_blacklisted(&self, guid: &str) -> StorageResult<bool>;
    async fn blacklist(&self, server: &Server) -> StorageResult<()>;
}

/// Applies the outcome of a processed report.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Must apply the whole change set or nothing.
    async fn apply_changes(&self, changes: &ChangeSet) -> StorageResult<()>;

    /// Must upsert every row of the plan in one transaction.
    async fn write_custom_data(&self, plan: &WritePlan) -> StorageResult<()>;

    /// Applies an accepted report: the plan and the change set land
    /// together or not at all.
    async fn persist(&self, changes: &ChangeSet, plan: &WritePlan) -> StorageResult<()>;
}
