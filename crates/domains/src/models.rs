//! # Domain Models
//!
//! These structs represent the entities a report touches. Storage owns them;
//! the pipeline only ever works on a per-request snapshot.

use serde::{Deserialize, Serialize};

pub type PluginId = i32;
pub type ServerId = i32;
pub type GraphId = i32;
pub type ColumnId = i32;
pub type PluginVersionId = i32;

/// A plugin that reports through the collector (e.g. "Essentials").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    pub id: PluginId,
    pub name: String,
    /// Incremented once per non-ping report.
    pub global_hits: i64,
}

/// One server installation, identified by the GUID its plugins send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub guid: String,
    /// Empty until the first accepted report.
    pub server_version: String,
    pub players: i32,
    pub country: String,
    pub violation_count: i32,
    pub blacklisted: bool,
    pub environment: Option<Environment>,
}

impl Server {
    /// A freshly registered server that has never reported.
    pub fn new(id: ServerId, guid: impl Into<String>) -> Self {
        Self {
            id,
            guid: guid.into(),
            server_version: String::new(),
            players: 0,
            country: String::new(),
            violation_count: 0,
            blacklisted: false,
            environment: None,
        }
    }
}

/// Per (server, plugin) state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPlugin {
    pub server_id: ServerId,
    pub plugin_id: PluginId,
    pub version: String,
    /// Epoch seconds of the last accepted update.
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginVersion {
    pub id: PluginVersionId,
    pub plugin_id: PluginId,
    pub version: String,
}

/// A named custom metric series belonging to one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub id: GraphId,
    pub plugin_id: PluginId,
    pub name: String,
    /// Inactive graphs are hidden by the plugin author and stop ingesting.
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub graph_id: GraphId,
    pub name: String,
}

/// Whether the server runs in online (authenticated) mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    Unknown,
    Offline,
    Online,
}

impl AuthMode {
    /// Storage representation: -1 / 0 / 1.
    pub fn as_i16(self) -> i16 {
        match self {
            AuthMode::Unknown => -1,
            AuthMode::Offline => 0,
            AuthMode::Online => 1,
        }
    }

    pub fn from_i16(value: i16) -> Self {
        match value {
            0 => AuthMode::Offline,
            1 => AuthMode::Online,
            _ => AuthMode::Unknown,
        }
    }
}

/// Host environment reported from revision 6 onwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub os_name: String,
    /// The only field with no fallback; stays `None` when not sent.
    pub os_arch: Option<String>,
    pub os_version: String,
    pub java_name: String,
    pub java_version: String,
    pub cores: i32,
    pub auth_mode: AuthMode,
}

/// One custom metric as it appeared on the wire, not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMetric {
    pub graph_name: String,
    pub column_name: String,
    pub value: i64,
}

/// A normalized report. Built once per request and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedReport {
    pub guid: String,
    pub server_version: String,
    pub plugin_version: String,
    pub is_ping: bool,
    pub revision: i32,
    /// Always within `[0, MAX_PLAYERS]`.
    pub players_online: i32,
    pub environment: Option<Environment>,
    pub metrics: Vec<RawMetric>,
}

/// A single row of the custom data write plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomDataPoint {
    pub server_id: ServerId,
    pub plugin_id: PluginId,
    pub column_id: ColumnId,
    pub value: i64,
    pub updated_at: i64,
}
