//! # Change descriptions
//!
//! Processing a report never saves anything itself. It returns a
//! [`ChangeSet`] naming exactly which fields moved and a [`WritePlan`] for
//! custom data; a storage adapter applies both.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{
    ColumnId, CustomDataPoint, Environment, PluginId, PluginVersion, Server, ServerId,
};

/// Server fields that changed during one request. `None` means untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerChanges {
    pub server_version: Option<String>,
    pub players: Option<i32>,
    pub country: Option<String>,
    pub environment: Option<Environment>,
    pub violation_count: Option<i32>,
    pub blacklisted: Option<bool>,
}

impl ServerChanges {
    pub fn is_empty(&self) -> bool {
        *self == ServerChanges::default()
    }

    pub fn set_server_version(&mut self, server: &mut Server, version: &str) {
        if server.server_version != version {
            server.server_version = version.to_owned();
            self.server_version = Some(version.to_owned());
        }
    }

    pub fn set_players(&mut self, server: &mut Server, players: i32) {
        if server.players != players && players >= 0 {
            server.players = players;
            self.players = Some(players);
        }
    }

    /// Empty codes mean "no GeoIP data" and never overwrite a stored one.
    pub fn set_country(&mut self, server: &mut Server, country: Option<&str>) {
        if let Some(country) = country.filter(|code| !code.is_empty()) {
            if server.country != country {
                server.country = country.to_owned();
                self.country = Some(country.to_owned());
            }
        }
    }

    pub fn set_environment(&mut self, server: &mut Server, environment: &Environment) {
        if server.environment.as_ref() != Some(environment) {
            server.environment = Some(environment.clone());
            self.environment = Some(environment.clone());
        }
    }

    pub fn set_violation_count(&mut self, server: &mut Server, count: i32) {
        if server.violation_count != count {
            server.violation_count = count;
            self.violation_count = Some(count);
        }
    }

    /// Records the violation state the policy left on `server`, relative to
    /// the values it had before.
    pub fn record_violation_state(&mut self, before: (i32, bool), server: &Server) {
        if before.0 != server.violation_count {
            self.violation_count = Some(server.violation_count);
        }
        if before.1 != server.blacklisted {
            self.blacklisted = Some(server.blacklisted);
        }
    }
}

/// Every mutation produced by one report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub server_id: ServerId,
    pub plugin_id: PluginId,
    pub server: ServerChanges,
    /// Appended to the server's version history.
    pub version_history: Option<PluginVersion>,
    /// Added to the plugin's global hit counter.
    pub global_hits: i64,
    /// New plugin version for the server/plugin link.
    pub plugin_version: Option<String>,
    /// New `updated_at` for the server/plugin link.
    pub updated_at: Option<i64>,
}

impl ChangeSet {
    pub fn new(server_id: ServerId, plugin_id: PluginId) -> Self {
        Self {
            server_id,
            plugin_id,
            server: ServerChanges::default(),
            version_history: None,
            global_hits: 0,
            plugin_version: None,
            updated_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.server.is_empty()
            && self.version_history.is_none()
            && self.global_hits == 0
            && self.plugin_version.is_none()
            && self.updated_at.is_none()
    }

    pub fn touches_server_plugin(&self) -> bool {
        self.plugin_version.is_some() || self.updated_at.is_some()
    }
}

/// Custom data rows to upsert for one report.
///
/// Rows are unique per column; adding a column twice keeps the later value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritePlan {
    server_id: ServerId,
    plugin_id: PluginId,
    updated_at: i64,
    values: BTreeMap<ColumnId, i64>,
}

impl WritePlan {
    pub fn new(server_id: ServerId, plugin_id: PluginId, updated_at: i64) -> Self {
        Self {
            server_id,
            plugin_id,
            updated_at,
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, column_id: ColumnId, value: i64) {
        self.values.insert(column_id, value);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn plugin_id(&self) -> PluginId {
        self.plugin_id
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Rows ordered by column id.
    pub fn points(&self) -> impl Iterator<Item = CustomDataPoint> + '_ {
        self.values.iter().map(|(&column_id, &value)| CustomDataPoint {
            server_id: self.server_id,
            plugin_id: self.plugin_id,
            column_id,
            value,
            updated_at: self.updated_at,
        })
    }
}
