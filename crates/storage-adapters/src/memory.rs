//! # In-memory storage
//!
//! A process-local implementation of every storage port, backed by
//! `DashMap`s. Used when no database is configured and by the test suites.

use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use domains::{
    BlacklistStore, ChangeSet, Column, ColumnId, Graph, GraphId, GraphRepository, Plugin,
    PluginId, PluginRepository, PluginVersion, PluginVersionId, ReportSink, Server, ServerId,
    ServerPlugin, ServerPluginRepository, ServerRepository, StorageError, StorageResult,
    WritePlan,
};

type CustomDataKey = (ServerId, PluginId, ColumnId);

/// Stored value and the second it was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredPoint {
    pub value: i64,
    pub updated_at: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    next_id: AtomicI32,
    plugins: DashMap<String, Plugin>,
    plugin_names: DashMap<PluginId, String>,
    servers: DashMap<String, Server>,
    server_guids: DashMap<ServerId, String>,
    server_plugins: DashMap<(ServerId, PluginId), ServerPlugin>,
    plugin_versions: DashMap<(PluginId, String), PluginVersion>,
    version_history: DashMap<ServerId, Vec<PluginVersionId>>,
    graphs: DashMap<(PluginId, String), Graph>,
    columns: DashMap<(GraphId, String), Column>,
    blacklist: DashSet<String>,
    custom_data: DashMap<CustomDataKey, StoredPoint>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Registers a graph up front, e.g. one the plugin author disabled.
    pub fn insert_graph(&self, plugin: &Plugin, name: &str, active: bool) -> Graph {
        let graph = Graph {
            id: self.next_id(),
            plugin_id: plugin.id,
            name: name.to_owned(),
            active,
        };
        self.graphs
            .insert((plugin.id, name.to_owned()), graph.clone());
        graph
    }

    /// Adds `guid` to the persistent blacklist without touching its server.
    pub fn blacklist_guid(&self, guid: &str) {
        self.blacklist.insert(guid.to_owned());
    }

    pub fn is_guid_blacklisted(&self, guid: &str) -> bool {
        self.blacklist.contains(guid)
    }

    pub fn plugin(&self, name: &str) -> Option<Plugin> {
        self.plugins.get(name).map(|plugin| plugin.clone())
    }

    pub fn server(&self, guid: &str) -> Option<Server> {
        self.servers.get(guid).map(|server| server.clone())
    }

    /// Replaces a stored server, keyed by its GUID.
    pub fn put_server(&self, server: Server) {
        self.server_guids.insert(server.id, server.guid.clone());
        self.servers.insert(server.guid.clone(), server);
    }

    pub fn server_plugin(&self, server_id: ServerId, plugin_id: PluginId) -> Option<ServerPlugin> {
        self.server_plugins
            .get(&(server_id, plugin_id))
            .map(|link| link.clone())
    }

    pub fn version_history(&self, server_id: ServerId) -> Vec<PluginVersionId> {
        self.version_history
            .get(&server_id)
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    pub fn custom_data(
        &self,
        server_id: ServerId,
        plugin_id: PluginId,
        column_id: ColumnId,
    ) -> Option<StoredPoint> {
        self.custom_data
            .get(&(server_id, plugin_id, column_id))
            .map(|point| *point)
    }

    pub fn custom_data_len(&self) -> usize {
        self.custom_data.len()
    }

    pub fn column(&self, graph: &Graph, name: &str) -> Option<Column> {
        self.columns
            .get(&(graph.id, name.to_owned()))
            .map(|column| column.clone())
    }

    pub fn graph(&self, plugin: &Plugin, name: &str) -> Option<Graph> {
        self.graphs
            .get(&(plugin.id, name.to_owned()))
            .map(|graph| graph.clone())
    }
}

#[async_trait]
impl PluginRepository for MemoryStore {
    async fn load_plugin(&self, name: &str) -> StorageResult<Option<Plugin>> {
        let plugin = self
            .plugins
            .entry(name.to_owned())
            .or_insert_with(|| Plugin {
                id: self.next_id(),
                name: name.to_owned(),
                global_hits: 0,
            })
            .clone();
        // The entry guard is gone; index maps are only touched afterwards.
        self.plugin_names.insert(plugin.id, plugin.name.clone());
        Ok(Some(plugin))
    }
}

#[async_trait]
impl ServerRepository for MemoryStore {
    async fn load_server(&self, guid: &str) -> StorageResult<Option<Server>> {
        let server = self
            .servers
            .entry(guid.to_owned())
            .or_insert_with(|| Server::new(self.next_id(), guid))
            .clone();
        self.server_guids.insert(server.id, server.guid.clone());
        Ok(Some(server))
    }
}

#[async_trait]
impl ServerPluginRepository for MemoryStore {
    async fn load_server_plugin(
        &self,
        server: &Server,
        plugin: &Plugin,
        version: &str,
    ) -> StorageResult<Option<ServerPlugin>> {
        let link = self
            .server_plugins
            .entry((server.id, plugin.id))
            .or_insert_with(|| ServerPlugin {
                server_id: server.id,
                plugin_id: plugin.id,
                version: version.to_owned(),
                updated_at: 0,
            })
            .clone();
        Ok(Some(link))
    }

    async fn load_plugin_version(
        &self,
        plugin: &Plugin,
        version: &str,
    ) -> StorageResult<Option<PluginVersion>> {
        let entry = self
            .plugin_versions
            .entry((plugin.id, version.to_owned()))
            .or_insert_with(|| PluginVersion {
                id: self.next_id(),
                plugin_id: plugin.id,
                version: version.to_owned(),
            })
            .clone();
        Ok(Some(entry))
    }
}

#[async_trait]
impl GraphRepository for MemoryStore {
    async fn load_graph(&self, plugin: &Plugin, name: &str) -> StorageResult<Option<Graph>> {
        let graph = self
            .graphs
            .entry((plugin.id, name.to_owned()))
            .or_insert_with(|| Graph {
                id: self.next_id(),
                plugin_id: plugin.id,
                name: name.to_owned(),
                active: true,
            })
            .clone();
        Ok(Some(graph))
    }

    async fn load_column(&self, graph: &Graph, name: &str) -> StorageResult<Option<Column>> {
        let column = self
            .columns
            .entry((graph.id, name.to_owned()))
            .or_insert_with(|| Column {
                id: self.next_id(),
                graph_id: graph.id,
                name: name.to_owned(),
            })
            .clone();
        Ok(Some(column))
    }
}

#[async_trait]
impl BlacklistStore for MemoryStore {
    async fn is_blacklisted(&self, guid: &str) -> StorageResult<bool> {
        Ok(self.blacklist.contains(guid))
    }

    async fn blacklist(&self, server: &Server) -> StorageResult<()> {
        self.blacklist.insert(server.guid.clone());
        Ok(())
    }
}

/// Keys a change set resolved to before anything was written.
struct Resolved {
    guid: String,
    plugin_name: String,
}

impl MemoryStore {
    /// Looks up everything `changes` needs. Rows are never removed, so a
    /// change set that resolves here cannot fail halfway through.
    fn resolve(&self, changes: &ChangeSet) -> StorageResult<Resolved> {
        // Clone out of the index before touching the primary maps.
        let guid = self
            .server_guids
            .get(&changes.server_id)
            .map(|guid| guid.clone())
            .ok_or_else(|| StorageError::Backend(format!("unknown server {}", changes.server_id)))?;
        let plugin_name = self
            .plugin_names
            .get(&changes.plugin_id)
            .map(|name| name.clone())
            .ok_or_else(|| StorageError::Backend(format!("unknown plugin {}", changes.plugin_id)))?;

        if !changes.server.is_empty() && !self.servers.contains_key(&guid) {
            return Err(StorageError::Backend(format!("server {guid} vanished")));
        }
        if changes.touches_server_plugin()
            && !self
                .server_plugins
                .contains_key(&(changes.server_id, changes.plugin_id))
        {
            return Err(StorageError::Backend(format!(
                "no server plugin for server {} and plugin {}",
                changes.server_id, changes.plugin_id
            )));
        }

        Ok(Resolved { guid, plugin_name })
    }

    fn apply_resolved(&self, changes: &ChangeSet, resolved: &Resolved) {
        if !changes.server.is_empty() {
            if let Some(mut server) = self.servers.get_mut(&resolved.guid) {
                let delta = &changes.server;
                if let Some(version) = &delta.server_version {
                    server.server_version = version.clone();
                }
                if let Some(players) = delta.players {
                    server.players = players;
                }
                if let Some(country) = &delta.country {
                    server.country = country.clone();
                }
                if let Some(environment) = &delta.environment {
                    server.environment = Some(environment.clone());
                }
                if let Some(count) = delta.violation_count {
                    server.violation_count = count;
                }
                if let Some(blacklisted) = delta.blacklisted {
                    server.blacklisted = blacklisted;
                }
            }
        }

        if let Some(version) = &changes.version_history {
            self.version_history
                .entry(changes.server_id)
                .or_default()
                .push(version.id);
        }

        if changes.global_hits != 0 {
            if let Some(mut plugin) = self.plugins.get_mut(&resolved.plugin_name) {
                plugin.global_hits += changes.global_hits;
            }
        }

        if changes.touches_server_plugin() {
            if let Some(mut link) = self
                .server_plugins
                .get_mut(&(changes.server_id, changes.plugin_id))
            {
                if let Some(version) = &changes.plugin_version {
                    link.version = version.clone();
                }
                if let Some(updated_at) = changes.updated_at {
                    link.updated_at = updated_at;
                }
            }
        }
    }

    fn upsert_custom_data(&self, plan: &WritePlan) {
        for point in plan.points() {
            self.custom_data.insert(
                (point.server_id, point.plugin_id, point.column_id),
                StoredPoint {
                    value: point.value,
                    updated_at: point.updated_at,
                },
            );
        }
        tracing::trace!(rows = plan.len(), "custom data upserted");
    }
}

#[async_trait]
impl ReportSink for MemoryStore {
    async fn apply_changes(&self, changes: &ChangeSet) -> StorageResult<()> {
        let resolved = self.resolve(changes)?;
        self.apply_resolved(changes, &resolved);
        Ok(())
    }

    async fn write_custom_data(&self, plan: &WritePlan) -> StorageResult<()> {
        self.upsert_custom_data(plan);
        Ok(())
    }

    async fn persist(&self, changes: &ChangeSet, plan: &WritePlan) -> StorageResult<()> {
        let resolved = self.resolve(changes)?;
        self.upsert_custom_data(plan);
        self.apply_resolved(changes, &resolved);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entities_are_created_once() {
        let store = MemoryStore::new();
        let first = store.load_plugin("Essentials").await.unwrap().unwrap();
        let again = store.load_plugin("Essentials").await.unwrap().unwrap();
        assert_eq!(first, again);

        let server = store.load_server("guid").await.unwrap().unwrap();
        assert_eq!(server.server_version, "");
        assert_eq!(server.violation_count, 0);
        assert_eq!(store.load_server("guid").await.unwrap().unwrap().id, server.id);
    }

    #[tokio::test]
    async fn new_server_plugin_is_seeded_with_reported_version() {
        let store = MemoryStore::new();
        let plugin = store.load_plugin("Essentials").await.unwrap().unwrap();
        let server = store.load_server("guid").await.unwrap().unwrap();

        let link = store
            .load_server_plugin(&server, &plugin, "2.1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.version, "2.1");
        assert_eq!(link.updated_at, 0);

        let link = store
            .load_server_plugin(&server, &plugin, "9.9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.version, "2.1");
    }

    #[tokio::test]
    async fn change_set_applies_only_named_fields() {
        let store = MemoryStore::new();
        let plugin = store.load_plugin("Essentials").await.unwrap().unwrap();
        let server = store.load_server("guid").await.unwrap().unwrap();
        store
            .load_server_plugin(&server, &plugin, "1.0")
            .await
            .unwrap();

        let mut changes = ChangeSet::new(server.id, plugin.id);
        changes.server.players = Some(12);
        changes.global_hits = 1;
        changes.updated_at = Some(1_000);
        store.apply_changes(&changes).await.unwrap();

        let stored = store.server("guid").unwrap();
        assert_eq!(stored.players, 12);
        assert_eq!(stored.server_version, "");
        assert_eq!(store.plugin("Essentials").unwrap().global_hits, 1);
        let link = store.server_plugin(server.id, plugin.id).unwrap();
        assert_eq!(link.updated_at, 1_000);
        assert_eq!(link.version, "1.0");
    }

    #[tokio::test]
    async fn unknown_server_is_a_backend_error() {
        let store = MemoryStore::new();
        let err = store.apply_changes(&ChangeSet::new(99, 98)).await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
    }

    #[tokio::test]
    async fn custom_data_upserts_by_key() {
        let store = MemoryStore::new();
        let mut plan = WritePlan::new(1, 2, 100);
        plan.insert(3, 10);
        plan.insert(4, 20);
        store.write_custom_data(&plan).await.unwrap();

        let mut plan = WritePlan::new(1, 2, 200);
        plan.insert(3, 11);
        store.write_custom_data(&plan).await.unwrap();

        assert_eq!(store.custom_data_len(), 2);
        assert_eq!(
            store.custom_data(1, 2, 3),
            Some(StoredPoint {
                value: 11,
                updated_at: 200
            })
        );
        assert_eq!(store.custom_data(1, 2, 4).unwrap().value, 20);
    }

    #[tokio::test]
    async fn blacklist_is_keyed_by_guid() {
        let store = MemoryStore::new();
        let server = store.load_server("guid").await.unwrap().unwrap();
        assert!(!store.is_blacklisted("guid").await.unwrap());
        store.blacklist(&server).await.unwrap();
        assert!(store.is_blacklisted("guid").await.unwrap());
        assert!(!store.is_blacklisted("other").await.unwrap());
    }

    #[tokio::test]
    async fn preregistered_graph_keeps_its_state() {
        let store = MemoryStore::new();
        let plugin = store.load_plugin("Essentials").await.unwrap().unwrap();
        let hidden = store.insert_graph(&plugin, "Players", false);
        let loaded = store.load_graph(&plugin, "Players").await.unwrap().unwrap();
        assert_eq!(loaded, hidden);
        assert!(!loaded.active);
    }

    #[tokio::test]
    async fn failed_change_set_leaves_everything_untouched() {
        let store = MemoryStore::new();
        let plugin = store.load_plugin("Essentials").await.unwrap().unwrap();
        let server = store.load_server("guid").await.unwrap().unwrap();

        // No server plugin link was ever loaded.
        let mut changes = ChangeSet::new(server.id, plugin.id);
        changes.server.players = Some(12);
        changes.global_hits = 1;
        changes.updated_at = Some(1_000);
        let mut plan = WritePlan::new(server.id, plugin.id, 1_000);
        plan.insert(7, 42);

        let err = store.apply_changes(&changes).await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
        let err = store.persist(&changes, &plan).await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));

        assert_eq!(store.server("guid").unwrap().players, 0);
        assert_eq!(store.plugin("Essentials").unwrap().global_hits, 0);
        assert_eq!(store.custom_data_len(), 0);
    }

    #[tokio::test]
    async fn persist_lands_plan_and_changes_together() {
        let store = MemoryStore::new();
        let plugin = store.load_plugin("Essentials").await.unwrap().unwrap();
        let server = store.load_server("guid").await.unwrap().unwrap();
        store
            .load_server_plugin(&server, &plugin, "1.0")
            .await
            .unwrap();

        let mut changes = ChangeSet::new(server.id, plugin.id);
        changes.global_hits = 1;
        changes.updated_at = Some(1_000);
        let mut plan = WritePlan::new(server.id, plugin.id, 1_000);
        plan.insert(7, 42);
        store.persist(&changes, &plan).await.unwrap();

        assert_eq!(store.plugin("Essentials").unwrap().global_hits, 1);
        assert_eq!(store.server_plugin(server.id, plugin.id).unwrap().updated_at, 1_000);
        assert_eq!(store.custom_data(server.id, plugin.id, 7).unwrap().value, 42);
    }
}
