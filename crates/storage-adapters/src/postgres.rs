//! # PostgreSQL storage
//!
//! Maps the relational schema in `migrations/` onto the domain models.
//! Every `load_*` is a single upsert that returns the row, so concurrent
//! first contacts for the same key converge on one record.

use async_trait::async_trait;
use domains::{
    AuthMode, BlacklistStore, ChangeSet, Column, Environment, Graph, GraphRepository, Plugin,
    PluginRepository, PluginVersion, ReportSink, Server, ServerPlugin, ServerPluginRepository,
    ServerRepository, StorageError, StorageResult, WritePlan,
};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

/// Rows per `INSERT` when upserting custom data; keeps bind counts below
/// the protocol limit of 65535.
const CUSTOM_DATA_CHUNK: usize = 4_096;

pub struct PgStore {
    pool: PgPool,
}

fn backend(err: sqlx::Error) -> StorageError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => StorageError::Conflict(db.message().to_owned()),
        _ => StorageError::Backend(err.to_string()),
    }
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(backend)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending schema migrations.
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))
    }
}

fn server_from_row(row: &PgRow) -> Result<Server, sqlx::Error> {
    let os_name: Option<String> = row.try_get("os_name")?;
    let environment = match os_name {
        Some(os_name) => Some(Environment {
            os_name,
            os_arch: row.try_get("os_arch")?,
            os_version: row.try_get("os_version")?,
            java_name: row.try_get("java_name")?,
            java_version: row.try_get("java_version")?,
            cores: row.try_get("cores")?,
            auth_mode: AuthMode::from_i16(row.try_get("auth_mode")?),
        }),
        None => None,
    };

    Ok(Server {
        id: row.try_get("id")?,
        guid: row.try_get("guid")?,
        server_version: row.try_get("server_version")?,
        players: row.try_get("players")?,
        country: row.try_get("country")?,
        violation_count: row.try_get("violation_count")?,
        blacklisted: row.try_get("blacklisted")?,
        environment,
    })
}

fn plugin_from_row(row: &PgRow) -> Result<Plugin, sqlx::Error> {
    Ok(Plugin {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        global_hits: row.try_get("global_hits")?,
    })
}

fn server_plugin_from_row(row: &PgRow) -> Result<ServerPlugin, sqlx::Error> {
    Ok(ServerPlugin {
        server_id: row.try_get("server_id")?,
        plugin_id: row.try_get("plugin_id")?,
        version: row.try_get("version")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn plugin_version_from_row(row: &PgRow) -> Result<PluginVersion, sqlx::Error> {
    Ok(PluginVersion {
        id: row.try_get("id")?,
        plugin_id: row.try_get("plugin_id")?,
        version: row.try_get("version")?,
    })
}

fn graph_from_row(row: &PgRow) -> Result<Graph, sqlx::Error> {
    Ok(Graph {
        id: row.try_get("id")?,
        plugin_id: row.try_get("plugin_id")?,
        name: row.try_get("name")?,
        active: row.try_get("active")?,
    })
}

fn column_from_row(row: &PgRow) -> Result<Column, sqlx::Error> {
    Ok(Column {
        id: row.try_get("id")?,
        graph_id: row.try_get("graph_id")?,
        name: row.try_get("name")?,
    })
}

#[async_trait]
impl PluginRepository for PgStore {
    async fn load_plugin(&self, name: &str) -> StorageResult<Option<Plugin>> {
        let row = sqlx::query(
            "INSERT INTO plugins (name) VALUES ($1)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id, name, global_hits",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(plugin_from_row).transpose().map_err(backend)
    }
}

#[async_trait]
impl ServerRepository for PgStore {
    async fn load_server(&self, guid: &str) -> StorageResult<Option<Server>> {
        let row = sqlx::query(
            "INSERT INTO servers (guid) VALUES ($1)
             ON CONFLICT (guid) DO UPDATE SET guid = EXCLUDED.guid
             RETURNING *",
        )
        .bind(guid)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(server_from_row).transpose().map_err(backend)
    }
}

#[async_trait]
impl ServerPluginRepository for PgStore {
    async fn load_server_plugin(
        &self,
        server: &Server,
        plugin: &Plugin,
        version: &str,
    ) -> StorageResult<Option<ServerPlugin>> {
        // An existing link keeps its stored version; `version` only seeds.
        let row = sqlx::query(
            "INSERT INTO server_plugins (server_id, plugin_id, version, updated_at)
             VALUES ($1, $2, $3, 0)
             ON CONFLICT (server_id, plugin_id) DO UPDATE SET version = server_plugins.version
             RETURNING server_id, plugin_id, version, updated_at",
        )
        .bind(server.id)
        .bind(plugin.id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(server_plugin_from_row).transpose().map_err(backend)
    }

    async fn load_plugin_version(
        &self,
        plugin: &Plugin,
        version: &str,
    ) -> StorageResult<Option<PluginVersion>> {
        let row = sqlx::query(
            "INSERT INTO plugin_versions (plugin_id, version) VALUES ($1, $2)
             ON CONFLICT (plugin_id, version) DO UPDATE SET version = EXCLUDED.version
             RETURNING id, plugin_id, version",
        )
        .bind(plugin.id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(plugin_version_from_row).transpose().map_err(backend)
    }
}

#[async_trait]
impl GraphRepository for PgStore {
    async fn load_graph(&self, plugin: &Plugin, name: &str) -> StorageResult<Option<Graph>> {
        let row = sqlx::query(
            "INSERT INTO graphs (plugin_id, name) VALUES ($1, $2)
             ON CONFLICT (plugin_id, name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id, plugin_id, name, active",
        )
        .bind(plugin.id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(graph_from_row).transpose().map_err(backend)
    }

    async fn load_column(&self, graph: &Graph, name: &str) -> StorageResult<Option<Column>> {
        let row = sqlx::query(
            "INSERT INTO columns (graph_id, name) VALUES ($1, $2)
             ON CONFLICT (graph_id, name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id, graph_id, name",
        )
        .bind(graph.id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(column_from_row).transpose().map_err(backend)
    }
}

#[async_trait]
impl BlacklistStore for PgStore {
    async fn is_blacklisted(&self, guid: &str) -> StorageResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM blacklisted_guids WHERE guid = $1)",
        )
        .bind(guid)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)
    }

    async fn blacklist(&self, server: &Server) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            "INSERT INTO blacklisted_guids (guid) VALUES ($1) ON CONFLICT (guid) DO NOTHING",
        )
        .bind(&server.guid)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        sqlx::query("UPDATE servers SET blacklisted = TRUE WHERE id = $1")
            .bind(server.id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)
    }
}

/// Writes a change set on `conn`; the caller owns the transaction.
async fn apply_changes_on(conn: &mut PgConnection, changes: &ChangeSet) -> StorageResult<()> {
    if !changes.server.is_empty() {
        let delta = &changes.server;
        let mut query: QueryBuilder<'_, Postgres> = QueryBuilder::new("UPDATE servers SET ");
        let mut set = query.separated(", ");
        if let Some(version) = &delta.server_version {
            set.push("server_version = ").push_bind_unseparated(version);
        }
        if let Some(players) = delta.players {
            set.push("players = ").push_bind_unseparated(players);
        }
        if let Some(country) = &delta.country {
            set.push("country = ").push_bind_unseparated(country);
        }
        if let Some(env) = &delta.environment {
            set.push("os_name = ").push_bind_unseparated(&env.os_name);
            set.push("os_arch = ").push_bind_unseparated(&env.os_arch);
            set.push("os_version = ").push_bind_unseparated(&env.os_version);
            set.push("java_name = ").push_bind_unseparated(&env.java_name);
            set.push("java_version = ").push_bind_unseparated(&env.java_version);
            set.push("cores = ").push_bind_unseparated(env.cores);
            set.push("auth_mode = ").push_bind_unseparated(env.auth_mode.as_i16());
        }
        if let Some(count) = delta.violation_count {
            set.push("violation_count = ").push_bind_unseparated(count);
        }
        if let Some(blacklisted) = delta.blacklisted {
            set.push("blacklisted = ").push_bind_unseparated(blacklisted);
        }
        query.push(" WHERE id = ").push_bind(changes.server_id);

        query.build().execute(&mut *conn).await.map_err(backend)?;
    }

    if let Some(version) = &changes.version_history {
        sqlx::query(
            "INSERT INTO version_history (server_id, plugin_version_id) VALUES ($1, $2)",
        )
        .bind(changes.server_id)
        .bind(version.id)
        .execute(&mut *conn)
        .await
        .map_err(backend)?;
    }

    if changes.global_hits != 0 {
        sqlx::query("UPDATE plugins SET global_hits = global_hits + $1 WHERE id = $2")
            .bind(changes.global_hits)
            .bind(changes.plugin_id)
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
    }

    if changes.touches_server_plugin() {
        sqlx::query(
            "UPDATE server_plugins
             SET version = COALESCE($3, version), updated_at = COALESCE($4, updated_at)
             WHERE server_id = $1 AND plugin_id = $2",
        )
        .bind(changes.server_id)
        .bind(changes.plugin_id)
        .bind(&changes.plugin_version)
        .bind(changes.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(backend)?;
    }

    Ok(())
}

async fn upsert_custom_data_on(conn: &mut PgConnection, plan: &WritePlan) -> StorageResult<()> {
    let points: Vec<_> = plan.points().collect();
    for chunk in points.chunks(CUSTOM_DATA_CHUNK) {
        let mut query: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO custom_data (server_id, plugin_id, column_id, data_point, updated_at) ",
        );
        query.push_values(chunk, |mut row, point| {
            row.push_bind(point.server_id)
                .push_bind(point.plugin_id)
                .push_bind(point.column_id)
                .push_bind(point.value)
                .push_bind(point.updated_at);
        });
        query.push(
            " ON CONFLICT (server_id, plugin_id, column_id) \
             DO UPDATE SET data_point = EXCLUDED.data_point, updated_at = EXCLUDED.updated_at",
        );
        query.build().execute(&mut *conn).await.map_err(backend)?;
    }

    Ok(())
}

#[async_trait]
impl ReportSink for PgStore {
    async fn apply_changes(&self, changes: &ChangeSet) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        apply_changes_on(&mut *tx, changes).await?;
        tx.commit().await.map_err(backend)
    }

    async fn write_custom_data(&self, plan: &WritePlan) -> StorageResult<()> {
        if plan.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(backend)?;
        upsert_custom_data_on(&mut *tx, plan).await?;
        tx.commit().await.map_err(backend)
    }

    /// Custom data and all changes of one report in one transaction.
    async fn persist(&self, changes: &ChangeSet, plan: &WritePlan) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        if !plan.is_empty() {
            upsert_custom_data_on(&mut *tx, plan).await?;
        }
        apply_changes_on(&mut *tx, changes).await?;
        tx.commit().await.map_err(backend)
    }
}

/// These run against the database named by `DATABASE_URL` and return early
/// when it is unset. Names are unique per test so runs never collide.
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    async fn store() -> Option<PgStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let store = PgStore::connect(&url, 2).await.expect("connect to DATABASE_URL");
        store.migrate().await.expect("migrations apply");
        Some(store)
    }

    fn unique(prefix: &str) -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("{prefix}-{nanos}-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    async fn plugin_and_server(store: &PgStore) -> (Plugin, Server) {
        let plugin = store
            .load_plugin(&unique("plugin"))
            .await
            .unwrap()
            .unwrap();
        let server = store.load_server(&unique("guid")).await.unwrap().unwrap();
        (plugin, server)
    }

    #[tokio::test]
    async fn existing_server_plugin_keeps_stored_version() {
        let Some(store) = store().await else { return };
        let (plugin, server) = plugin_and_server(&store).await;

        let seeded = store
            .load_server_plugin(&server, &plugin, "2.1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seeded.version, "2.1");
        assert_eq!(seeded.updated_at, 0);

        let again = store
            .load_server_plugin(&server, &plugin, "9.9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again, seeded);
    }

    #[tokio::test]
    async fn partial_change_set_touches_only_named_columns() {
        let Some(store) = store().await else { return };
        let (plugin, server) = plugin_and_server(&store).await;
        store
            .load_server_plugin(&server, &plugin, "1.0")
            .await
            .unwrap();

        let mut changes = ChangeSet::new(server.id, plugin.id);
        changes.server.players = Some(12);
        changes.global_hits = 1;
        changes.updated_at = Some(1_000);
        store.apply_changes(&changes).await.unwrap();

        let stored = store.load_server(&server.guid).await.unwrap().unwrap();
        assert_eq!(stored.players, 12);
        assert_eq!(stored.server_version, "");
        assert_eq!(stored.environment, None);
        let hits = store
            .load_plugin(&plugin.name)
            .await
            .unwrap()
            .unwrap()
            .global_hits;
        assert_eq!(hits, 1);
        let link = store
            .load_server_plugin(&server, &plugin, "ignored")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.version, "1.0");
        assert_eq!(link.updated_at, 1_000);
    }

    #[tokio::test]
    async fn custom_data_is_last_write_wins() {
        let Some(store) = store().await else { return };
        let (plugin, server) = plugin_and_server(&store).await;
        let graph = store.load_graph(&plugin, "Players").await.unwrap().unwrap();
        let column = store.load_column(&graph, "Online").await.unwrap().unwrap();

        for (value, updated_at) in [(10, 100), (11, 200)] {
            let mut plan = WritePlan::new(server.id, plugin.id, updated_at);
            plan.insert(column.id, value);
            store.write_custom_data(&plan).await.unwrap();
        }

        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT data_point, updated_at FROM custom_data
             WHERE server_id = $1 AND plugin_id = $2 AND column_id = $3",
        )
        .bind(server.id)
        .bind(plugin.id)
        .bind(column.id)
        .fetch_all(&store.pool)
        .await
        .unwrap();
        assert_eq!(rows, vec![(11, 200)]);
    }

    #[tokio::test]
    async fn failed_persist_rolls_back_custom_data() {
        let Some(store) = store().await else { return };
        let (plugin, server) = plugin_and_server(&store).await;
        let graph = store.load_graph(&plugin, "Players").await.unwrap().unwrap();
        let column = store.load_column(&graph, "Online").await.unwrap().unwrap();

        let mut plan = WritePlan::new(server.id, plugin.id, 100);
        plan.insert(column.id, 10);
        // Points at a plugin version that does not exist.
        let mut changes = ChangeSet::new(server.id, plugin.id);
        changes.version_history = Some(PluginVersion {
            id: -1,
            plugin_id: plugin.id,
            version: "0.0".into(),
        });
        assert!(store.persist(&changes, &plan).await.is_err());

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM custom_data WHERE server_id = $1",
        )
        .bind(server.id)
        .fetch_one(&store.pool)
        .await
        .unwrap();
        assert_eq!(count, 0);
    }
}
