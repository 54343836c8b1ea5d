//! Persistent storage for agents, capabilities, and the health-event log.
//!
//! Backed by `sqlx`'s database-agnostic `Any` driver so the same queries run
//! against an embedded SQLite file (the default) or an external Postgres
//! instance, selected by `DATABASE_URL`'s scheme at connect time.

use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use tracing::warn;

use mcp_mesh_core::model::{Agent, AgentStatus, Capability, HealthEvent};
use mcp_mesh_core::spec::SelectorGroup;

use crate::error::StoreError;

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        namespace TEXT NOT NULL,
        version TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        agent_type TEXT NOT NULL,
        status TEXT NOT NULL,
        last_heartbeat BIGINT,
        health_interval_s BIGINT,
        timeout_threshold_s BIGINT,
        eviction_threshold_s BIGINT,
        dependencies TEXT NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL,
        resource_version BIGINT NOT NULL,
        last_snapshot_max_rv BIGINT NOT NULL DEFAULT 0
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status)",
    r#"CREATE TABLE IF NOT EXISTS capabilities (
        agent_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        version TEXT NOT NULL,
        tags TEXT NOT NULL,
        PRIMARY KEY (agent_id, name)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_capabilities_name ON capabilities(name)",
    "CREATE INDEX IF NOT EXISTS idx_capabilities_agent_id ON capabilities(agent_id)",
    r#"CREATE TABLE IF NOT EXISTS agent_health (
        agent_id TEXT NOT NULL,
        from_status TEXT NOT NULL,
        to_status TEXT NOT NULL,
        at BIGINT NOT NULL
    )"#,
];

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Strictly-monotone `resource_version` ratchet: a millisecond clock that
/// falls back to `prior + 1` under clock skew or sub-millisecond churn.
fn next_rv(prior: i64) -> i64 {
    let candidate = now_ms();
    if candidate > prior {
        candidate
    } else {
        prior + 1
    }
}

fn status_from_str(s: &str) -> AgentStatus {
    match s {
        "degraded" => AgentStatus::Degraded,
        "expired" => AgentStatus::Expired,
        _ => AgentStatus::Healthy,
    }
}

/// Read-side filter for [`Store::list_agents`].
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub capability: Option<String>,
    pub capability_tags: Vec<String>,
    pub status: Option<AgentStatus>,
}

/// Raw column values for an `agents` row, before capabilities/dependencies
/// are hydrated.
struct AgentRow {
    id: String,
    name: String,
    namespace: String,
    version: String,
    endpoint: String,
    agent_type: String,
    status: AgentStatus,
    last_heartbeat: Option<i64>,
    health_interval_s: Option<u64>,
    timeout_threshold_s: Option<u64>,
    eviction_threshold_s: Option<u64>,
    dependencies: Vec<SelectorGroup>,
    created_at: i64,
    updated_at: i64,
    resource_version: i64,
}

pub struct Store {
    pool: AnyPool,
}

impl Store {
    /// Connect to the database named by `database_url` and ensure the
    /// schema exists. `sqlite://...`, `sqlite::memory:`, and
    /// `postgres://...` are all accepted; the `Any` driver rewrites bind
    /// placeholders for whichever backend is actually connected.
    ///
    /// An in-memory SQLite database only persists for the lifetime of a
    /// single connection, so the pool is pinned to one connection in that
    /// case — otherwise each checkout would see its own empty database.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();
        let max_connections = if database_url.contains("memory") { 1 } else { 10 };
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Atomically replace an agent's metadata, capabilities, and declared
    /// dependencies, bumping `resource_version`. Last-writer-wins on
    /// `agent_id` collision with a different endpoint; the collision is
    /// logged, never rejected.
    pub async fn upsert_agent(&self, incoming: &Agent) -> Result<Agent, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = fetch_agent_row(&mut *tx, &incoming.id).await?;
        let (created_at, prior_rv) = match &existing {
            Some(prior) => {
                if prior.endpoint != incoming.endpoint {
                    warn!(
                        "agent '{}' re-registered with a different endpoint (prior={}, new={}); overwriting",
                        incoming.id, prior.endpoint, incoming.endpoint
                    );
                }
                (prior.created_at, prior.resource_version)
            }
            None => (now_ms(), 0),
        };

        let rv = next_rv(prior_rv);
        let now = now_ms();
        let deps_json = serde_json::to_string(&incoming.dependencies)
            .map_err(|e| StoreError::Backend(sqlx::Error::Decode(Box::new(e))))?;

        sqlx::query(
            r#"INSERT INTO agents
                (id, name, namespace, version, endpoint, agent_type, status,
                 last_heartbeat, health_interval_s, timeout_threshold_s, eviction_threshold_s,
                 dependencies, created_at, updated_at, resource_version, last_snapshot_max_rv)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 namespace = excluded.namespace,
                 version = excluded.version,
                 endpoint = excluded.endpoint,
                 agent_type = excluded.agent_type,
                 status = excluded.status,
                 health_interval_s = excluded.health_interval_s,
                 timeout_threshold_s = excluded.timeout_threshold_s,
                 eviction_threshold_s = excluded.eviction_threshold_s,
                 dependencies = excluded.dependencies,
                 updated_at = excluded.updated_at,
                 resource_version = excluded.resource_version"#,
        )
        .bind(&incoming.id)
        .bind(&incoming.name)
        .bind(&incoming.namespace)
        .bind(&incoming.version)
        .bind(&incoming.endpoint)
        .bind(&incoming.agent_type)
        .bind(incoming.status.as_str())
        .bind(incoming.last_heartbeat)
        .bind(incoming.health_interval_s.map(|v| v as i64))
        .bind(incoming.timeout_threshold_s.map(|v| v as i64))
        .bind(incoming.eviction_threshold_s.map(|v| v as i64))
        .bind(deps_json)
        .bind(created_at)
        .bind(now)
        .bind(rv)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM capabilities WHERE agent_id = ?")
            .bind(&incoming.id)
            .execute(&mut *tx)
            .await?;

        for cap in &incoming.capabilities {
            let tags_json = serde_json::to_string(&cap.tags)
                .map_err(|e| StoreError::Backend(sqlx::Error::Decode(Box::new(e))))?;
            sqlx::query(
                "INSERT INTO capabilities (agent_id, name, description, version, tags) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&incoming.id)
            .bind(&cap.name)
            .bind(&cap.description)
            .bind(&cap.version)
            .bind(tags_json)
            .execute(&mut *tx)
            .await?;
        }

        let row = fetch_agent_row(&mut *tx, &incoming.id)
            .await?
            .expect("just-upserted agent row must be present");
        let capabilities = fetch_capabilities(&mut *tx, &incoming.id).await?;
        tx.commit().await?;
        Ok(assemble_agent(row, capabilities))
    }

    /// Update `last_heartbeat`/`status`/`updated_at` for an existing agent,
    /// bumping `resource_version`. Fails with [`StoreError::NotFound`] if
    /// the row is absent.
    pub async fn touch_heartbeat(
        &self,
        agent_id: &str,
        status_hint: AgentStatus,
    ) -> Result<Agent, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = fetch_agent_row(&mut *tx, agent_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        let rv = next_rv(existing.resource_version);
        let now = now_ms();

        sqlx::query(
            "UPDATE agents SET last_heartbeat = ?, status = ?, updated_at = ?, resource_version = ? WHERE id = ?",
        )
        .bind(now)
        .bind(status_hint.as_str())
        .bind(now)
        .bind(rv)
        .bind(agent_id)
        .execute(&mut *tx)
        .await?;

        let row = fetch_agent_row(&mut *tx, agent_id)
            .await?
            .expect("just-touched agent row must be present");
        let capabilities = fetch_capabilities(&mut *tx, agent_id).await?;
        tx.commit().await?;
        Ok(assemble_agent(row, capabilities))
    }

    /// Record the `resource_version` max observed across a consumer's
    /// currently-eligible dependency providers at snapshot time, so the
    /// next HEAD can detect topology change by comparison.
    pub async fn set_last_snapshot_max_rv(&self, agent_id: &str, max_rv: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE agents SET last_snapshot_max_rv = ? WHERE id = ?")
            .bind(max_rv)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The `last_snapshot_max_rv` stored for an agent, or `None` if unknown.
    pub async fn last_snapshot_max_rv(&self, agent_id: &str) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT last_snapshot_max_rv FROM agents WHERE id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("last_snapshot_max_rv")))
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, StoreError> {
        let Some(row) = fetch_agent_row(&self.pool, agent_id).await? else {
            return Ok(None);
        };
        let capabilities = fetch_capabilities(&self.pool, agent_id).await?;
        Ok(Some(assemble_agent(row, capabilities)))
    }

    pub async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>, StoreError> {
        let ids = sqlx::query("SELECT id FROM agents ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::new();
        for id_row in ids {
            let id: String = id_row.get("id");
            if let Some(agent) = self.get_agent(&id).await? {
                if agent_matches(&agent, filter) {
                    out.push(agent);
                }
            }
        }
        Ok(out)
    }

    /// Index-friendly lookup for the resolution hot path: every healthy
    /// agent offering `capability`.
    pub async fn list_healthy_providers(&self, capability: &str) -> Result<Vec<Agent>, StoreError> {
        self.list_agents(&AgentFilter {
            capability: Some(capability.to_string()),
            status: Some(AgentStatus::Healthy),
            ..Default::default()
        })
        .await
    }

    /// Transition `agent_id` to `new_status`, bumping `resource_version`
    /// and appending a Health Event, but only when `new_status` actually
    /// differs from the current persisted status.
    pub async fn mark_status(
        &self,
        agent_id: &str,
        new_status: AgentStatus,
        at: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = fetch_agent_row(&mut *tx, agent_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        if existing.status == new_status {
            tx.commit().await?;
            return Ok(());
        }

        let rv = next_rv(existing.resource_version);

        sqlx::query("UPDATE agents SET status = ?, resource_version = ?, updated_at = ? WHERE id = ?")
            .bind(new_status.as_str())
            .bind(rv)
            .bind(at)
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO agent_health (agent_id, from_status, to_status, at) VALUES (?, ?, ?, ?)",
        )
        .bind(agent_id)
        .bind(existing.status.as_str())
        .bind(new_status.as_str())
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Recent health events for an agent, most recent first. Audit/telemetry
    /// only — no correctness dependence.
    pub async fn health_events(&self, agent_id: &str, limit: i64) -> Result<Vec<HealthEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT agent_id, from_status, to_status, at FROM agent_health WHERE agent_id = ? ORDER BY at DESC LIMIT ?",
        )
        .bind(agent_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| HealthEvent {
                agent_id: row.get("agent_id"),
                from_status: status_from_str(row.get::<String, _>("from_status").as_str()),
                to_status: status_from_str(row.get::<String, _>("to_status").as_str()),
                at: row.get("at"),
            })
            .collect())
    }
}

fn agent_matches(agent: &Agent, filter: &AgentFilter) -> bool {
    if let Some(name) = &filter.name {
        if &agent.name != name {
            return false;
        }
    }
    if let Some(namespace) = &filter.namespace {
        if &agent.namespace != namespace {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if agent.status != status {
            return false;
        }
    }
    if let Some(capability) = &filter.capability {
        let cap = agent.capabilities.iter().find(|c| &c.name == capability);
        let Some(cap) = cap else { return false };
        if !filter
            .capability_tags
            .iter()
            .all(|t| cap.tags.iter().any(|existing| existing == t))
        {
            return false;
        }
    }
    true
}

fn assemble_agent(row: AgentRow, capabilities: Vec<Capability>) -> Agent {
    Agent {
        id: row.id,
        name: row.name,
        namespace: row.namespace,
        version: row.version,
        endpoint: row.endpoint,
        agent_type: row.agent_type,
        status: row.status,
        last_heartbeat: row.last_heartbeat,
        health_interval_s: row.health_interval_s,
        timeout_threshold_s: row.timeout_threshold_s,
        eviction_threshold_s: row.eviction_threshold_s,
        capabilities,
        dependencies: row.dependencies,
        created_at: row.created_at,
        updated_at: row.updated_at,
        resource_version: row.resource_version,
    }
}

/// Fetch the `agents` row's own columns through any sqlx executor — a bare
/// pool reference for top-level reads, or a live transaction borrow when
/// called from inside one of the mutating methods above.
async fn fetch_agent_row<'c, E>(executor: E, agent_id: &str) -> Result<Option<AgentRow>, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Any>,
{
    let row = sqlx::query(
        r#"SELECT id, name, namespace, version, endpoint, agent_type, status,
                  last_heartbeat, health_interval_s, timeout_threshold_s, eviction_threshold_s,
                  dependencies, created_at, updated_at, resource_version
           FROM agents WHERE id = ?"#,
    )
    .bind(agent_id)
    .fetch_optional(executor)
    .await?;

    let Some(row) = row else { return Ok(None) };

    let deps_text: String = row.get("dependencies");
    let dependencies: Vec<SelectorGroup> = serde_json::from_str(&deps_text).unwrap_or_default();

    Ok(Some(AgentRow {
        id: row.get("id"),
        name: row.get("name"),
        namespace: row.get("namespace"),
        version: row.get("version"),
        endpoint: row.get("endpoint"),
        agent_type: row.get("agent_type"),
        status: status_from_str(row.get::<String, _>("status").as_str()),
        last_heartbeat: row.get("last_heartbeat"),
        health_interval_s: row.get::<Option<i64>, _>("health_interval_s").map(|v| v as u64),
        timeout_threshold_s: row.get::<Option<i64>, _>("timeout_threshold_s").map(|v| v as u64),
        eviction_threshold_s: row.get::<Option<i64>, _>("eviction_threshold_s").map(|v| v as u64),
        dependencies,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        resource_version: row.get("resource_version"),
    }))
}

async fn fetch_capabilities<'c, E>(executor: E, agent_id: &str) -> Result<Vec<Capability>, StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Any>,
{
    let cap_rows = sqlx::query(
        "SELECT name, description, version, tags FROM capabilities WHERE agent_id = ? ORDER BY name ASC",
    )
    .bind(agent_id)
    .fetch_all(executor)
    .await?;

    Ok(cap_rows
        .into_iter()
        .map(|cr| {
            let tags_text: String = cr.get("tags");
            Capability {
                name: cr.get("name"),
                description: cr.get("description"),
                version: cr.get("version"),
                tags: serde_json::from_str(&tags_text).unwrap_or_default(),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_agent(id: &str, endpoint: &str, capability: &str) -> Agent {
        Agent {
            id: id.to_string(),
            name: id.to_string(),
            namespace: "default".to_string(),
            version: "1.0.0".to_string(),
            endpoint: endpoint.to_string(),
            agent_type: "mesh-agent".to_string(),
            status: AgentStatus::Healthy,
            last_heartbeat: Some(0),
            health_interval_s: None,
            timeout_threshold_s: None,
            eviction_threshold_s: None,
            capabilities: vec![Capability {
                name: capability.to_string(),
                description: "".to_string(),
                version: "1.0.0".to_string(),
                tags: vec!["fast".to_string()],
            }],
            dependencies: vec![],
            created_at: 0,
            updated_at: 0,
            resource_version: 0,
        }
    }

    async fn memory_store() -> Store {
        Store::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_upsert_then_get_round_trips_capabilities() {
        let store = memory_store().await;
        let agent = sample_agent("sys-1", "http://h:9002", "date_service");

        let stored = store.upsert_agent(&agent).await.unwrap();
        assert_eq!(stored.capabilities.len(), 1);
        assert_eq!(stored.capabilities[0].name, "date_service");

        let fetched = store.get_agent("sys-1").await.unwrap().unwrap();
        assert_eq!(fetched.endpoint, "http://h:9002");
        assert_eq!(fetched.capabilities[0].tags, vec!["fast".to_string()]);
    }

    #[tokio::test]
    async fn test_resource_version_strictly_increases_on_mutation() {
        let store = memory_store().await;
        let agent = sample_agent("sys-2", "http://h:9003", "weather_data");

        let first = store.upsert_agent(&agent).await.unwrap();
        let second = store.touch_heartbeat("sys-2", AgentStatus::Healthy).await.unwrap();
        assert!(second.resource_version > first.resource_version);
    }

    #[tokio::test]
    async fn test_touch_heartbeat_unknown_agent_is_not_found() {
        let store = memory_store().await;
        let result = store.touch_heartbeat("ghost", AgentStatus::Healthy).await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_mark_status_is_noop_when_unchanged() {
        let store = memory_store().await;
        let agent = sample_agent("sys-3", "http://h:9004", "date_service");
        let stored = store.upsert_agent(&agent).await.unwrap();

        store.mark_status("sys-3", AgentStatus::Healthy, 0).await.unwrap();
        let after = store.get_agent("sys-3").await.unwrap().unwrap();
        assert_eq!(after.resource_version, stored.resource_version);
    }

    #[tokio::test]
    async fn test_mark_status_writes_health_event_on_transition() {
        let store = memory_store().await;
        let agent = sample_agent("sys-4", "http://h:9005", "date_service");
        store.upsert_agent(&agent).await.unwrap();

        store.mark_status("sys-4", AgentStatus::Degraded, 1000).await.unwrap();

        let events = store.health_events("sys-4", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from_status, AgentStatus::Healthy);
        assert_eq!(events[0].to_status, AgentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_list_healthy_providers_filters_by_capability_and_status() {
        let store = memory_store().await;
        store.upsert_agent(&sample_agent("sys-5", "http://h:1", "date_service")).await.unwrap();
        store.upsert_agent(&sample_agent("sys-6", "http://h:2", "weather_data")).await.unwrap();
        store.mark_status("sys-6", AgentStatus::Expired, 0).await.unwrap();

        let providers = store.list_healthy_providers("date_service").await.unwrap();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].id, "sys-5");
    }

    #[tokio::test]
    async fn test_reregistration_with_different_endpoint_overwrites() {
        let store = memory_store().await;
        store.upsert_agent(&sample_agent("sys-7", "http://h:1", "date_service")).await.unwrap();
        let updated = store
            .upsert_agent(&sample_agent("sys-7", "http://h:2", "date_service"))
            .await
            .unwrap();

        assert_eq!(updated.endpoint, "http://h:2");
    }
}
