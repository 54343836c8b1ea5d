//! Background liveness scanner. Owns no network calls outward —
//! health is derived passively from `last_heartbeat` recency, never by
//! probing agents.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tracing::{debug, info};

use mcp_mesh_core::model::AgentStatus;

use crate::store::{AgentFilter, Store};

/// Default `(timeout_threshold_s, eviction_threshold_s)` per `agent_type`,
/// used when an agent carries no per-agent override. Purely a convenience
/// default table — operators are expected to override per-agent via
/// registration metadata for anything that needs different behavior.
fn agent_type_defaults() -> HashMap<&'static str, (u64, u64)> {
    HashMap::from([("mesh-agent", (20, 60)), ("api", (15, 45))])
}

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub scan_interval_s: u64,
    pub default_timeout_threshold_s: u64,
    pub default_eviction_threshold_s: u64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            scan_interval_s: 10,
            default_timeout_threshold_s: 20,
            default_eviction_threshold_s: 60,
        }
    }
}

/// Cumulative counters surfaced by `GET /health/monitoring`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MonitorStats {
    pub ticks: u64,
    pub transitions: u64,
    pub last_tick_at: Option<i64>,
}

pub struct HealthMonitor {
    store: Arc<Store>,
    config: HealthMonitorConfig,
    stats: Arc<RwLock<MonitorStats>>,
}

impl HealthMonitor {
    pub fn new(store: Arc<Store>, config: HealthMonitorConfig) -> Self {
        Self {
            store,
            config,
            stats: Arc::new(RwLock::new(MonitorStats::default())),
        }
    }

    pub fn stats_handle(&self) -> Arc<RwLock<MonitorStats>> {
        self.stats.clone()
    }

    /// Run the periodic scan loop forever. Intended to be `tokio::spawn`ed
    /// once from `main`.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.scan_interval_s));
        loop {
            interval.tick().await;
            if let Err(e) = self.scan_once().await {
                tracing::warn!("health monitor scan failed: {}", e);
            }
        }
    }

    /// One scan tick: recompute target status for every agent with a known
    /// heartbeat and write through `mark_status` where it differs.
    pub async fn scan_once(&self) -> Result<(), crate::error::StoreError> {
        let agents = self.store.list_agents(&AgentFilter::default()).await?;
        let now_s = now_seconds();
        let defaults = agent_type_defaults();
        let mut transitions = 0u64;

        for agent in agents {
            let Some(last_heartbeat_ms) = agent.last_heartbeat else {
                continue;
            };
            let elapsed_s = now_s - (last_heartbeat_ms / 1000);

            let (timeout, eviction) = match (agent.timeout_threshold_s, agent.eviction_threshold_s) {
                (Some(t), Some(e)) => (t, e),
                _ => defaults
                    .get(agent.agent_type.as_str())
                    .copied()
                    .unwrap_or((
                        self.config.default_timeout_threshold_s,
                        self.config.default_eviction_threshold_s,
                    )),
            };

            let target = if elapsed_s > eviction as i64 {
                AgentStatus::Expired
            } else if elapsed_s > timeout as i64 {
                AgentStatus::Degraded
            } else {
                AgentStatus::Healthy
            };

            if target != agent.status {
                debug!(
                    "agent '{}' {:?} -> {:?} (elapsed={}s, timeout={}s, eviction={}s)",
                    agent.id, agent.status, target, elapsed_s, timeout, eviction
                );
                self.store.mark_status(&agent.id, target, now_ms()).await?;
                transitions += 1;
            }
        }

        let mut stats = self.stats.write().await;
        stats.ticks += 1;
        stats.transitions += transitions;
        stats.last_tick_at = Some(now_ms());
        if transitions > 0 {
            info!("health monitor tick: {} status transition(s)", transitions);
        }
        Ok(())
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn now_seconds() -> i64 {
    now_ms() / 1000
}
