//! Agent runtime - the main background task that manages heartbeats and topology.
//!
//! The runtime:
//! - Runs in a background tokio task
//! - Drives the heartbeat state machine (fast HEAD checks, full POST heartbeats)
//! - Diffs each resolved dependency snapshot against the Proxy Table and
//!   emits topology events to whatever is draining the paired `AgentHandle`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;
use tracing::{info, trace, warn};

use crate::events::MeshEvent;
use crate::handle::HandleState;
use crate::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatStateMachine};
use crate::proxy::{ProxyConfig, ProxyHandle, ProxyTable};
use crate::registry::{DependencySnapshot, RegistryClient, ResolvedProvider};
use crate::spec::AgentSpec;

/// Configuration for the agent runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Heartbeat configuration
    pub heartbeat: HeartbeatConfig,
    /// Event channel buffer size
    pub event_buffer_size: usize,
    /// Default per-proxy configuration for newly-instantiated dependency proxies
    pub proxy: ProxyConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            event_buffer_size: 100,
            proxy: ProxyConfig::default(),
        }
    }
}

/// The agent runtime that runs in the background.
pub struct AgentRuntime {
    spec: AgentSpec,
    config: RuntimeConfig,
    registry_client: RegistryClient,
    state_machine: HeartbeatStateMachine,
    /// Last-seen resolved provider per selector, used to diff incoming snapshots.
    resolved: HashMap<String, ResolvedProvider>,
    /// Last-known resource_version, sent on every fast heartbeat check.
    known_rv: i64,
    proxy_table: Arc<ProxyTable>,
    http_client: Client,
    event_tx: mpsc::Sender<MeshEvent>,
    shared_state: Arc<RwLock<HandleState>>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl AgentRuntime {
    /// Create a new agent runtime.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spec: AgentSpec,
        config: RuntimeConfig,
        proxy_table: Arc<ProxyTable>,
        event_tx: mpsc::Sender<MeshEvent>,
        shared_state: Arc<RwLock<HandleState>>,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<Self, crate::registry::RegistryError> {
        let registry_client = RegistryClient::new(&spec.registry_url)?;
        let heartbeat_config = HeartbeatConfig {
            interval: Duration::from_secs(spec.heartbeat_interval),
            ..config.heartbeat.clone()
        };
        let state_machine = HeartbeatStateMachine::new(heartbeat_config);

        Ok(Self {
            spec,
            config,
            registry_client,
            state_machine,
            resolved: HashMap::new(),
            known_rv: 0,
            proxy_table,
            http_client: Client::new(),
            event_tx,
            shared_state,
            shutdown_rx,
        })
    }

    /// Run the agent runtime loop.
    ///
    /// This is the main entry point that runs until shutdown is requested.
    pub async fn run(mut self) {
        info!("Starting agent runtime for '{}'", self.spec.name);

        loop {
            // Check for shutdown signal (non-blocking)
            if self.shutdown_rx.try_recv().is_ok() {
                info!("Shutdown signal received");
                self.state_machine.shutdown();
            }

            if self.state_machine.is_shutting_down() {
                self.notify_registry_of_shutdown().await;
                break;
            }

            // Determine next action
            let action = self.state_machine.next_action();
            trace!("Next action: {:?}", action);

            match action {
                HeartbeatAction::SendFull => {
                    self.send_full_heartbeat().await;
                }
                HeartbeatAction::SendFast => {
                    self.send_fast_heartbeat().await;
                }
                HeartbeatAction::Wait(duration) => {
                    trace!("Waiting {:?} until next heartbeat", duration);
                    tokio::select! {
                        _ = sleep(duration) => {}
                        _ = self.shutdown_rx.recv() => {
                            info!("Shutdown signal received during wait");
                            self.state_machine.shutdown();
                        }
                    }
                }
                HeartbeatAction::Retry { attempt, backoff } => {
                    warn!("Retry attempt {} with backoff {:?}", attempt, backoff);
                    tokio::select! {
                        _ = sleep(backoff) => {}
                        _ = self.shutdown_rx.recv() => {
                            info!("Shutdown signal received during backoff");
                            self.state_machine.shutdown();
                        }
                    }
                    // After backoff, try full registration
                    self.send_full_heartbeat().await;
                }
                HeartbeatAction::None => {
                    break;
                }
            }
        }

        let _ = self.event_tx.send(MeshEvent::shutdown()).await;
        info!("Agent runtime for '{}' stopped", self.spec.name);
    }

    /// Best-effort final heartbeat on the way out.
    ///
    /// The wire contract has no dedicated deregistration endpoint; sending a
    /// last heartbeat lets the registry's eviction path run sooner than
    /// waiting out the timeout threshold. Failures here are logged and
    /// otherwise ignored - shutdown must never block on the network.
    async fn notify_registry_of_shutdown(&self) {
        let agent_id = self.spec.agent_id();
        info!("Notifying registry of shutdown for agent '{}'", agent_id);

        if let Err(e) = self
            .registry_client
            .send_heartbeat(&agent_id, self.state_machine.health_status())
            .await
        {
            warn!(
                "Final shutdown heartbeat failed for agent '{}' (continuing shutdown): {}",
                agent_id, e
            );
        }
    }

    /// Send a fast heartbeat check (HEAD request).
    async fn send_fast_heartbeat(&mut self) {
        let agent_id = self.spec.agent_id();
        let (status, current_rv) = self
            .registry_client
            .fast_heartbeat_check(&agent_id, self.known_rv)
            .await;

        if let Some(rv) = current_rv {
            self.known_rv = rv;
        }

        let action = self.state_machine.on_fast_heartbeat_result(status);

        if action == HeartbeatAction::SendFull {
            self.send_full_heartbeat().await;
        }
    }

    /// Send a full heartbeat, or register if this is the first attempt.
    async fn send_full_heartbeat(&mut self) {
        let result = if self.state_machine.is_registered() {
            self.registry_client
                .send_heartbeat(&self.spec.agent_id(), self.state_machine.health_status())
                .await
        } else {
            self.registry_client.register(&self.spec).await
        };

        match result {
            Ok(snapshot) => {
                let was_registered = self.state_machine.is_registered();
                self.state_machine.on_full_heartbeat_success();
                self.known_rv = snapshot.resource_version;

                {
                    let mut state = self.shared_state.write().await;
                    state.agent_id = Some(snapshot.agent_id.clone());
                }

                self.process_dependency_snapshot(snapshot).await;

                if !was_registered {
                    let _ = self
                        .event_tx
                        .send(MeshEvent::agent_registered(self.spec.agent_id()))
                        .await;
                }
            }
            Err(e) => {
                self.state_machine.on_full_heartbeat_failure(&e.to_string());
                let _ = self
                    .event_tx
                    .send(MeshEvent::registration_failed(e.to_string()))
                    .await;
            }
        }
    }

    /// Diff a resolved-dependency snapshot against the Proxy Table and the
    /// locally-tracked state, emitting one event per selector whose resolved
    /// provider changed: a selector is either absent, newly available,
    /// unchanged, or pointing at a different agent/endpoint than before.
    async fn process_dependency_snapshot(&mut self, snapshot: DependencySnapshot) {
        let DependencySnapshot {
            dependencies_resolved,
            ..
        } = snapshot;

        let mut retired: Vec<String> = Vec::new();
        let mut upserts: Vec<(String, ResolvedProvider, bool)> = Vec::new(); // (selector, provider, is_new)

        for selector_name in self.resolved.keys().cloned().collect::<Vec<_>>() {
            let still_present = dependencies_resolved
                .get(&selector_name)
                .map(|p| p.is_some())
                .unwrap_or(false);
            if !still_present {
                retired.push(selector_name);
            }
        }

        for (selector_name, provider) in dependencies_resolved.into_iter() {
            let Some(provider) = provider else { continue };

            let changed = match self.resolved.get(&selector_name) {
                Some(old) => old.agent_id != provider.agent_id || old.endpoint != provider.endpoint,
                None => true,
            };
            if changed {
                let is_new = !self.resolved.contains_key(&selector_name);
                upserts.push((selector_name, provider, is_new));
            }
        }

        if retired.is_empty() && upserts.is_empty() {
            return;
        }

        for selector_name in &retired {
            info!("Selector '{}' resolved to no provider", selector_name);
            self.proxy_table.set(selector_name, None).await;
            self.resolved.remove(selector_name);
        }

        for (selector_name, provider, is_new) in &upserts {
            let proxy = ProxyHandle::new(
                provider.capability.clone(),
                provider.agent_id.clone(),
                provider.endpoint.clone(),
                self.config.proxy.clone(),
            );
            self.proxy_table.set(selector_name, Some(proxy)).await;
            self.resolved.insert(selector_name.clone(), provider.clone());

            if *is_new {
                info!(
                    "Selector '{}' resolved to {} at {}",
                    selector_name, provider.agent_id, provider.endpoint
                );
            } else {
                info!(
                    "Selector '{}' re-resolved to {} at {}",
                    selector_name, provider.agent_id, provider.endpoint
                );
            }
        }

        {
            let mut state = self.shared_state.write().await;
            for selector_name in &retired {
                state.dependencies.remove(selector_name);
            }
            for (selector_name, provider, _) in &upserts {
                state
                    .dependencies
                    .insert(selector_name.clone(), provider.endpoint.clone());
            }
        }

        for selector_name in retired {
            let _ = self
                .event_tx
                .send(MeshEvent::dependency_unavailable(selector_name))
                .await;
        }

        for (selector_name, provider, is_new) in upserts {
            let event = if is_new {
                MeshEvent::dependency_available(
                    selector_name,
                    provider.capability,
                    provider.endpoint,
                    provider.agent_id,
                )
            } else {
                MeshEvent::dependency_changed(
                    selector_name,
                    provider.capability,
                    provider.endpoint,
                    provider.agent_id,
                )
            };
            let _ = self.event_tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runtime_config_default() {
        let config = RuntimeConfig::default();
        assert_eq!(config.event_buffer_size, 100);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_runtime_construction_builds_heartbeat_interval_from_spec() {
        let spec = AgentSpec::new(
            "test-agent".to_string(),
            "http://localhost:8000".to_string(),
            "1.0.0".to_string(),
            "".to_string(),
            9000,
            "localhost".to_string(),
            "default".to_string(),
            None,
            None,
            42,
        );
        let (event_tx, _event_rx) = mpsc::channel(10);
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let shared_state = Arc::new(RwLock::new(HandleState::default()));

        let runtime = AgentRuntime::new(
            spec,
            RuntimeConfig::default(),
            Arc::new(ProxyTable::new()),
            event_tx,
            shared_state,
            shutdown_rx,
        )
        .unwrap();

        assert_eq!(
            runtime.state_machine.health_status(),
            crate::events::HealthStatus::Healthy
        );
    }
}
