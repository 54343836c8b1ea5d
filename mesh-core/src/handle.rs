//! Agent handle for controlling the runtime and receiving events.
//!
//! The `AgentHandle` is returned when starting an agent and provides an
//! async event stream for topology updates, current state queries, and
//! shutdown control, independent of anything the runtime loop is doing.

use std::collections::HashMap;
use std::sync::Arc;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::events::{HealthStatus, MeshEvent};
use crate::proxy::{ProxyCallError, ProxyTable};

/// Internal state shared between handle and runtime.
pub struct HandleState {
    /// Current dependency endpoints (selector name -> endpoint)
    pub dependencies: HashMap<String, String>,
    /// Current health status
    pub health_status: HealthStatus,
    /// Whether shutdown has been requested
    pub shutdown_requested: bool,
    /// Agent ID assigned by registry
    pub agent_id: Option<String>,
}

impl Default for HandleState {
    fn default() -> Self {
        Self {
            dependencies: HashMap::new(),
            health_status: HealthStatus::Healthy,
            shutdown_requested: false,
            agent_id: None,
        }
    }
}

/// Handle to a running agent runtime.
///
/// Cloneable-by-reference: the receiver is wrapped in an `Arc<Mutex<_>>` so
/// multiple clones can share the same event stream, though in practice only
/// one task should be draining it at a time.
pub struct AgentHandle {
    event_rx: Arc<Mutex<mpsc::Receiver<MeshEvent>>>,
    state: Arc<RwLock<HandleState>>,
    shutdown_tx: mpsc::Sender<()>,
    proxy_table: Arc<ProxyTable>,
    http_client: Client,
}

impl AgentHandle {
    /// Create a new handle with the given channels.
    pub fn new(
        event_rx: mpsc::Receiver<MeshEvent>,
        state: Arc<RwLock<HandleState>>,
        shutdown_tx: mpsc::Sender<()>,
        proxy_table: Arc<ProxyTable>,
        http_client: Client,
    ) -> Self {
        Self {
            event_rx: Arc::new(Mutex::new(event_rx)),
            state,
            shutdown_tx,
            proxy_table,
            http_client,
        }
    }

    /// Get a reference to the shared state.
    pub fn state(&self) -> Arc<RwLock<HandleState>> {
        self.state.clone()
    }

    /// Invoke a resolved dependency by selector name.
    ///
    /// Returns `Ok(None)` if the selector currently has no matching
    /// provider — user code is contractually required to tolerate absence,
    /// never treat it as an error.
    pub async fn call(
        &self,
        selector_name: &str,
        params: Value,
    ) -> Result<Option<Value>, ProxyCallError> {
        match self.proxy_table.get(selector_name).await {
            Some(proxy) => proxy.call(&self.http_client, params).await.map(Some),
            None => Ok(None),
        }
    }

    /// Wait for and return the next mesh event.
    ///
    /// Blocks until an event is available, returning a `Shutdown` event if
    /// the channel has closed.
    pub async fn next_event(&self) -> MeshEvent {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await.unwrap_or_else(MeshEvent::shutdown)
    }

    /// Get current dependency endpoints, a snapshot of the current state.
    pub async fn dependencies(&self) -> HashMap<String, String> {
        self.state.read().await.dependencies.clone()
    }

    /// Get current agent health status.
    pub async fn status(&self) -> HealthStatus {
        self.state.read().await.health_status
    }

    /// Get the agent ID assigned by the registry, or `None` if not yet registered.
    pub async fn agent_id(&self) -> Option<String> {
        self.state.read().await.agent_id.clone()
    }

    /// Check if shutdown has been requested.
    pub async fn is_shutdown_requested(&self) -> bool {
        self.state.read().await.shutdown_requested
    }

    /// Request graceful shutdown of the agent runtime.
    ///
    /// Signals the runtime to stop heartbeats and unregister. The next call
    /// to [`AgentHandle::next_event`] will eventually return a shutdown event.
    pub async fn shutdown(&self) {
        self.state.write().await.shutdown_requested = true;
        let _ = self.shutdown_tx.try_send(());
    }

    /// Synchronous, non-blocking variants used by the runtime loop itself,
    /// which never holds the handle across an await point shared with callers.
    pub fn dependencies_blocking(&self) -> HashMap<String, String> {
        self.state.blocking_read().dependencies.clone()
    }

    /// Synchronous shutdown-requested check.
    pub fn is_shutdown_requested_blocking(&self) -> bool {
        self.state.blocking_read().shutdown_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_state() {
        let (event_tx, event_rx) = mpsc::channel(10);
        let (shutdown_tx, _shutdown_rx) = mpsc::channel(1);
        let state = Arc::new(RwLock::new(HandleState::default()));

        let handle = AgentHandle::new(
            event_rx,
            state.clone(),
            shutdown_tx,
            Arc::new(ProxyTable::new()),
            Client::new(),
        );

        {
            let mut s = state.write().await;
            s.agent_id = Some("test-agent".to_string());
            s.dependencies
                .insert("date-service".to_string(), "http://localhost:9001".to_string());
        }

        assert_eq!(handle.agent_id().await, Some("test-agent".to_string()));
        assert_eq!(handle.dependencies().await.len(), 1);

        event_tx
            .send(MeshEvent::dependency_available(
                "weather".to_string(),
                "weather".to_string(),
                "http://localhost:9002".to_string(),
                "weather-agent".to_string(),
            ))
            .await
            .unwrap();

        let event = handle.next_event().await;
        assert_eq!(event.selector_name, Some("weather".to_string()));

        drop(event_tx);
    }

    #[tokio::test]
    async fn test_handle_shutdown() {
        let (_event_tx, event_rx) = mpsc::channel(10);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let state = Arc::new(RwLock::new(HandleState::default()));

        let handle = AgentHandle::new(
            event_rx,
            state.clone(),
            shutdown_tx,
            Arc::new(ProxyTable::new()),
            Client::new(),
        );

        handle.shutdown().await;

        assert!(handle.is_shutdown_requested().await);
        assert!(shutdown_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_next_event_after_channel_closed_returns_shutdown() {
        let (event_tx, event_rx) = mpsc::channel(10);
        let (shutdown_tx, _shutdown_rx) = mpsc::channel(1);
        let state = Arc::new(RwLock::new(HandleState::default()));
        let handle = AgentHandle::new(
            event_rx,
            state,
            shutdown_tx,
            Arc::new(ProxyTable::new()),
            Client::new(),
        );

        drop(event_tx);

        let event = handle.next_event().await;
        assert_eq!(event.event_type, crate::events::EventType::Shutdown);
    }
}
