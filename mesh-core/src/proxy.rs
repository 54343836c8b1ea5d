//! Proxy Table: in-process map from selector name to a live callable handle.
//!
//! Rebuilt per-slot (not wholesale) on each topology change, per the single-
//! writer/many-reader contract: only the heartbeat handler mutates it, and
//! tool invocations take a cheap consistent snapshot of the slot they need.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

/// Per-dependency configuration carried alongside the resolved endpoint.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub timeout: Duration,
    pub retry_count: u32,
    pub streaming: bool,
    pub session_affinity: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_count: 0,
            streaming: false,
            session_affinity: false,
        }
    }
}

/// A live, callable handle bound to a resolved remote endpoint + capability.
///
/// Owns no long-lived socket; connection reuse is a transport concern left
/// to the underlying HTTP client's pool.
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    pub capability: String,
    pub agent_id: String,
    pub endpoint: String,
    pub config: ProxyConfig,
}

impl ProxyHandle {
    pub fn new(capability: String, agent_id: String, endpoint: String, config: ProxyConfig) -> Self {
        Self {
            capability,
            agent_id,
            endpoint,
            config,
        }
    }

    /// Invoke the bound capability as a single MCP JSON-RPC call over HTTP.
    ///
    /// A failed call does not invalidate the proxy — the next heartbeat is
    /// the canonical signal of topology change, not a single failed call.
    pub async fn call(&self, client: &Client, params: Value) -> Result<Value, ProxyCallError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": self.capability,
            "params": params,
            "id": 1,
        });

        let response = client
            .post(&self.endpoint)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProxyCallError::Timeout {
                        capability: self.capability.clone(),
                        endpoint: self.endpoint.clone(),
                    }
                } else {
                    ProxyCallError::Network {
                        capability: self.capability.clone(),
                        source: e,
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyCallError::Remote {
                capability: self.capability.clone(),
                status: status.as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| ProxyCallError::Network {
            capability: self.capability.clone(),
            source: e,
        })
    }
}

/// Classified failure of a remote proxy call.
#[derive(Debug, Error)]
pub enum ProxyCallError {
    #[error("timeout calling '{capability}' at {endpoint}")]
    Timeout { capability: String, endpoint: String },

    #[error("network error calling '{capability}': {source}")]
    Network {
        capability: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("remote error from '{capability}': HTTP {status}")]
    Remote { capability: String, status: u16 },
}

/// In-process map `selector_name -> ProxyHandle | absent`.
#[derive(Default)]
pub struct ProxyTable {
    slots: RwLock<HashMap<String, ProxyHandle>>,
}

impl ProxyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a cheap consistent snapshot of one slot. `None` means absent —
    /// user code is contractually required to tolerate this.
    pub async fn get(&self, selector_name: &str) -> Option<ProxyHandle> {
        self.slots.read().await.get(selector_name).cloned()
    }

    /// Replace, insert, or clear a single slot.
    pub async fn set(&self, selector_name: &str, handle: Option<ProxyHandle>) {
        let mut slots = self.slots.write().await;
        match handle {
            Some(h) => {
                slots.insert(selector_name.to_string(), h);
            }
            None => {
                slots.remove(selector_name);
            }
        }
    }

    /// Snapshot of all currently-bound selector names.
    pub async fn selector_names(&self) -> Vec<String> {
        self.slots.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}
