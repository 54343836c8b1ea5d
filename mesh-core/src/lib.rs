//! Core Rust library for MCP Mesh: selector algebra, the Resolver, the
//! Registry HTTP client, the agent-side runtime loop, and the Proxy Table.
//!
//! This crate is shared between the `registry` binary (Store, Health
//! Monitor, HTTP server - all built on [`model`] and [`resolver`]) and
//! agent processes (which drive [`runtime::AgentRuntime`] and read events
//! off the [`handle::AgentHandle`] it returns).

pub mod config;
pub mod events;
pub mod handle;
pub mod heartbeat;
pub mod model;
pub mod proxy;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod spec;
pub mod tracing_publish;

use std::sync::Arc;

use reqwest::Client;
use tokio::sync::{mpsc, RwLock};

pub use events::{EventType, HealthStatus, MeshEvent};
pub use handle::{AgentHandle, HandleState};
pub use registry::RegistryError;
pub use runtime::{AgentRuntime, RuntimeConfig};
pub use spec::AgentSpec;

use proxy::ProxyTable;

/// Start an agent's runtime loop as a background tokio task and return the
/// paired handle. This is the single entry point an embedding application
/// needs: it wires the event channel, shared state, Proxy Table, and
/// shutdown channel that [`AgentRuntime`] and [`AgentHandle`] share.
pub fn start_agent(
    spec: AgentSpec,
    config: RuntimeConfig,
) -> Result<AgentHandle, RegistryError> {
    let (event_tx, event_rx) = mpsc::channel(config.event_buffer_size);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let shared_state = Arc::new(RwLock::new(HandleState::default()));
    let proxy_table = Arc::new(ProxyTable::new());

    let runtime = AgentRuntime::new(
        spec,
        config,
        proxy_table.clone(),
        event_tx,
        shared_state.clone(),
        shutdown_rx,
    )?;

    tokio::spawn(runtime.run());

    Ok(AgentHandle::new(
        event_rx,
        shared_state,
        shutdown_tx,
        proxy_table,
        Client::new(),
    ))
}
