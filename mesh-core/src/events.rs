//! Event types emitted by the agent runtime.
//!
//! Events are pushed from the [`crate::runtime::AgentRuntime`] to whatever
//! consumes [`crate::handle::AgentHandle`] via an async channel, so that
//! topology changes can be observed without polling the Proxy Table.

use serde::{Deserialize, Serialize};

/// Type of mesh event.
///
/// Serializes to snake_case strings for wire/log stability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Agent successfully registered with the mesh registry
    AgentRegistered,
    /// Agent registration failed
    RegistrationFailed,
    /// A selector's dependency became available
    DependencyAvailable,
    /// A selector's dependency became unavailable (resolved to null)
    DependencyUnavailable,
    /// A selector's resolved provider changed (endpoint or agent)
    DependencyChanged,
    /// Agent health status changed
    HealthStatusChanged,
    /// Connected to registry
    RegistryConnected,
    /// Disconnected from registry
    RegistryDisconnected,
    /// Agent runtime is shutting down
    #[default]
    Shutdown,
}

impl EventType {
    /// Convert to the string representation used in serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentRegistered => "agent_registered",
            EventType::RegistrationFailed => "registration_failed",
            EventType::DependencyAvailable => "dependency_available",
            EventType::DependencyUnavailable => "dependency_unavailable",
            EventType::DependencyChanged => "dependency_changed",
            EventType::HealthStatusChanged => "health_status_changed",
            EventType::RegistryConnected => "registry_connected",
            EventType::RegistryDisconnected => "registry_disconnected",
            EventType::Shutdown => "shutdown",
        }
    }
}

/// Health status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Agent is fully operational
    Healthy,
    /// Agent has reduced functionality
    Degraded,
    /// Agent is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Convert to registry API status string
    pub fn as_api_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::Healthy
    }
}

/// Events emitted by the agent runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshEvent {
    /// Event type identifier
    pub event_type: EventType,

    // Fields for dependency events
    /// The selector name this event concerns (Proxy Table key)
    pub selector_name: Option<String>,
    /// Resolved capability name (for dependency_available/dependency_changed)
    pub capability: Option<String>,
    /// Endpoint URL (for dependency_available/dependency_changed)
    pub endpoint: Option<String>,
    /// Agent ID (for dependency events)
    pub agent_id: Option<String>,

    // Fields for error/status events
    /// Error message (for error events)
    pub error: Option<String>,
    /// Health status (for health events)
    pub status: Option<HealthStatus>,
    /// Reason for event (for disconnect events)
    pub reason: Option<String>,
}

impl MeshEvent {
    /// Create an "agent_registered" event
    pub fn agent_registered(agent_id: String) -> Self {
        Self {
            event_type: EventType::AgentRegistered,
            agent_id: Some(agent_id),
            ..Default::default()
        }
    }

    /// Create a "registration_failed" event
    pub fn registration_failed(error: String) -> Self {
        Self {
            event_type: EventType::RegistrationFailed,
            error: Some(error),
            ..Default::default()
        }
    }

    /// Create a "dependency_available" event
    pub fn dependency_available(
        selector_name: String,
        capability: String,
        endpoint: String,
        agent_id: String,
    ) -> Self {
        Self {
            event_type: EventType::DependencyAvailable,
            selector_name: Some(selector_name),
            capability: Some(capability),
            endpoint: Some(endpoint),
            agent_id: Some(agent_id),
            ..Default::default()
        }
    }

    /// Create a "dependency_unavailable" event
    pub fn dependency_unavailable(selector_name: String) -> Self {
        Self {
            event_type: EventType::DependencyUnavailable,
            selector_name: Some(selector_name),
            ..Default::default()
        }
    }

    /// Create a "dependency_changed" event (resolved endpoint or agent changed)
    pub fn dependency_changed(
        selector_name: String,
        capability: String,
        endpoint: String,
        agent_id: String,
    ) -> Self {
        Self {
            event_type: EventType::DependencyChanged,
            selector_name: Some(selector_name),
            capability: Some(capability),
            endpoint: Some(endpoint),
            agent_id: Some(agent_id),
            ..Default::default()
        }
    }

    /// Create a "health_status_changed" event
    pub fn health_status_changed(status: HealthStatus) -> Self {
        Self {
            event_type: EventType::HealthStatusChanged,
            status: Some(status),
            ..Default::default()
        }
    }

    /// Create a "registry_connected" event
    pub fn registry_connected() -> Self {
        Self {
            event_type: EventType::RegistryConnected,
            ..Default::default()
        }
    }

    /// Create a "registry_disconnected" event
    pub fn registry_disconnected(reason: String) -> Self {
        Self {
            event_type: EventType::RegistryDisconnected,
            reason: Some(reason),
            ..Default::default()
        }
    }

    /// Create a "shutdown" event
    pub fn shutdown() -> Self {
        Self {
            event_type: EventType::Shutdown,
            ..Default::default()
        }
    }
}
