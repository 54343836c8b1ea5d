//! Registry client for communicating with the MCP Mesh Registry.
//!
//! Handles:
//! - Registration (`POST /agents/register_with_metadata`)
//! - Fast heartbeat checks (`HEAD /heartbeat`)
//! - Full heartbeats (`POST /heartbeat`)
//! - Response parsing for dependency topology snapshots

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::events::HealthStatus;
use crate::spec::{AgentSpec, SelectorGroup};

/// Errors that can occur during registry communication.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("registry returned error: {status} - {message}")]
    RegistryError { status: u16, message: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Outcome of a fast heartbeat check (`HEAD /heartbeat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastHeartbeatStatus {
    /// `200 OK` - no topology-visible change since the caller's last known `rv`.
    NoChange,
    /// `202 Accepted` - topology changed, caller should follow up with a full heartbeat.
    TopologyChanged,
    /// `410 Gone` - the caller's `agent_id` is unknown; it must re-register.
    Unknown,
    /// Transient failure (5xx or network/connect error) - retry with backoff.
    Transient,
}

impl FastHeartbeatStatus {
    /// Map an HTTP status code to an outcome. Anything not explicitly listed
    /// in the wire contract is treated as transient.
    pub fn from_status_code(code: u16) -> Self {
        match code {
            200 => Self::NoChange,
            202 => Self::TopologyChanged,
            410 => Self::Unknown,
            _ => Self::Transient,
        }
    }

    /// Whether the caller should issue a full `POST /heartbeat`.
    pub fn requires_full_heartbeat(&self) -> bool {
        matches!(self, Self::TopologyChanged)
    }

    /// Whether the caller must transition back to `REGISTERING`.
    pub fn requires_reregistration(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Whether this is a transient failure the runtime should just log and continue beating through.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// A provider resolved for a single selector, exactly as returned in
/// `dependencies_resolved`. `None` means the selector had no matching
/// healthy provider — never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedProvider {
    pub agent_id: String,
    pub endpoint: String,
    pub capability: String,
    pub status: String,
}

/// A capability offered by the registering agent, wire shape for
/// `metadata.capabilities[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRegistration {
    pub name: String,
    pub description: String,
    pub version: String,
    pub tags: Vec<String>,
}

/// `metadata` object nested inside the registration request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub endpoint: String,
    pub agent_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_threshold: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eviction_threshold: Option<u64>,
    pub capabilities: Vec<CapabilityRegistration>,
    pub dependencies: Vec<SelectorGroup>,
}

/// Body of `POST /agents/register_with_metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub agent_id: String,
    pub metadata: AgentMetadata,
}

impl RegisterRequest {
    /// Build the registration request from an [`AgentSpec`].
    pub fn from_spec(spec: &AgentSpec) -> Self {
        let capabilities = spec
            .tools
            .iter()
            .map(|t| CapabilityRegistration {
                name: t.capability.clone(),
                description: t.description.clone(),
                version: t.version.clone(),
                tags: t.tags.clone(),
            })
            .collect();

        Self {
            agent_id: spec.agent_id(),
            metadata: AgentMetadata {
                name: spec.name.clone(),
                namespace: spec.namespace.clone(),
                version: spec.version.clone(),
                endpoint: format!("http://{}:{}", spec.http_host, spec.http_port),
                agent_type: spec.agent_type.as_str().to_string(),
                health_interval: spec.thresholds.health_interval_s,
                timeout_threshold: spec.thresholds.timeout_threshold_s,
                eviction_threshold: spec.thresholds.eviction_threshold_s,
                capabilities,
                dependencies: spec.dependencies.clone(),
            },
        }
    }
}

/// Body of `POST /heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: String,
    pub status: String,
}

impl HeartbeatRequest {
    pub fn new(agent_id: String, status: HealthStatus) -> Self {
        Self {
            agent_id,
            status: status.as_api_str().to_string(),
        }
    }
}

/// Response shared by registration and full heartbeat — identical shape
/// for both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySnapshot {
    pub status: String,
    pub agent_id: String,
    pub resource_version: i64,
    #[serde(default)]
    pub dependencies_resolved: HashMap<String, Option<ResolvedProvider>>,
}

/// Client for communicating with the MCP Mesh Registry.
pub struct RegistryClient {
    client: Client,
    base_url: String,
}

impl RegistryClient {
    /// Create a new registry client.
    pub fn new(registry_url: &str) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let base_url = registry_url.trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    /// Perform a fast heartbeat check (`HEAD /heartbeat?agent_id=&rv=`).
    ///
    /// Returns the outcome and, when present, the `X-Current-RV` header
    /// value (parsed as `i64`).
    pub async fn fast_heartbeat_check(
        &self,
        agent_id: &str,
        known_rv: i64,
    ) -> (FastHeartbeatStatus, Option<i64>) {
        let url = format!(
            "{}/heartbeat?agent_id={}&rv={}",
            self.base_url, agent_id, known_rv
        );

        trace!("sending fast heartbeat HEAD request to {}", url);

        match self.client.head(&url).send().await {
            Ok(response) => {
                let status = FastHeartbeatStatus::from_status_code(response.status().as_u16());
                let current_rv = response
                    .headers()
                    .get("X-Current-RV")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<i64>().ok());
                debug!(
                    "fast heartbeat for agent '{}': HTTP {} -> {:?} (rv={:?})",
                    agent_id,
                    response.status().as_u16(),
                    status,
                    current_rv
                );
                (status, current_rv)
            }
            Err(e) => {
                warn!("fast heartbeat failed for agent '{}': {}", agent_id, e);
                (FastHeartbeatStatus::Transient, None)
            }
        }
    }

    /// Register this agent with the registry, returning the resolved
    /// dependency snapshot.
    pub async fn register(&self, spec: &AgentSpec) -> Result<DependencySnapshot, RegistryError> {
        let url = format!("{}/agents/register_with_metadata", self.base_url);
        let request = RegisterRequest::from_spec(spec);

        info!("registering agent '{}' with registry", request.agent_id);
        trace!("registration request: {:?}", request);

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            let parsed: DependencySnapshot = serde_json::from_str(&body)?;
            info!(
                "registered agent '{}': rv={}, {} dependencies resolved",
                parsed.agent_id,
                parsed.resource_version,
                parsed.dependencies_resolved.len()
            );
            Ok(parsed)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RegistryError::RegistryError {
                status: status.as_u16(),
                message: body,
            })
        }
    }

    /// Send a full heartbeat (`POST /heartbeat`), returning the resolved
    /// dependency snapshot.
    pub async fn send_heartbeat(
        &self,
        agent_id: &str,
        status_hint: HealthStatus,
    ) -> Result<DependencySnapshot, RegistryError> {
        let url = format!("{}/heartbeat", self.base_url);
        let request = HeartbeatRequest::new(agent_id.to_string(), status_hint);

        debug!("sending full heartbeat for agent '{}'", agent_id);

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            let parsed: DependencySnapshot = serde_json::from_str(&body)?;
            info!(
                "heartbeat successful for agent '{}': rv={}, {} dependencies resolved",
                agent_id,
                parsed.resource_version,
                parsed.dependencies_resolved.len()
            );
            Ok(parsed)
        } else if status.as_u16() == 404 {
            Err(RegistryError::RegistryError {
                status: 404,
                message: "agent unknown to registry".to_string(),
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RegistryError::RegistryError {
                status: status.as_u16(),
                message: body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ToolSpec;

    #[test]
    fn test_fast_heartbeat_status_from_code() {
        assert_eq!(
            FastHeartbeatStatus::from_status_code(200),
            FastHeartbeatStatus::NoChange
        );
        assert_eq!(
            FastHeartbeatStatus::from_status_code(202),
            FastHeartbeatStatus::TopologyChanged
        );
        assert_eq!(
            FastHeartbeatStatus::from_status_code(410),
            FastHeartbeatStatus::Unknown
        );
        assert_eq!(
            FastHeartbeatStatus::from_status_code(503),
            FastHeartbeatStatus::Transient
        );
    }

    #[test]
    fn test_fast_heartbeat_status_decisions() {
        assert!(!FastHeartbeatStatus::NoChange.requires_full_heartbeat());
        assert!(FastHeartbeatStatus::TopologyChanged.requires_full_heartbeat());
        assert!(FastHeartbeatStatus::Unknown.requires_reregistration());
        assert!(FastHeartbeatStatus::Transient.is_transient());
    }

    #[test]
    fn test_register_request_from_spec() {
        let spec = AgentSpec::new(
            "test-agent".to_string(),
            "http://localhost:8100".to_string(),
            "1.0.0".to_string(),
            "Test".to_string(),
            9000,
            "localhost".to_string(),
            "default".to_string(),
            None,
            Some(vec![ToolSpec::new(
                "greet".to_string(),
                "greeting".to_string(),
                "1.0.0".to_string(),
                "Greeting tool".to_string(),
                Some(vec!["utility".to_string()]),
                None,
                None,
                None,
            )]),
            5,
        );

        let request = RegisterRequest::from_spec(&spec);

        assert_eq!(request.agent_id, spec.agent_id());
        assert_eq!(request.metadata.capabilities.len(), 1);
        assert_eq!(request.metadata.capabilities[0].name, "greeting");
        assert_eq!(request.metadata.endpoint, "http://localhost:9000");
    }

    #[tokio::test]
    async fn test_register_success_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "status": "success",
            "agent_id": "test-agent-abc",
            "resource_version": 1700000000001i64,
            "dependencies_resolved": {
                "date_service": {
                    "agent_id": "sys-7f3a",
                    "endpoint": "http://10.0.0.8:9002",
                    "capability": "date_service",
                    "status": "healthy"
                }
            }
        });

        let mock = server
            .mock("POST", "/agents/register_with_metadata")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = RegistryClient::new(&server.url()).unwrap();
        let spec = AgentSpec::new(
            "test-agent".to_string(),
            server.url(),
            "1.0.0".to_string(),
            "".to_string(),
            9000,
            "localhost".to_string(),
            "default".to_string(),
            None,
            None,
            5,
        );

        let snapshot = client.register(&spec).await.unwrap();
        assert_eq!(snapshot.resource_version, 1700000000001);
        assert!(snapshot.dependencies_resolved.contains_key("date_service"));
        assert_eq!(
            snapshot.dependencies_resolved["date_service"]
                .as_ref()
                .unwrap()
                .agent_id,
            "sys-7f3a"
        );

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fast_heartbeat_check_parses_current_rv() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("HEAD", mockito::Matcher::Regex(r"^/heartbeat.*".to_string()))
            .with_status(202)
            .with_header("X-Current-RV", "42")
            .create_async()
            .await;

        let client = RegistryClient::new(&server.url()).unwrap();
        let (status, rv) = client.fast_heartbeat_check("test-agent", 40).await;

        assert_eq!(status, FastHeartbeatStatus::TopologyChanged);
        assert_eq!(rv, Some(42));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_agent_returns_404() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/heartbeat")
            .with_status(404)
            .create_async()
            .await;

        let client = RegistryClient::new(&server.url()).unwrap();
        let result = client.send_heartbeat("ghost-agent", HealthStatus::Healthy).await;

        assert!(result.is_err());
        mock.assert_async().await;
    }
}
