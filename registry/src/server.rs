//! Registry HTTP server. `axum` router plus handlers; every
//! mutating endpoint runs the Resolver against the freshest Store snapshot
//! before responding, so callers never see a stale dependency topology.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, head, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use mcp_mesh_core::model::{Agent, AgentStatus, Capability};
use mcp_mesh_core::registry::{DependencySnapshot, HeartbeatRequest, RegisterRequest, ResolvedProvider};
use mcp_mesh_core::resolver;

use crate::error::{RegistryApiError, StoreError};
use crate::health_monitor::MonitorStats;
use crate::store::{AgentFilter, Store};

#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<Store>,
    pub monitor_stats: Arc<RwLock<MonitorStats>>,
}

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/agents/register_with_metadata", post(register_agent))
        .route("/heartbeat", head(heartbeat_head).post(heartbeat_post))
        .route("/agents", get(list_agents_handler))
        .route("/capabilities", get(list_capabilities_handler))
        .route("/health", get(health_handler))
        .route("/health/monitoring", get(health_monitoring_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn status_from_hint(hint: &str) -> AgentStatus {
    match hint {
        "degraded" => AgentStatus::Degraded,
        "expired" => AgentStatus::Expired,
        _ => AgentStatus::Healthy,
    }
}

fn split_csv(raw: &Option<String>) -> Vec<String> {
    raw.as_deref()
        .map(|s| {
            s.split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Every currently-eligible provider's `resource_version`, maxed, across all
/// capability names the agent's declared dependencies reference. This is
/// the basis for the HEAD `200` vs `202` decision: a change to any
/// candidate — not just the one currently chosen — is topology-visible.
async fn topology_candidate_max_rv(store: &Store, agent: &Agent) -> Result<i64, StoreError> {
    let mut capability_names: Vec<String> = agent
        .dependencies
        .iter()
        .flat_map(|group| group.selectors.iter().filter_map(|dep| dep.capability.clone()))
        .collect();
    capability_names.sort();
    capability_names.dedup();

    let mut max_rv = 0i64;
    for name in capability_names {
        let providers = store
            .list_agents(&AgentFilter {
                capability: Some(name),
                ..Default::default()
            })
            .await?;
        for provider in providers {
            if provider.resource_version > max_rv {
                max_rv = provider.resource_version;
            }
        }
    }
    Ok(max_rv)
}

async fn build_snapshot(store: &Store, agent: &Agent) -> Result<DependencySnapshot, StoreError> {
    let all_agents = store.list_agents(&AgentFilter::default()).await?;
    let resolved = resolver::resolve(&agent.id, &agent.dependencies, &all_agents);

    let dependencies_resolved: HashMap<String, Option<ResolvedProvider>> = resolved
        .into_iter()
        .map(|(selector_name, chosen)| {
            let provider = chosen.map(|c| ResolvedProvider {
                agent_id: c.agent_id,
                endpoint: c.endpoint,
                capability: c.capability,
                status: c.status,
            });
            (selector_name, provider)
        })
        .collect();

    let max_rv = topology_candidate_max_rv(store, agent).await?;
    store.set_last_snapshot_max_rv(&agent.id, max_rv).await?;

    Ok(DependencySnapshot {
        status: "success".to_string(),
        agent_id: agent.id.clone(),
        resource_version: agent.resource_version,
        dependencies_resolved,
    })
}

async fn register_agent(
    State(state): State<ServerState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Response, RegistryApiError> {
    if req.agent_id.trim().is_empty() {
        return Err(RegistryApiError::Validation("agent_id must not be empty".to_string()));
    }
    if req.metadata.endpoint.trim().is_empty() {
        return Err(RegistryApiError::Validation("metadata.endpoint must not be empty".to_string()));
    }

    let now = now_ms();
    let capabilities = req
        .metadata
        .capabilities
        .iter()
        .map(|c| Capability {
            name: c.name.clone(),
            description: c.description.clone(),
            version: c.version.clone(),
            tags: c.tags.clone(),
        })
        .collect();

    let agent = Agent {
        id: req.agent_id.clone(),
        name: req.metadata.name.clone(),
        namespace: req.metadata.namespace.clone(),
        version: req.metadata.version.clone(),
        endpoint: req.metadata.endpoint.clone(),
        agent_type: req.metadata.agent_type.clone(),
        status: AgentStatus::Healthy,
        last_heartbeat: Some(now),
        health_interval_s: req.metadata.health_interval,
        timeout_threshold_s: req.metadata.timeout_threshold,
        eviction_threshold_s: req.metadata.eviction_threshold,
        capabilities,
        dependencies: req.metadata.dependencies.clone(),
        created_at: now,
        updated_at: now,
        resource_version: 0,
    };

    let stored = state.store.upsert_agent(&agent).await?;
    let snapshot = build_snapshot(&state.store, &stored).await?;
    Ok((StatusCode::CREATED, Json(snapshot)).into_response())
}

#[derive(Debug, Deserialize)]
struct HeadParams {
    agent_id: String,
    #[serde(default)]
    rv: i64,
}

async fn heartbeat_head(
    State(state): State<ServerState>,
    Query(params): Query<HeadParams>,
) -> Result<Response, RegistryApiError> {
    // An expired agent is past the eviction threshold; it must re-register
    // rather than resume beating under its old row, same as a row the
    // registry never heard of (e.g. after a restart with no persistence).
    match state.store.get_agent(&params.agent_id).await? {
        None => return Ok(StatusCode::GONE.into_response()),
        Some(agent) if agent.status == AgentStatus::Expired => return Ok(StatusCode::GONE.into_response()),
        Some(_) => {}
    }

    let updated = state.store.touch_heartbeat(&params.agent_id, AgentStatus::Healthy).await?;
    let current_max_rv = topology_candidate_max_rv(&state.store, &updated).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        "X-Current-RV",
        HeaderValue::from_str(&current_max_rv.to_string()).unwrap_or(HeaderValue::from_static("0")),
    );

    let status = if current_max_rv > params.rv {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };

    Ok((status, headers).into_response())
}

async fn heartbeat_post(
    State(state): State<ServerState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Response, RegistryApiError> {
    let hint = status_from_hint(&req.status);
    let updated = state.store.touch_heartbeat(&req.agent_id, hint).await?;
    let snapshot = build_snapshot(&state.store, &updated).await?;
    Ok((StatusCode::OK, Json(snapshot)).into_response())
}

#[derive(Debug, Deserialize, Default)]
struct ListAgentsParams {
    name: Option<String>,
    namespace: Option<String>,
    capability: Option<String>,
    status: Option<String>,
    capability_tags: Option<String>,
    label_selector: Option<String>,
}

/// Parse a `k=v,k2=v2` label selector into pairs. Empty/malformed segments
/// are dropped rather than erroring — an empty selector matches everything.
fn parse_label_selector(raw: &Option<String>) -> Vec<(String, String)> {
    raw.as_deref()
        .map(|s| {
            s.split(',')
                .filter_map(|pair| {
                    let (k, v) = pair.trim().split_once('=')?;
                    let k = k.trim();
                    let v = v.trim();
                    if k.is_empty() {
                        None
                    } else {
                        Some((k.to_string(), v.to_string()))
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// The value of one of an agent's addressable fields, for `label_selector`
/// matching. Unknown keys never match.
fn agent_label_value<'a>(agent: &'a Agent, key: &str) -> Option<&'a str> {
    match key {
        "name" => Some(&agent.name),
        "namespace" => Some(&agent.namespace),
        "agent_type" => Some(&agent.agent_type),
        "version" => Some(&agent.version),
        "status" => Some(agent.status.as_str()),
        _ => None,
    }
}

fn agent_matches_labels(agent: &Agent, pairs: &[(String, String)]) -> bool {
    pairs
        .iter()
        .all(|(k, v)| agent_label_value(agent, k) == Some(v.as_str()))
}

async fn list_agents_handler(
    State(state): State<ServerState>,
    Query(params): Query<ListAgentsParams>,
) -> Result<Json<Vec<Agent>>, RegistryApiError> {
    let status = params
        .status
        .as_deref()
        .map(status_from_hint)
        .unwrap_or(AgentStatus::Healthy);
    let label_pairs = parse_label_selector(&params.label_selector);

    let filter = AgentFilter {
        name: params.name,
        namespace: params.namespace,
        capability: params.capability,
        capability_tags: split_csv(&params.capability_tags),
        status: Some(status),
    };

    let agents = state
        .store
        .list_agents(&filter)
        .await?
        .into_iter()
        .filter(|agent| agent_matches_labels(agent, &label_pairs))
        .collect();

    Ok(Json(agents))
}

#[derive(Debug, Serialize)]
struct CapabilitySummary {
    name: String,
    version: String,
    tags: Vec<String>,
    agent_id: String,
    endpoint: String,
}

#[derive(Debug, Deserialize, Default)]
struct CapabilitiesParams {
    capability: Option<String>,
    tags: Option<String>,
    agent_status: Option<String>,
}

async fn list_capabilities_handler(
    State(state): State<ServerState>,
    Query(params): Query<CapabilitiesParams>,
) -> Result<Json<Vec<CapabilitySummary>>, RegistryApiError> {
    let status = params
        .agent_status
        .as_deref()
        .map(status_from_hint)
        .unwrap_or(AgentStatus::Healthy);
    let tag_filter = split_csv(&params.tags);
    let name_fragment = params.capability.unwrap_or_default();

    let agents = state
        .store
        .list_agents(&AgentFilter {
            status: Some(status),
            ..Default::default()
        })
        .await?;

    let mut out = Vec::new();
    for agent in agents {
        for cap in &agent.capabilities {
            if !name_fragment.is_empty() && !cap.name.contains(&name_fragment) {
                continue;
            }
            if !tag_filter.iter().all(|t| cap.tags.iter().any(|existing| existing == t)) {
                continue;
            }
            out.push(CapabilitySummary {
                name: cap.name.clone(),
                version: cap.version.clone(),
                tags: cap.tags.clone(),
                agent_id: agent.id.clone(),
                endpoint: agent.endpoint.clone(),
            });
        }
    }
    Ok(Json(out))
}

async fn health_handler() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

async fn health_monitoring_handler(State(state): State<ServerState>) -> Response {
    let stats = state.monitor_stats.read().await;
    (StatusCode::OK, Json(&*stats)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn register_body(agent_id: &str, endpoint: &str, capability: &str, deps_json: serde_json::Value) -> serde_json::Value {
        json!({
            "agent_id": agent_id,
            "metadata": {
                "name": agent_id,
                "namespace": "default",
                "version": "1.0.0",
                "endpoint": endpoint,
                "agent_type": "mesh-agent",
                "capabilities": [
                    { "name": capability, "description": "", "version": "1.0.0", "tags": ["fast"] }
                ],
                "dependencies": deps_json
            }
        })
    }

    async fn test_state() -> ServerState {
        let store = Arc::new(Store::connect("sqlite::memory:").await.unwrap());
        ServerState {
            store,
            monitor_stats: Arc::new(RwLock::new(MonitorStats::default())),
        }
    }

    #[tokio::test]
    async fn test_s1_basic_wiring_resolves_on_registration() {
        let state = test_state().await;
        let app = build_router(state);

        let sys_body = register_body("sys", "http://h:9002", "date_service", json!([]));
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/register_with_metadata")
                    .header("content-type", "application/json")
                    .body(Body::from(sys_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let hello_body = register_body(
            "hello",
            "http://h:9001",
            "greet",
            json!([
                { "selector_name": "date_service",
                  "selectors": [ { "capability": "date_service", "tags": [], "version": null } ] }
            ]),
        );
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/register_with_metadata")
                    .header("content-type", "application/json")
                    .body(Body::from(hello_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: DependencySnapshot = serde_json::from_slice(&bytes).unwrap();
        let provider = parsed.dependencies_resolved.get("date_service").unwrap().as_ref().unwrap();
        assert_eq!(provider.agent_id, "sys");
        assert_eq!(provider.endpoint, "http://h:9002");
    }

    #[tokio::test]
    async fn test_heartbeat_head_unknown_agent_is_gone() {
        let state = test_state().await;
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("HEAD")
                    .uri("/heartbeat?agent_id=ghost&rv=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_heartbeat_head_idempotent_when_unchanged() {
        let state = test_state().await;
        let app = build_router(state);

        let body = register_body("solo", "http://h:1", "greet", json!([]));
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/register_with_metadata")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let r1 = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("HEAD")
                    .uri("/heartbeat?agent_id=solo&rv=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let rv1 = r1.headers().get("X-Current-RV").unwrap().to_str().unwrap().to_string();
        assert_eq!(r1.status(), StatusCode::OK);

        let r2 = app
            .oneshot(
                Request::builder()
                    .method("HEAD")
                    .uri(format!("/heartbeat?agent_id=solo&rv={}", rv1))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(r2.status(), StatusCode::OK);
        assert_eq!(r2.headers().get("X-Current-RV").unwrap().to_str().unwrap(), rv1);
    }

    #[tokio::test]
    async fn test_health_endpoint_ok() {
        let state = test_state().await;
        let app = build_router(state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_register_rejects_empty_agent_id() {
        let state = test_state().await;
        let app = build_router(state);
        let body = json!({ "agent_id": "", "metadata": { "name": "x", "namespace": "default",
            "version": "1.0.0", "endpoint": "http://h:1", "agent_type": "mesh-agent",
            "capabilities": [], "dependencies": [] } });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/register_with_metadata")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
