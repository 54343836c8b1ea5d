//! End-to-end scenarios driven against the real `axum` router over an
//! in-memory Store, mirroring the wiring/death/flap/restart behavior the
//! service is expected to provide in production.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower::ServiceExt;

use mcp_mesh_core::registry::DependencySnapshot;
use mcp_mesh_registry::health_monitor::{HealthMonitor, HealthMonitorConfig, MonitorStats};
use mcp_mesh_registry::server::{build_router, ServerState};
use mcp_mesh_registry::store::Store;

async fn new_state() -> ServerState {
    let store = Arc::new(Store::connect("sqlite::memory:").await.unwrap());
    ServerState {
        store,
        monitor_stats: Arc::new(RwLock::new(MonitorStats::default())),
    }
}

fn register_request(
    agent_id: &str,
    endpoint: &str,
    capabilities: Value,
    dependencies: Value,
) -> Request<Body> {
    let body = json!({
        "agent_id": agent_id,
        "metadata": {
            "name": agent_id,
            "namespace": "default",
            "version": "1.0.0",
            "endpoint": endpoint,
            "agent_type": "mesh-agent",
            "timeout_threshold": 20,
            "eviction_threshold": 60,
            "capabilities": capabilities,
            "dependencies": dependencies
        }
    });
    Request::builder()
        .method("POST")
        .uri("/agents/register_with_metadata")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn capability(name: &str, tags: &[&str]) -> Value {
    json!([{ "name": name, "description": "", "version": "1.0.0", "tags": tags }])
}

fn single_selector(selector_name: &str, capability: &str, tags: &[&str]) -> Value {
    json!([{
        "selector_name": selector_name,
        "selectors": [{ "capability": capability, "tags": tags, "version": null }]
    }])
}

async fn snapshot_of(response: axum::response::Response) -> DependencySnapshot {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn s1_basic_wiring() {
    let state = new_state().await;
    let app = build_router(state);

    let response = app
        .clone()
        .oneshot(register_request("sys", "http://h:9002", capability("date_service", &[]), json!([])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(register_request(
            "hello",
            "http://h:9001",
            capability("greet", &[]),
            single_selector("date_service", "date_service", &[]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let snapshot = snapshot_of(response).await;
    let provider = snapshot.dependencies_resolved.get("date_service").unwrap().as_ref().unwrap();
    assert_eq!(provider.agent_id, "sys");
    assert_eq!(provider.endpoint, "http://h:9002");
}

#[tokio::test]
async fn s2_provider_death_evicts_and_clears_resolution() {
    let state = new_state().await;
    let store = state.store.clone();
    let app = build_router(state);

    app.clone()
        .oneshot(register_request("sys", "http://h:9002", capability("date_service", &[]), json!([])))
        .await
        .unwrap();
    app.clone()
        .oneshot(register_request(
            "hello",
            "http://h:9001",
            capability("greet", &[]),
            single_selector("date_service", "date_service", &[]),
        ))
        .await
        .unwrap();

    // Tighten sys's thresholds, then rewind its last_heartbeat so the next
    // scan sees it as long past eviction without a real sleep.
    let mut sys = store.get_agent("sys").await.unwrap().unwrap();
    sys.eviction_threshold_s = Some(1);
    sys.timeout_threshold_s = Some(0);
    store.upsert_agent(&sys).await.unwrap();
    sqlx_backdate_heartbeat(&store, "sys", 2_000).await;

    let monitor = HealthMonitor::new(
        store.clone(),
        HealthMonitorConfig {
            scan_interval_s: 10,
            default_timeout_threshold_s: 20,
            default_eviction_threshold_s: 60,
        },
    );
    monitor.scan_once().await.unwrap();

    let sys_after = store.get_agent("sys").await.unwrap().unwrap();
    assert_eq!(sys_after.status, mcp_mesh_core::model::AgentStatus::Expired);

    let response = app
        .oneshot(register_request(
            "hello",
            "http://h:9001",
            capability("greet", &[]),
            single_selector("date_service", "date_service", &[]),
        ))
        .await
        .unwrap();
    let snapshot = snapshot_of(response).await;
    assert!(snapshot.dependencies_resolved.get("date_service").unwrap().is_none());
}

/// Test-only helper: push `last_heartbeat` back by `ms_ago` milliseconds so
/// a health scan treats the agent as silent without a real sleep.
async fn sqlx_backdate_heartbeat(store: &Store, agent_id: &str, ms_ago: i64) {
    let agent = store.get_agent(agent_id).await.unwrap().unwrap();
    let mut backdated = agent.clone();
    backdated.last_heartbeat = Some(backdated.last_heartbeat.unwrap_or(0) - ms_ago);
    store.upsert_agent(&backdated).await.unwrap();
}

#[tokio::test]
async fn s3_and_s4_preferred_and_excluded_tags() {
    let state = new_state().await;
    let app = build_router(state);

    app.clone()
        .oneshot(register_request("a", "http://h:1", capability("weather_data", &["api", "fast"]), json!([])))
        .await
        .unwrap();
    app.clone()
        .oneshot(register_request("b", "http://h:2", capability("weather_data", &["api"]), json!([])))
        .await
        .unwrap();
    app.clone()
        .oneshot(register_request(
            "c",
            "http://h:3",
            capability("weather_data", &["api", "fast", "deprecated"]),
            json!([]),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(register_request(
            "consumer",
            "http://h:4",
            capability("greet", &[]),
            single_selector("weather", "weather_data", &["api", "+fast", "-deprecated"]),
        ))
        .await
        .unwrap();

    let snapshot = snapshot_of(response).await;
    let provider = snapshot.dependencies_resolved.get("weather").unwrap().as_ref().unwrap();
    assert_eq!(provider.agent_id, "a");
}

#[tokio::test]
async fn s6_registry_restart_forces_reregistration() {
    // A fresh Store stands in for "registry restarted with no persisted
    // state" — the same in-memory-database property exercised elsewhere.
    let state = new_state().await;
    let store = state.store.clone();
    let app = build_router(state);

    app.clone()
        .oneshot(register_request("sys", "http://h:9002", capability("date_service", &[]), json!([])))
        .await
        .unwrap();

    drop(app);
    let fresh_store = Store::connect("sqlite::memory:").await.unwrap();
    let fresh_state = ServerState {
        store: Arc::new(fresh_store),
        monitor_stats: Arc::new(RwLock::new(MonitorStats::default())),
    };
    let fresh_app = build_router(fresh_state);

    let response = fresh_app
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri("/heartbeat?agent_id=sys&rv=0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);

    // The original store (not replaced) still serves the agent fine.
    assert!(store.get_agent("sys").await.unwrap().is_some());
}
