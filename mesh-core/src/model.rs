//! Shared data model for agent rows, capabilities, and health events.
//!
//! These types are the Store's row shapes and the registry's wire response
//! shapes at once - there is no separate "DB model" vs "API model" split,
//! since the two are kept identical by design.

use serde::{Deserialize, Serialize};

use crate::spec::{SelectorGroup, TagOp, TagTerm};

/// Derived liveness state of an `Agent` row. Never client-set; always
/// recomputed by the Health Monitor from `last_heartbeat` vs thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Healthy,
    Degraded,
    Expired,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Healthy => "healthy",
            AgentStatus::Degraded => "degraded",
            AgentStatus::Expired => "expired",
        }
    }
}

/// A capability offered by an agent. `(agent_id, name)` is the composite
/// identity the Store enforces via a unique index - an agent cannot
/// advertise the same capability twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub version: String,
    pub tags: Vec<String>,
}

/// The structured, parsed form of a declared selector. `+/-` prefix
/// parsing happens once at ingress; the Resolver never sees raw strings.
#[derive(Debug, Clone)]
pub struct Selector {
    pub capability: Option<String>,
    pub tag_terms: Vec<TagTerm>,
    pub version: Option<String>,
}

impl Selector {
    pub fn required_tags(&self) -> impl Iterator<Item = &str> {
        self.tag_terms
            .iter()
            .filter(|t| t.op == TagOp::Required)
            .map(|t| t.term.as_str())
    }

    pub fn excluded_tags(&self) -> impl Iterator<Item = &str> {
        self.tag_terms
            .iter()
            .filter(|t| t.op == TagOp::Excluded)
            .map(|t| t.term.as_str())
    }

    pub fn preferred_tags(&self) -> impl Iterator<Item = &str> {
        self.tag_terms
            .iter()
            .filter(|t| t.op == TagOp::Preferred)
            .map(|t| t.term.as_str())
    }
}

/// A full agent row, as persisted by the Store and as returned by read
/// endpoints (`GET /agents`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub endpoint: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub last_heartbeat: Option<i64>,
    pub health_interval_s: Option<u64>,
    pub timeout_threshold_s: Option<u64>,
    pub eviction_threshold_s: Option<u64>,
    pub capabilities: Vec<Capability>,
    pub dependencies: Vec<SelectorGroup>,
    pub created_at: i64,
    pub updated_at: i64,
    pub resource_version: i64,
}

impl Agent {
    /// Whether this agent currently offers a capability of the given name.
    pub fn offers(&self, capability_name: &str) -> bool {
        self.capabilities.iter().any(|c| c.name == capability_name)
    }
}

/// An append-only audit record of a status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEvent {
    pub agent_id: String,
    pub from_status: AgentStatus,
    pub to_status: AgentStatus,
    pub at: i64,
}
