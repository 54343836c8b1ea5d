//! Agent specification types for MCP Mesh.
//!
//! These types define what a process declares about itself before it starts
//! talking to the registry: the capabilities it offers and the selectors it
//! needs resolved. A caller builds an [`AgentSpec`] once at boot (from a
//! static manifest, a config file, or a builder the embedding application
//! populates) and hands it to [`crate::runtime::AgentRuntime::new`].

use serde::{Deserialize, Serialize};

/// A single tag term in a selector, with its matching operator.
///
/// Parsed once at ingress from the wire `+/-` prefix convention — the
/// Resolver never sees raw strings, only this structured form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagOp {
    /// Plain term: must be present on every matching candidate.
    Required,
    /// `+`-prefixed term: not a filter, contributes to the preference score.
    Preferred,
    /// `-`-prefixed term: must not be present on any matching candidate.
    Excluded,
}

/// A parsed tag term (`term`, `op`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagTerm {
    pub term: String,
    pub op: TagOp,
}

impl TagTerm {
    /// Parse the wire `+/-` prefix convention into a structured term.
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix('+') {
            Self { term: rest.to_string(), op: TagOp::Preferred }
        } else if let Some(rest) = raw.strip_prefix('-') {
            Self { term: rest.to_string(), op: TagOp::Excluded }
        } else {
            Self { term: raw.to_string(), op: TagOp::Required }
        }
    }

    /// Parse a whole tag list in one pass.
    pub fn parse_all(raw_tags: &[String]) -> Vec<Self> {
        raw_tags.iter().map(|t| Self::parse(t.as_str())).collect()
    }
}

/// Specification for a dependency required by a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Capability name to depend on. Optional only for LLM tool-filter selectors.
    #[serde(default)]
    pub capability: Option<String>,

    /// Tags for filtering (e.g., ["+fast", "-deprecated"])
    #[serde(default)]
    pub tags: Vec<String>,

    /// Version constraint (e.g., ">=2.0.0")
    pub version: Option<String>,
}

impl DependencySpec {
    /// Create a new DependencySpec.
    pub fn new(capability: Option<String>, tags: Option<Vec<String>>, version: Option<String>) -> Self {
        Self {
            capability,
            tags: tags.unwrap_or_default(),
            version,
        }
    }

    /// Parse the structured tag terms for this dependency.
    pub fn tag_terms(&self) -> Vec<TagTerm> {
        TagTerm::parse_all(&self.tags)
    }
}

/// A named selector: one dependency slot that may be satisfied by any of a
/// list of alternative selectors (OR semantics across the list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorGroup {
    /// The name this dependency slot is addressed by in the Proxy Table.
    pub selector_name: String,
    /// Alternative selectors; the best-scoring candidate across all of them wins.
    pub selectors: Vec<DependencySpec>,
}

/// Specification for a tool/capability provided by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Function name in the code
    pub function_name: String,

    /// Capability name for discovery
    pub capability: String,

    /// Version of this capability
    pub version: String,

    /// Tags for filtering
    pub tags: Vec<String>,

    /// Human-readable description
    pub description: String,

    /// Dependencies required by this tool
    pub dependencies: Vec<DependencySpec>,

    /// JSON Schema for input parameters (MCP format) - serialized JSON string
    pub input_schema: Option<String>,

    /// Additional kwargs from the declaring code - serialized JSON string
    pub kwargs: Option<String>,
}

impl ToolSpec {
    /// Create a new ToolSpec.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        function_name: String,
        capability: String,
        version: String,
        description: String,
        tags: Option<Vec<String>>,
        dependencies: Option<Vec<DependencySpec>>,
        input_schema: Option<String>,
        kwargs: Option<String>,
    ) -> Self {
        Self {
            function_name,
            capability,
            version,
            description,
            tags: tags.unwrap_or_default(),
            dependencies: dependencies.unwrap_or_default(),
            input_schema,
            kwargs,
        }
    }
}

/// Agent type: a free-form label that drives default health thresholds
/// unless the agent specifies per-agent overrides. Deliberately a
/// string rather than a closed enum, since the threshold lookup table is
/// keyed by arbitrary operator-chosen labels (e.g. "mesh-agent", "api",
/// "batch-worker") rather than a fixed set the core needs to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentType(pub String);

impl Default for AgentType {
    fn default() -> Self {
        Self("mesh-agent".to_string())
    }
}

impl AgentType {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Per-agent overrides of the Health Monitor's default thresholds.
/// All fields optional; a `None` falls through to the agent-type default,
/// then the global default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub health_interval_s: Option<u64>,
    pub timeout_threshold_s: Option<u64>,
    pub eviction_threshold_s: Option<u64>,
}

/// Complete specification for an MCP Mesh agent.
///
/// This is the primary configuration passed to [`crate::runtime::AgentRuntime::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique agent name (before the random suffix is appended to form `agent_id`)
    pub name: String,

    /// Namespace for isolation
    pub namespace: String,

    /// Agent version (semver)
    pub version: String,

    /// Human-readable description
    pub description: String,

    /// Registry URL (e.g., "http://localhost:8000")
    pub registry_url: String,

    /// HTTP port for this agent (0 = auto-assign)
    pub http_port: u16,

    /// HTTP host announced to registry
    pub http_host: String,

    /// Agent type label (drives default health thresholds)
    #[serde(default)]
    pub agent_type: AgentType,

    /// Tools/capabilities provided by this agent
    pub tools: Vec<ToolSpec>,

    /// Dependency selectors declared by this agent, keyed by selector name
    #[serde(default)]
    pub dependencies: Vec<SelectorGroup>,

    /// Heartbeat interval in seconds (fast HEAD check cadence)
    pub heartbeat_interval: u64,

    /// Per-agent threshold overrides
    #[serde(default)]
    pub thresholds: HealthThresholds,

    /// Random suffix appended to `name` to form the stable `agent_id`,
    /// generated once at construction time so it stays fixed for the life
    /// of the process even across re-registration after a `410`.
    #[serde(default = "short_suffix")]
    suffix: String,
}

impl AgentSpec {
    /// Create a new AgentSpec.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        registry_url: String,
        version: String,
        description: String,
        http_port: u16,
        http_host: String,
        namespace: String,
        agent_type: Option<String>,
        tools: Option<Vec<ToolSpec>>,
        heartbeat_interval: u64,
    ) -> Self {
        Self {
            name,
            version,
            description,
            registry_url,
            http_port,
            http_host,
            namespace,
            agent_type: agent_type.map(AgentType).unwrap_or_default(),
            tools: tools.unwrap_or_default(),
            dependencies: Vec::new(),
            heartbeat_interval,
            thresholds: HealthThresholds::default(),
            suffix: short_suffix(),
        }
    }

    /// Get the stable agent ID (name plus a random suffix fixed at
    /// construction time).
    pub fn agent_id(&self) -> String {
        format!("{}-{}", self.name, self.suffix)
    }

    /// Get all dependency capabilities required by this agent's tools and
    /// top-level selector groups.
    pub fn all_dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = self
            .tools
            .iter()
            .flat_map(|t| t.dependencies.iter().filter_map(|d| d.capability.clone()))
            .chain(self.dependencies.iter().flat_map(|g| {
                g.selectors.iter().filter_map(|d| d.capability.clone())
            }))
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }
}

/// Generate a short random suffix for agent-id uniqueness from a v4 UUID.
fn short_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
