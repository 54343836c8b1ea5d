//! Selector algebra and dependency resolution.
//!
//! `resolve` is a pure function over a `Store` snapshot: no I/O, no
//! randomness, no clock reads. Given the same agents and the same
//! dependency declarations it always picks the same provider, which is
//! what makes the Registry HTTP Server's snapshot responses deterministic.

use std::cmp::Ordering;
use std::collections::HashMap;

use semver::{Version, VersionReq};
use serde::Serialize;

use crate::model::{Agent, AgentStatus, Selector};
use crate::spec::{DependencySpec, SelectorGroup};

/// A provider chosen for one selector, ready to be embedded in a
/// `dependencies_resolved` response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChosenProvider {
    pub agent_id: String,
    pub endpoint: String,
    pub capability: String,
    pub status: String,
}

struct Candidate {
    agent_id: String,
    endpoint: String,
    capability: String,
    version: String,
    score: u32,
    is_self: bool,
}

/// Resolve every selector group an agent declares against a snapshot of
/// currently-known agents. Returns one entry per `selector_name`; a `None`
/// value means no matching healthy provider, never an error.
pub fn resolve(
    consumer_id: &str,
    dependencies: &[SelectorGroup],
    agents: &[Agent],
) -> HashMap<String, Option<ChosenProvider>> {
    dependencies
        .iter()
        .map(|group| {
            let chosen = best_for_group(group, agents, consumer_id).map(|c| ChosenProvider {
                agent_id: c.agent_id,
                endpoint: c.endpoint,
                capability: c.capability,
                status: "healthy".to_string(),
            });
            (group.selector_name.clone(), chosen)
        })
        .collect()
}

/// Alternatives within a group are OR'd: the best candidate across all of
/// them wins, regardless of which individual selector matched it.
fn best_for_group(group: &SelectorGroup, agents: &[Agent], consumer_id: &str) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;

    for dep in &group.selectors {
        let selector = Selector {
            capability: dep.capability.clone(),
            tag_terms: dep.tag_terms(),
            version: dep.version.clone(),
        };

        for agent in agents.iter().filter(|a| a.status == AgentStatus::Healthy) {
            for capability in &agent.capabilities {
                let Some(score) = match_score(&selector, capability) else {
                    continue;
                };

                let candidate = Candidate {
                    agent_id: agent.id.clone(),
                    endpoint: agent.endpoint.clone(),
                    capability: capability.name.clone(),
                    version: capability.version.clone(),
                    score,
                    is_self: agent.id == consumer_id,
                };

                best = Some(match best {
                    None => candidate,
                    Some(current) => pick_winner(current, candidate),
                });
            }
        }
    }

    best
}

/// Match a single selector against a single candidate capability, per the
/// three-gate tag algebra (required, excluded, preferred). `None` means the
/// candidate is filtered out;
/// `Some(score)` is the number of PREFERRED tags matched.
fn match_score(selector: &Selector, capability: &crate::model::Capability) -> Option<u32> {
    // Gate 1: capability-name. Omitted only for LLM tool-filter selectors,
    // which this core does not implement - every selector we resolve here
    // carries a capability name.
    if let Some(name) = &selector.capability {
        if name != &capability.name {
            return None;
        }
    }

    // Gate 2: version constraint.
    if let Some(constraint) = &selector.version {
        if !version_satisfies(constraint, &capability.version) {
            return None;
        }
    }

    // Gate 3: tag partition, using the terms already parsed at ingress.
    for term in &selector.tag_terms {
        match term.op {
            crate::spec::TagOp::Required => {
                if !capability.tags.iter().any(|t| t == &term.term) {
                    return None;
                }
            }
            crate::spec::TagOp::Excluded => {
                if capability.tags.iter().any(|t| t == &term.term) {
                    return None;
                }
            }
            crate::spec::TagOp::Preferred => {}
        }
    }

    let score = selector
        .tag_terms
        .iter()
        .filter(|t| t.op == crate::spec::TagOp::Preferred && capability.tags.contains(&t.term))
        .count() as u32;

    Some(score)
}

fn version_satisfies(constraint: &str, candidate_version: &str) -> bool {
    let (Ok(req), Ok(version)) = (
        VersionReq::parse(constraint),
        Version::parse(candidate_version),
    ) else {
        // Malformed constraint or candidate version: fail closed, matching
        // the Resolver's "never blocks, never errors" contract by simply
        // excluding the candidate rather than panicking.
        return false;
    };
    req.matches(&version)
}

/// Tiebreak order: score desc (already enforced by the caller comparing
/// only within a tie), self-resolution wins ties, then capability version
/// desc (semver), then agent_id asc.
fn pick_winner(a: Candidate, b: Candidate) -> Candidate {
    if a.score != b.score {
        return if a.score > b.score { a } else { b };
    }

    if a.is_self && !b.is_self {
        return a;
    }
    if b.is_self && !a.is_self {
        return b;
    }

    match compare_versions(&a.version, &b.version) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal => {
            if a.agent_id <= b.agent_id {
                a
            } else {
                b
            }
        }
    }
}

fn compare_versions(a: &str, b: &str) -> Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

/// Convenience constructor used by resolver tests and by callers assembling
/// an in-memory snapshot without going through the Store.
pub fn dependency_spec(capability: &str, tags: &[&str], version: Option<&str>) -> DependencySpec {
    DependencySpec::new(
        Some(capability.to_string()),
        Some(tags.iter().map(|t| t.to_string()).collect()),
        version.map(|v| v.to_string()),
    )
}
