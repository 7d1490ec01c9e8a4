//! # Matching Engine
//!
//! Proposes outlet → inlet connections between discovered ports.
//!
//! Every pair is scored by the rules in [`rules`]. Eligible candidates are
//! sorted by score (descending, ties broken by discovery order) and consumed
//! greedily: a pair is accepted only if neither port is taken yet.
//!
//! Greedy assignment is not globally optimal: a high-scoring early pair can
//! block two slightly lower pairs that would sum higher. Replacing it with an
//! optimal bipartite matcher must keep both hard filters and determinism.

pub mod rules;

use serde::{Deserialize, Serialize};

use crate::accessor::{self, attrs};
use crate::config::MatchConfig;
use crate::healing::{apply_state, Regenerator};
use crate::model::*;
use crate::storage::SceneGraph;
use crate::{Error, Result};

pub use rules::{Breakdown, MatchRule, RuleOutcome};

/// A proposed pairing of one outlet and one inlet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub outlet: Port,
    pub inlet: Port,
    pub score: f64,
    pub distance: f64,
    pub breakdown: Breakdown,
}

/// Output of one matching pass. Unmatched ports are reported, not dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub connections: Vec<Connection>,
    pub unmatched_outlets: Vec<Port>,
    pub unmatched_inlets: Vec<Port>,
}

impl MatchResult {
    pub fn is_complete(&self) -> bool {
        self.unmatched_outlets.is_empty() && self.unmatched_inlets.is_empty()
    }
}

/// An eligible pair, by index into the outlet and inlet slices.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub outlet: usize,
    pub inlet: usize,
    pub score: f64,
    pub distance: f64,
    pub breakdown: Breakdown,
}

#[derive(Debug, Clone, Default)]
pub struct MatchingEngine {
    config: MatchConfig,
}

impl MatchingEngine {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Score a pair, or `None` if a hard filter disqualifies it.
    pub fn score(&self, outlet: &Port, inlet: &Port) -> Option<(f64, f64, Breakdown)> {
        let (breakdown, distance) = rules::evaluate(&self.config, outlet, inlet);
        if !breakdown.iter().all(|o| o.passed) {
            return None;
        }
        let score = breakdown.iter().map(|o| o.contribution).sum();
        Some((score, distance, breakdown))
    }

    /// All eligible pairs in acceptance order.
    pub fn candidates(&self, outlets: &[Port], inlets: &[Port]) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for (oi, outlet) in outlets.iter().enumerate() {
            for (ii, inlet) in inlets.iter().enumerate() {
                if let Some((score, distance, breakdown)) = self.score(outlet, inlet) {
                    candidates.push(Candidate { outlet: oi, inlet: ii, score, distance, breakdown });
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| outlets[a.outlet].discovery_index.cmp(&outlets[b.outlet].discovery_index))
                .then_with(|| inlets[a.inlet].discovery_index.cmp(&inlets[b.inlet].discovery_index))
                .then_with(|| a.outlet.cmp(&b.outlet))
                .then_with(|| a.inlet.cmp(&b.inlet))
        });
        candidates
    }

    /// Greedy one-to-one assignment of outlets to inlets.
    pub fn match_ports(&self, outlets: &[Port], inlets: &[Port]) -> MatchResult {
        let mut outlet_taken = vec![false; outlets.len()];
        let mut inlet_taken = vec![false; inlets.len()];
        let mut connections = Vec::new();

        for c in self.candidates(outlets, inlets) {
            if outlet_taken[c.outlet] || inlet_taken[c.inlet] {
                continue;
            }
            outlet_taken[c.outlet] = true;
            inlet_taken[c.inlet] = true;
            connections.push(Connection {
                outlet: outlets[c.outlet].clone(),
                inlet: inlets[c.inlet].clone(),
                score: c.score,
                distance: c.distance,
                breakdown: c.breakdown,
            });
        }

        let unmatched = |ports: &[Port], taken: &[bool]| -> Vec<Port> {
            ports.iter().zip(taken).filter(|(_, t)| !**t).map(|(p, _)| p.clone()).collect()
        };
        let result = MatchResult {
            unmatched_outlets: unmatched(outlets, &outlet_taken),
            unmatched_inlets: unmatched(inlets, &inlet_taken),
            connections,
        };
        tracing::debug!(
            connections = result.connections.len(),
            unmatched_outlets = result.unmatched_outlets.len(),
            unmatched_inlets = result.unmatched_inlets.len(),
            "matching pass complete"
        );
        result
    }

    /// Split a mixed port sequence by direction, then match.
    pub fn match_all(&self, ports: &[Port]) -> MatchResult {
        let (outlets, inlets): (Vec<Port>, Vec<Port>) =
            ports.iter().cloned().partition(Port::is_outlet);
        self.match_ports(&outlets, &inlets)
    }
}

/// Record accepted connections on both port nodes as `connected_to`.
///
/// Returns how many connections were fully written.
pub async fn connect<G: SceneGraph + ?Sized>(graph: &G, connections: &[Connection]) -> usize {
    let mut written = 0;
    for c in connections {
        let forward = accessor::write(
            graph, &c.outlet.node, attrs::CONNECTED_TO,
            Value::from(c.inlet.node.as_str()), ValueType::String,
        ).await;
        let backward = accessor::write(
            graph, &c.inlet.node, attrs::CONNECTED_TO,
            Value::from(c.outlet.node.as_str()), ValueType::String,
        ).await;
        if forward && backward {
            written += 1;
        }
    }
    written
}

// ============================================================================
// Connected components
// ============================================================================

/// Dimension attributes pushed across connections.
const SHARED_DIMENSIONS: [&str; 3] = [attrs::DIAMETER, attrs::WIDTH, attrs::HEIGHT];

/// One `connected_to` link leaving the subtree at `root`.
struct Link {
    /// Port node the link points at.
    target: SceneNode,
    /// Component owning `target`.
    owner: NodePath,
}

/// Follow every `connected_to` in the subtree at `root` to the component on
/// the other end.
async fn outgoing_links<G: SceneGraph + ?Sized>(graph: &G, root: &NodePath) -> Result<Vec<Link>> {
    let root_node = graph
        .get_node(root)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Node {root}")))?;

    let mut links = Vec::new();
    let mut stack = vec![root_node];
    while let Some(node) = stack.pop() {
        if let Some(target) = accessor::read_text(&node, attrs::CONNECTED_TO) {
            match NodePath::parse(&target) {
                Ok(target) => {
                    if let Some(link) = resolve_link(graph, root, &target).await? {
                        links.push(link);
                    }
                }
                Err(e) => tracing::warn!(path = %node.path, error = %e, "unparseable connected_to"),
            }
        }
        let children = graph.children(&node.path).await?;
        stack.extend(children.into_iter().rev());
    }
    Ok(links)
}

/// The target port and its owning component: the nearest ancestor declaring
/// `capacity` or `generator_type`, else the port's parent. Targets that are
/// gone or owned from inside `root` yield `None`.
async fn resolve_link<G: SceneGraph + ?Sized>(
    graph: &G,
    root: &NodePath,
    target: &NodePath,
) -> Result<Option<Link>> {
    let Some(target_node) = graph.get_node(target).await? else {
        tracing::debug!(target = %target, "connected_to points at a missing node");
        return Ok(None);
    };
    let mut owner = None;
    for ancestor in target.ancestors() {
        match graph.get_node(&ancestor).await? {
            Some(node) if accessor::is_component(&node) => {
                owner = Some(ancestor);
                break;
            }
            _ => {}
        }
    }
    let Some(owner) = owner.or_else(|| target.parent()) else {
        return Ok(None);
    };
    if owner == *root || root.is_ancestor_of(&owner) || owner.is_root() {
        return Ok(None);
    }
    Ok(Some(Link { target: target_node, owner }))
}

/// Components linked to the subtree at `root` through `connected_to`, in
/// discovery order, each listed once.
pub async fn connected_components<G: SceneGraph + ?Sized>(graph: &G, root: &NodePath) -> Result<Vec<NodePath>> {
    let mut components: Vec<NodePath> = Vec::new();
    for link in outgoing_links(graph, root).await? {
        if !components.contains(&link.owner) {
            components.push(link.owner);
        }
    }
    Ok(components)
}

/// Copy `root`'s `diameter`, `width` and `height` onto every connected
/// component, then regenerate each one.
///
/// The target port receives only the dimensions it already declares.
/// Returns the number of components whose dimensions were written; rejected
/// writes and regeneration failures are logged and skipped.
pub async fn propagate_dimensions<G: SceneGraph + ?Sized>(
    graph: &G,
    root: &NodePath,
    regenerator: &dyn Regenerator,
) -> Result<usize> {
    let source = graph
        .get_node(root)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Node {root}")))?;
    let dimensions: Vec<(String, Value)> = SHARED_DIMENSIONS
        .iter()
        .filter_map(|name| accessor::read_opt::<f64>(&source, name).map(|v| ((*name).to_owned(), Value::Float(v))))
        .collect();
    if dimensions.is_empty() {
        tracing::debug!(root = %root, "no dimensions to propagate");
        return Ok(0);
    }

    let mut updated: Vec<NodePath> = Vec::new();
    for link in outgoing_links(graph, root).await? {
        let port_dimensions: Vec<_> = dimensions
            .iter()
            .filter(|(name, _)| accessor::declares(&link.target, name))
            .cloned()
            .collect();
        if !port_dimensions.is_empty()
            && !accessor::write_many(graph, &link.target.path, port_dimensions).await
        {
            tracing::warn!(port = %link.target.path, "dimension propagation to port rejected");
        }
        if updated.contains(&link.owner) {
            continue;
        }
        if !accessor::write_many(graph, &link.owner, dimensions.clone()).await {
            tracing::warn!(component = %link.owner, "dimension propagation rejected");
            continue;
        }
        updated.push(link.owner.clone());

        let Some(owner) = graph.get_node(&link.owner).await? else {
            continue;
        };
        match regenerator.regenerate(&owner, &accessor::values(&owner)).await {
            Ok(state) => {
                if let Err(msg) = apply_state(graph, &link.owner, state).await {
                    tracing::warn!(component = %link.owner, error = %msg, "regenerated state rejected");
                }
            }
            Err(e) => tracing::warn!(component = %link.owner, error = %e, "regeneration after propagation failed"),
        }
    }
    tracing::info!(root = %root, updated = updated.len(), "dimensions propagated");
    Ok(updated.len())
}
