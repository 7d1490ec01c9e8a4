//! # Discovery Scanner
//!
//! Walks a subtree and turns every well-formed port node into a `Port`.
//!
//! A node is a port candidate if it declares `port_type`. Candidates must
//! also carry `system_type` and a `flow_direction` of `inlet` or `outlet`;
//! otherwise they are dropped with exactly one WARN diagnostic. Nothing in a
//! pass raises because of missing data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::accessor::{self, attrs};
use crate::config::DiscoveryConfig;
use crate::diagnostics::{Diagnostic, DiagnosticCode, SharedSink, TracingSink};
use crate::model::*;
use crate::storage::SceneGraph;
use crate::{Error, Result};

/// Counters kept across passes. The only state a scanner carries.
#[derive(Debug, Default)]
pub struct ScanStats {
    pub passes: AtomicU64,
    pub nodes_visited: AtomicU64,
    pub ports_emitted: AtomicU64,
    pub ports_rejected: AtomicU64,
}

/// Plain copy of `ScanStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSnapshot {
    pub passes: u64,
    pub nodes_visited: u64,
    pub ports_emitted: u64,
    pub ports_rejected: u64,
}

impl ScanStats {
    pub fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            nodes_visited: self.nodes_visited.load(Ordering::Relaxed),
            ports_emitted: self.ports_emitted.load(Ordering::Relaxed),
            ports_rejected: self.ports_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Result of one scan: every port in the subtree, plus which of them belong
/// to the scanned component itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtreePorts {
    pub ports: Vec<Port>,
    /// Indices into `ports`, in discovery order.
    pub own: Vec<usize>,
}

impl SubtreePorts {
    pub fn own_ports(&self) -> Vec<Port> {
        self.own.iter().filter_map(|&i| self.ports.get(i)).cloned().collect()
    }
}

pub struct Scanner {
    config: DiscoveryConfig,
    sink: SharedSink,
    stats: ScanStats,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(DiscoveryConfig::default(), Arc::new(TracingSink))
    }
}

impl Scanner {
    pub fn new(config: DiscoveryConfig, sink: SharedSink) -> Self {
        Self { config, sink, stats: ScanStats::default() }
    }

    pub fn stats(&self) -> ScanSnapshot {
        self.stats.snapshot()
    }

    /// Discover every valid port in the subtree rooted at `root`, root included.
    ///
    /// Pre-order depth-first, children in stored order, so a fixed scene
    /// always yields the same sequence. Fails only if `root` does not exist.
    pub async fn discover_ports<G: SceneGraph + ?Sized>(
        &self,
        graph: &G,
        root: &NodePath,
    ) -> Result<Vec<Port>> {
        Ok(self.scan(graph, root).await?.ports)
    }

    /// Ports owned by the component at `root`: those not inside a nested
    /// component (a descendant declaring `capacity` or `generator_type`).
    pub async fn discover_own_ports<G: SceneGraph + ?Sized>(
        &self,
        graph: &G,
        root: &NodePath,
    ) -> Result<Vec<Port>> {
        Ok(self.scan(graph, root).await?.own_ports())
    }

    /// One pass over the subtree, recording which ports `root` owns.
    pub async fn scan<G: SceneGraph + ?Sized>(&self, graph: &G, root: &NodePath) -> Result<SubtreePorts> {
        let root_node = graph
            .get_node(root)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Node {root}")))?;

        self.stats.passes.fetch_add(1, Ordering::Relaxed);
        let mut scanned = SubtreePorts::default();
        // (node, inside a nested component)
        let mut stack = vec![(root_node, false)];

        while let Some((node, nested)) = stack.pop() {
            self.stats.nodes_visited.fetch_add(1, Ordering::Relaxed);

            if let Some(port) = self.port_from_node(&node, scanned.ports.len()) {
                if !nested {
                    scanned.own.push(scanned.ports.len());
                }
                scanned.ports.push(port);
            }

            let nested = nested || (node.path != *root && accessor::is_component(&node));
            // Reverse so the first child is visited next.
            let children = graph.children(&node.path).await?;
            stack.extend(children.into_iter().rev().map(|child| (child, nested)));
        }

        self.stats.ports_emitted.fetch_add(scanned.ports.len() as u64, Ordering::Relaxed);
        tracing::debug!(root = %root, ports = scanned.ports.len(), own = scanned.own.len(), "discovery pass complete");
        Ok(scanned)
    }

    /// Build a port from one node, or `None` if it is not a (valid) port.
    ///
    /// Emits at most one diagnostic per node.
    pub fn port_from_node(&self, node: &SceneNode, index: usize) -> Option<Port> {
        let (is_port, _) = accessor::require_all(node, &[attrs::PORT_TYPE]);
        if !is_port {
            return None;
        }

        let (complete, missing) =
            accessor::require_all(node, &[attrs::SYSTEM_TYPE, attrs::FLOW_DIRECTION]);
        if !complete {
            self.reject(node, DiagnosticCode::MissingAttribute, format!(
                "port dropped: missing {}",
                missing.join(", ")
            ));
            return None;
        }

        let raw_direction = accessor::read(node, attrs::FLOW_DIRECTION, String::new());
        let Some(flow_direction) = FlowDirection::parse(&raw_direction) else {
            self.reject(node, DiagnosticCode::InvalidAttribute, format!(
                "port dropped: flow_direction '{raw_direction}' is neither inlet nor outlet"
            ));
            return None;
        };

        // require_all guarantees both are non-empty strings or some other
        // non-string value; a non-string system_type is unusable.
        let (Some(port_type), Some(system_type)) = (
            accessor::read_text(node, attrs::PORT_TYPE),
            accessor::read_text(node, attrs::SYSTEM_TYPE),
        ) else {
            self.reject(node, DiagnosticCode::InvalidAttribute,
                "port dropped: port_type and system_type must be text");
            return None;
        };

        Some(Port {
            node: node.path.clone(),
            port_type,
            system_type,
            flow_direction,
            position: accessor::read(node, attrs::POSITION, Vec3::ZERO),
            shape: self.shape_of(node),
            capacity: accessor::read_opt::<f64>(node, attrs::CAPACITY),
            discovery_index: index,
        })
    }

    fn shape_of(&self, node: &SceneNode) -> PortShape {
        let shape = accessor::read_text(node, attrs::SHAPE)
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        let nominal = self.config.default_radius;
        match shape.as_str() {
            "rectangular" | "rect" => PortShape::Rectangular {
                width: positive(accessor::read_opt(node, attrs::WIDTH)).unwrap_or(2.0 * nominal),
                height: positive(accessor::read_opt(node, attrs::HEIGHT)).unwrap_or(2.0 * nominal),
            },
            _ => {
                let radius = positive(accessor::read_opt(node, attrs::RADIUS))
                    .or_else(|| positive(accessor::read_opt::<f64>(node, attrs::DIAMETER)).map(|d| d / 2.0))
                    .unwrap_or(nominal);
                PortShape::Round { radius }
            }
        }
    }

    fn reject(&self, node: &SceneNode, code: DiagnosticCode, message: impl Into<String>) {
        self.stats.ports_rejected.fetch_add(1, Ordering::Relaxed);
        self.sink.emit(Diagnostic::warn(code, node.path.clone(), message));
    }
}

fn positive(v: Option<f64>) -> Option<f64> {
    v.filter(|x| *x > 0.0 && x.is_finite())
}

/// Split ports into `(outlets, inlets)`, keeping discovery order.
pub fn split_by_direction(ports: Vec<Port>) -> (Vec<Port>, Vec<Port>) {
    ports.into_iter().partition(Port::is_outlet)
}
