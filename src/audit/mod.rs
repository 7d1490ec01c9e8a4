//! # Audit Engine
//!
//! Checks a component's declared flow requirement against the ports it
//! actually has, and proposes corrected port dimensions when they are too
//! small.
//!
//! ```text
//! capacity (cfm) ─┐
//!                 ├─> velocity = capacity / Σ area(outlet) ─> PASS | WARN | FAIL
//! outlet ports ───┘                                              │
//!                                    recommendations <── invert ─┘
//! ```
//!
//! Auditing never mutates the scene.

pub mod sizing;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::accessor::{self, attrs};
use crate::config::AuditConfig;
use crate::diagnostics::{Diagnostic, DiagnosticCode, Level, SharedSink};
use crate::discovery::Scanner;
use crate::model::*;
use crate::storage::SceneGraph;
use crate::{Error, Result};

/// Metric keys reported in `AuditResult::metrics`.
pub mod metrics {
    pub const CAPACITY: &str = "capacity";
    pub const PORT_COUNT: &str = "port_count";
    pub const TOTAL_AREA: &str = "total_area_sq_ft";
    pub const VELOCITY: &str = "velocity";
    pub const THRESHOLD: &str = "threshold";
    pub const WARN_LEVEL: &str = "warn_level";
}

/// Recommendation key for the uniform linear scale applied to port dimensions.
pub const AREA_SCALE: &str = "area_scale";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "PASS",
            Verdict::Warn => "WARN",
            Verdict::Fail => "FAIL",
        })
    }
}

/// Outcome of one audit. Built fresh per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub verdict: Verdict,
    pub message: String,
    pub metrics: BTreeMap<String, f64>,
    /// Corrected parameter values, keyed by attribute name.
    pub recommendations: BTreeMap<String, f64>,
}

impl AuditResult {
    pub fn skipped() -> Self {
        Self {
            verdict: Verdict::Pass,
            message: "no requirement declared, audit skipped".into(),
            metrics: BTreeMap::new(),
            recommendations: BTreeMap::new(),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

pub struct Auditor {
    config: AuditConfig,
    scanner: Arc<Scanner>,
    sink: SharedSink,
}

impl Auditor {
    pub fn new(config: AuditConfig, scanner: Arc<Scanner>, sink: SharedSink) -> Self {
        Self { config, scanner, sink }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Discover the ports `path` owns and audit the node against them.
    ///
    /// Ports of nested components are left to those components' own audits.
    pub async fn audit<G: SceneGraph + ?Sized>(&self, graph: &G, path: &NodePath) -> Result<AuditResult> {
        let node = graph
            .get_node(path)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Node {path}")))?;
        if declared_capacity(&node).is_none() {
            return Ok(self.skip(&node));
        }
        let ports = self.scanner.discover_own_ports(graph, path).await?;
        Ok(self.audit_node(&node, &ports))
    }

    /// Audit a node against an already-discovered port set.
    pub fn audit_node(&self, node: &SceneNode, ports: &[Port]) -> AuditResult {
        let Some(capacity) = declared_capacity(node) else {
            return self.skip(node);
        };

        let service = accessor::read_text(node, attrs::SERVICE);
        let threshold = self.config.threshold_for(service.as_deref());
        let warn_level = threshold * (1.0 - self.config.warn_margin);
        let relevant: Vec<&Port> = ports
            .iter()
            .filter(|p| p.flow_direction == self.config.direction)
            .collect();

        let mut measured = BTreeMap::new();
        measured.insert(metrics::CAPACITY.to_owned(), capacity);
        measured.insert(metrics::PORT_COUNT.to_owned(), relevant.len() as f64);
        measured.insert(metrics::THRESHOLD.to_owned(), threshold);
        measured.insert(metrics::WARN_LEVEL.to_owned(), warn_level);

        if relevant.is_empty() {
            let result = AuditResult {
                verdict: Verdict::Fail,
                message: format!(
                    "capacity {capacity} declared but no {} ports discovered",
                    self.config.direction
                ),
                metrics: measured,
                recommendations: BTreeMap::new(),
            };
            self.report(node, &result);
            return result;
        }

        let total_area: f64 = relevant.iter().map(|p| p.area_sq_ft()).sum();
        let velocity = sizing::velocity_fpm(capacity, total_area);
        measured.insert(metrics::TOTAL_AREA.to_owned(), total_area);
        measured.insert(metrics::VELOCITY.to_owned(), velocity);

        let (verdict, message) = if velocity > threshold {
            (Verdict::Fail, format!("velocity {velocity:.0} fpm exceeds limit {threshold:.0} fpm"))
        } else if velocity > warn_level {
            (Verdict::Warn, format!(
                "velocity {velocity:.0} fpm within {:.0}% of limit {threshold:.0} fpm",
                self.config.warn_margin * 100.0
            ))
        } else {
            (Verdict::Pass, format!("velocity {velocity:.0} fpm within limit {threshold:.0} fpm"))
        };

        let recommendations = if verdict == Verdict::Pass {
            BTreeMap::new()
        } else {
            self.recommend(capacity, warn_level, total_area, &relevant)
        };

        let result = AuditResult { verdict, message, metrics: measured, recommendations };
        self.report(node, &result);
        result
    }

    /// Invert the velocity relation: size ports so velocity lands at or
    /// below the warn level.
    fn recommend(
        &self,
        capacity: f64,
        target_velocity: f64,
        current_area: f64,
        ports: &[&Port],
    ) -> BTreeMap<String, f64> {
        let increment = self.config.size_increment;
        // Nudge past the boundary so float error cannot leave us in WARN.
        let required = sizing::required_area_sq_ft(capacity, target_velocity) * (1.0 + 1e-9);
        let scale = (required / current_area).sqrt();

        let mut rec = BTreeMap::new();
        rec.insert(AREA_SCALE.to_owned(), scale);

        if ports.iter().all(|p| p.shape.is_round()) {
            let radius = sizing::radius_for_area(required, ports.len());
            rec.insert(attrs::RADIUS.to_owned(), sizing::ceil_to(radius, increment));
            return rec;
        }

        for port in ports {
            match port.shape {
                PortShape::Rectangular { width, height } if !rec.contains_key(attrs::WIDTH) => {
                    rec.insert(attrs::WIDTH.to_owned(), sizing::ceil_to(width * scale, increment));
                    rec.insert(attrs::HEIGHT.to_owned(), sizing::ceil_to(height * scale, increment));
                }
                PortShape::Round { radius } if !rec.contains_key(attrs::RADIUS) => {
                    rec.insert(attrs::RADIUS.to_owned(), sizing::ceil_to(radius * scale, increment));
                }
                _ => {}
            }
        }
        rec
    }

    fn skip(&self, node: &SceneNode) -> AuditResult {
        self.sink.emit(Diagnostic::new(
            Level::Debug,
            DiagnosticCode::AuditSkipped,
            node.path.clone(),
            "no capacity requirement declared",
        ));
        AuditResult::skipped()
    }

    fn report(&self, node: &SceneNode, result: &AuditResult) {
        if result.verdict != Verdict::Pass {
            self.sink.emit(Diagnostic::warn(
                DiagnosticCode::AuditVerdict,
                node.path.clone(),
                format!("{}: {}", result.verdict, result.message),
            ));
        }
    }
}

/// Positive, finite `capacity` on the node, if any.
pub fn declared_capacity(node: &SceneNode) -> Option<f64> {
    accessor::read_opt::<f64>(node, attrs::CAPACITY).filter(|c| *c > 0.0 && c.is_finite())
}
