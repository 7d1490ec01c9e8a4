//! # Self-Healing Controller
//!
//! Bounded audit → regenerate → write-back loop for one component.
//!
//! ```text
//!            ┌──────────── attempts < max ────────────┐
//!            v                                        │
//!   audit ──PASS──> Converged                         │
//!     │                                               │
//!     └─WARN/FAIL─> regenerate(node, params) ─> write back
//!            │
//!            └─ attempts == max ─> ConvergenceFailure (carries last audit)
//! ```
//!
//! Regeneration errors and rejected write-backs both consume an attempt.
//! Healing of one node is serialized through a per-path async mutex;
//! distinct nodes heal in parallel.

pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::accessor;
use crate::audit::{AuditResult, Auditor};
use crate::config::HealingConfig;
use crate::diagnostics::{Diagnostic, DiagnosticCode, Level, SharedSink};
use crate::model::*;
use crate::storage::SceneGraph;
use crate::{Error, Result};

pub use registry::GeneratorRegistry;

// ============================================================================
// Regeneration collaborator
// ============================================================================

/// Failure reported by a regeneration collaborator. Never fatal to the loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegenerationError {
    #[error("no generator registered for '{0}'")]
    NoGenerator(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("regeneration failed: {0}")]
    Failed(String),
}

/// Replacement state produced by a regenerator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegeneratedState {
    /// Attributes written to the healed node itself.
    pub attributes: Vec<(String, Value)>,
    /// Attributes written to descendants (ports). Missing nodes are created.
    pub children: Vec<(NodePath, Vec<(String, Value)>)>,
}

impl RegeneratedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_child(mut self, path: NodePath, attributes: Vec<(String, Value)>) -> Self {
        self.children.push((path, attributes));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.children.is_empty()
    }
}

/// Geometry regeneration collaborator.
///
/// Given a node and its corrected generation parameters, returns the full
/// replacement state. Failure is a value, not a panic.
#[async_trait]
pub trait Regenerator: Send + Sync {
    async fn regenerate(
        &self,
        node: &SceneNode,
        params: &PropertyMap,
    ) -> std::result::Result<RegeneratedState, RegenerationError>;
}

// ============================================================================
// Write guard
// ============================================================================

/// Brackets every write-back the controller performs.
///
/// The change watcher implements this to suppress its own notifications.
pub trait WriteGuard: Send + Sync {
    fn enter(&self);
    fn exit(&self);
}

/// Guard that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGuard;

impl WriteGuard for NoGuard {
    fn enter(&self) {}
    fn exit(&self) {}
}

/// Calls `exit` on drop so an early return cannot leave the guard entered.
struct Entered<'a>(&'a dyn WriteGuard);

impl<'a> Entered<'a> {
    fn new(guard: &'a dyn WriteGuard) -> Self {
        guard.enter();
        Self(guard)
    }
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.0.exit();
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealingStatus {
    Converged,
    ConvergenceFailure,
}

/// Outcome of one `heal` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingAttempt {
    pub target: NodePath,
    /// Regeneration attempts made (0 if the first audit already passed).
    pub attempts: u32,
    /// The most recent audit.
    pub last: AuditResult,
    pub status: HealingStatus,
    /// One message per failed attempt.
    pub errors: Vec<String>,
}

impl HealingAttempt {
    pub fn converged(&self) -> bool {
        self.status == HealingStatus::Converged
    }
}

// ============================================================================
// Controller
// ============================================================================

pub struct HealingController<G: SceneGraph> {
    graph: Arc<G>,
    auditor: Arc<Auditor>,
    regenerator: Arc<dyn Regenerator>,
    config: HealingConfig,
    sink: SharedSink,
    locks: parking_lot::Mutex<HashMap<NodePath, Arc<tokio::sync::Mutex<()>>>>,
}

impl<G: SceneGraph> HealingController<G> {
    pub fn new(
        graph: Arc<G>,
        auditor: Arc<Auditor>,
        regenerator: Arc<dyn Regenerator>,
        config: HealingConfig,
        sink: SharedSink,
    ) -> Self {
        Self {
            graph,
            auditor,
            regenerator,
            config,
            sink,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HealingConfig {
        &self.config
    }

    pub fn auditor(&self) -> &Arc<Auditor> {
        &self.auditor
    }

    pub fn regenerator(&self) -> &Arc<dyn Regenerator> {
        &self.regenerator
    }

    /// Heal with the configured attempt budget and no write guard.
    pub async fn heal_default(&self, path: &NodePath) -> Result<HealingAttempt> {
        self.heal_guarded(path, self.config.max_attempts, &NoGuard).await
    }

    pub async fn heal(&self, path: &NodePath, max_attempts: u32) -> Result<HealingAttempt> {
        self.heal_guarded(path, max_attempts, &NoGuard).await
    }

    /// Run the healing loop, wrapping every write-back in `guard`.
    ///
    /// Returns `Err` only for store faults (the node vanished, the store
    /// failed a read). Non-convergence is reported in the returned value.
    pub async fn heal_guarded(
        &self,
        path: &NodePath,
        max_attempts: u32,
        guard: &dyn WriteGuard,
    ) -> Result<HealingAttempt> {
        let lock = self.lock_for(path);
        let result = {
            let _serialized = lock.lock().await;
            self.heal_locked(path, max_attempts, guard).await
        };
        self.release_lock(path, lock);
        result
    }

    async fn heal_locked(
        &self,
        path: &NodePath,
        max_attempts: u32,
        guard: &dyn WriteGuard,
    ) -> Result<HealingAttempt> {
        let mut attempts = 0;
        let mut errors = Vec::new();

        loop {
            let last = self.auditor.audit(&*self.graph, path).await?;
            if last.is_pass() {
                tracing::info!(path = %path, attempts, "healing converged");
                return Ok(HealingAttempt {
                    target: path.clone(),
                    attempts,
                    last,
                    status: HealingStatus::Converged,
                    errors,
                });
            }
            if attempts >= max_attempts {
                self.sink.emit(Diagnostic::new(
                    Level::Error,
                    DiagnosticCode::ConvergenceFailure,
                    path.clone(),
                    format!("no PASS after {attempts} attempts: {}", last.message),
                ));
                return Ok(HealingAttempt {
                    target: path.clone(),
                    attempts,
                    last,
                    status: HealingStatus::ConvergenceFailure,
                    errors,
                });
            }

            attempts += 1;
            tracing::debug!(path = %path, attempt = attempts, verdict = %last.verdict, "regenerating");

            let node = self
                .graph
                .get_node(path)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Node {path}")))?;
            let params = generation_params(&node, &last);

            match self.regenerator.regenerate(&node, &params).await {
                Ok(state) => {
                    if let Err(msg) = self.write_back(path, state, guard).await {
                        self.sink.emit(Diagnostic::warn(DiagnosticCode::WriteRejected, path.clone(), &msg));
                        errors.push(msg);
                    }
                }
                Err(e) => {
                    self.sink.emit(Diagnostic::warn(
                        DiagnosticCode::RegenerationFailed,
                        path.clone(),
                        format!("attempt {attempts}: {e}"),
                    ));
                    errors.push(e.to_string());
                }
            }
        }
    }

    async fn write_back(
        &self,
        path: &NodePath,
        state: RegeneratedState,
        guard: &dyn WriteGuard,
    ) -> std::result::Result<(), String> {
        let _entered = Entered::new(guard);
        apply_state(&*self.graph, path, state).await
    }

    fn lock_for(&self, path: &NodePath) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(path.clone()).or_default())
    }

    /// Drop the table entry once no other heal holds or waits on it.
    fn release_lock(&self, path: &NodePath, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(lock);
        if locks.get(path).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(path);
        }
    }
}

/// Write a regenerated state back through the Accessor.
///
/// Child entries must lie under `path`; missing children are created as
/// `Port` nodes. The first rejected write stops the write-back.
pub async fn apply_state<G: SceneGraph + ?Sized>(
    graph: &G,
    path: &NodePath,
    state: RegeneratedState,
) -> std::result::Result<(), String> {
    if !state.attributes.is_empty() && !accessor::write_many(graph, path, state.attributes).await {
        return Err(format!("write-back to {path} rejected"));
    }
    for (child, attributes) in state.children {
        if !path.is_ancestor_of(&child) {
            return Err(format!("regenerated child {child} is outside {path}"));
        }
        let exists = graph.get_node(&child).await.map_err(|e| e.to_string())?.is_some();
        if !exists {
            graph.create_node(&child, "Port").await.map_err(|e| e.to_string())?;
        }
        if !accessor::write_many(graph, &child, attributes).await {
            return Err(format!("write-back to {child} rejected"));
        }
    }
    Ok(())
}

/// The node's current attribute values overlaid with the audit's
/// recommendations.
pub fn generation_params(node: &SceneNode, audit: &AuditResult) -> PropertyMap {
    let mut params = accessor::values(node);
    for (name, value) in &audit.recommendations {
        params.insert(name.clone(), Value::Float(*value));
    }
    params
}
