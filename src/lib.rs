//! # twin-ports: Port Discovery, Matching and Self-Healing for Scene Graphs
//!
//! Finds the connection points (ports) declared on components in a
//! hierarchical scene, proposes outlet → inlet connections, audits each
//! component's flow requirement against its ports, and drives a bounded
//! regenerate-and-reaudit loop when a component is undersized.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `SceneGraph` is the contract between the port core and the host scene
//! 2. **Clean DTOs**: `SceneNode`, `Port`, `Value` cross all boundaries
//! 3. **Absence is data**: missing attributes become `Option`s and diagnostics, never errors
//! 4. **No self-triggering**: the watcher drops notifications caused by its own writes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use twin_ports::{NodePath, SceneNode, Twin};
//!
//! # async fn example() -> twin_ports::Result<()> {
//! let twin = Twin::open_memory();
//! twin.graph().load(vec![
//!     SceneNode::new(NodePath::parse("/AHU")?, "Xform").with_attribute("capacity", 5000.0),
//!     SceneNode::new(NodePath::parse("/AHU/Out")?, "Port")
//!         .with_attribute("port_type", "duct")
//!         .with_attribute("system_type", "supply")
//!         .with_attribute("flow_direction", "outlet")
//!         .with_attribute("radius", 6.0),
//! ])?;
//!
//! let audit = twin.audit(&NodePath::parse("/AHU")?).await?;
//! println!("{}: {:?}", audit.verdict, audit.recommendations);
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Backends
//!
//! | Backend | Description |
//! |---------|-------------|
//! | `MemoryScene` | In-memory scene for testing/embedding |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod storage;
pub mod accessor;
pub mod diagnostics;
pub mod config;
pub mod discovery;
pub mod matching;
pub mod audit;
pub mod healing;
pub mod watcher;
pub mod export;

use std::sync::Arc;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    SceneNode, NodePath, Port, PortShape, FlowDirection,
    Value, ValueType, Vec3, PropertyMap,
};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{SceneGraph, MemoryScene, ChangeBatch, ChangeListener, SubscriptionId};

// ============================================================================
// Re-exports: Pipeline
// ============================================================================

pub use config::CoreConfig;
pub use diagnostics::{Diagnostic, DiagnosticCode, DiagnosticsSink, MemorySink, TracingSink};
pub use discovery::{Scanner, SubtreePorts};
pub use matching::{Connection, MatchResult, MatchingEngine};
pub use audit::{AuditResult, Auditor, Verdict};
pub use healing::{
    GeneratorRegistry, HealingAttempt, HealingController, HealingStatus,
    RegeneratedState, RegenerationError, Regenerator, WriteGuard,
};
pub use watcher::{CycleReport, NotifyOutcome, RootReport, Watcher, WatcherState};

use diagnostics::SharedSink;

// ============================================================================
// Top-level Twin handle
// ============================================================================

/// The primary entry point. A `Twin` wraps a scene backend and wires the
/// scanner, matcher, auditor and (optionally) the healing controller over it.
pub struct Twin<G: SceneGraph> {
    graph: Arc<G>,
    config: CoreConfig,
    sink: SharedSink,
    scanner: Arc<Scanner>,
    matcher: MatchingEngine,
    auditor: Arc<Auditor>,
    healer: Option<Arc<HealingController<G>>>,
}

impl<G: SceneGraph> Twin<G> {
    /// Wrap a backend with default configuration, logging through `tracing`.
    pub fn with_graph(graph: G) -> Self {
        Self::build(Arc::new(graph), CoreConfig::default(), Arc::new(TracingSink))
    }

    /// Wrap a shared backend with explicit configuration and sink.
    pub fn new(graph: Arc<G>, config: CoreConfig, sink: SharedSink) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(graph, config, sink))
    }

    fn build(graph: Arc<G>, config: CoreConfig, sink: SharedSink) -> Self {
        let scanner = Arc::new(Scanner::new(config.discovery.clone(), Arc::clone(&sink)));
        let matcher = MatchingEngine::new(config.matching.clone());
        let auditor = Arc::new(Auditor::new(config.audit.clone(), Arc::clone(&scanner), Arc::clone(&sink)));
        Self { graph, config, sink, scanner, matcher, auditor, healer: None }
    }

    /// Enable healing with the given regeneration collaborator.
    pub fn with_regenerator(mut self, regenerator: Arc<dyn Regenerator>) -> Self {
        self.healer = Some(Arc::new(HealingController::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.auditor),
            regenerator,
            self.config.healing.clone(),
            Arc::clone(&self.sink),
        )));
        self
    }

    pub fn graph(&self) -> &Arc<G> {
        &self.graph
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn scanner(&self) -> &Arc<Scanner> {
        &self.scanner
    }

    pub fn healer(&self) -> Option<&Arc<HealingController<G>>> {
        self.healer.as_ref()
    }

    /// All valid ports under `root`, in traversal order.
    pub async fn discover(&self, root: &NodePath) -> Result<Vec<Port>> {
        self.scanner.discover_ports(&*self.graph, root).await
    }

    /// Discover under `root` and propose connections.
    pub async fn match_ports(&self, root: &NodePath) -> Result<MatchResult> {
        let ports = self.discover(root).await?;
        Ok(self.matcher.match_all(&ports))
    }

    /// Record accepted connections on the port nodes.
    pub async fn connect(&self, result: &MatchResult) -> usize {
        matching::connect(&*self.graph, &result.connections).await
    }

    /// Components linked to `root` through recorded connections.
    pub async fn connected_components(&self, root: &NodePath) -> Result<Vec<NodePath>> {
        matching::connected_components(&*self.graph, root).await
    }

    /// Push `root`'s dimensions to its connected components and regenerate them.
    pub async fn propagate_dimensions(&self, root: &NodePath) -> Result<usize> {
        let healer = self
            .healer
            .as_ref()
            .ok_or_else(|| Error::Regeneration("no regenerator configured".into()))?;
        matching::propagate_dimensions(&*self.graph, root, healer.regenerator().as_ref()).await
    }

    pub async fn audit(&self, path: &NodePath) -> Result<AuditResult> {
        self.auditor.audit(&*self.graph, path).await
    }

    /// Heal with the configured attempt budget.
    pub async fn heal(&self, path: &NodePath) -> Result<HealingAttempt> {
        let healer = self
            .healer
            .as_ref()
            .ok_or_else(|| Error::Regeneration("no regenerator configured".into()))?;
        healer.heal_default(path).await
    }

    /// Build a watcher over this twin's components and subscribe it.
    pub fn watcher(&self) -> Arc<Watcher<G>> {
        let mut watcher = Watcher::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.scanner),
            self.matcher.clone(),
            Arc::clone(&self.auditor),
            self.config.watcher.clone(),
            Arc::clone(&self.sink),
        );
        if let Some(healer) = &self.healer {
            watcher = watcher.with_healer(Arc::clone(healer));
        }
        let watcher = Arc::new(watcher);
        watcher.attach();
        watcher
    }
}

/// In-memory scene for testing and embedding.
impl Twin<MemoryScene> {
    pub fn open_memory() -> Self {
        Self::with_graph(MemoryScene::new())
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Regeneration error: {0}")]
    Regeneration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
