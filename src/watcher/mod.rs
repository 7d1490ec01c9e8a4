//! # Change Watcher
//!
//! Turns store notifications into pipeline cycles without ever feeding on
//! its own writes.
//!
//! ```text
//!                 notification
//!        Idle ─────────────────────> Processing ──(heal write)──> Suppressed
//!         ^                            │   ^  │                       │
//!         │        pending empty       │   │  └─ notification:        │
//!         └────────────────────────────┘   │     coalesced            │
//!                                          └───────── write done ─────┘
//!                                                 (notification: dropped)
//! ```
//!
//! Stores deliver notifications synchronously on the writing task, so a
//! write made while `Suppressed` is seen (and dropped) before the write
//! call returns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::accessor;
use crate::audit::{AuditResult, Auditor};
use crate::config::WatcherConfig;
use crate::diagnostics::{Diagnostic, DiagnosticCode, Level, SharedSink};
use crate::discovery::Scanner;
use crate::healing::{HealingAttempt, HealingController, WriteGuard};
use crate::matching::{MatchResult, MatchingEngine};
use crate::model::*;
use crate::storage::{ChangeBatch, ChangeListener, SceneGraph, SubscriptionId};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatcherState {
    Idle,
    Processing,
    Suppressed,
}

/// What `on_change` did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyOutcome {
    /// Started a new cycle.
    Accepted,
    /// Folded into the pending set of the running cycle.
    Coalesced,
    /// Caused by the watcher's own write; dropped.
    Suppressed,
}

/// Pipeline output for one resolved root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootReport {
    pub root: NodePath,
    pub ports: Vec<Port>,
    pub matching: MatchResult,
    pub audit: AuditResult,
    pub healing: Option<HealingAttempt>,
}

/// One pass over a coalesced set of changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Number of distinct changed paths folded into this cycle.
    pub changed: usize,
    pub roots: Vec<NodePath>,
    pub reports: Vec<RootReport>,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    cycles: AtomicU64,
    coalesced: AtomicU64,
    suppressed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherStats {
    pub accepted: u64,
    pub cycles: u64,
    pub coalesced: u64,
    pub suppressed: u64,
}

struct Shared {
    state: WatcherState,
    pending: HashSet<NodePath>,
}

pub struct Watcher<G: SceneGraph> {
    graph: Arc<G>,
    scanner: Arc<Scanner>,
    matcher: MatchingEngine,
    auditor: Arc<Auditor>,
    healer: Option<Arc<HealingController<G>>>,
    config: WatcherConfig,
    sink: SharedSink,
    shared: Mutex<Shared>,
    /// Held for the duration of a drain; one cycle runs at a time.
    cycle: tokio::sync::Mutex<()>,
    wake: Notify,
    stopped: AtomicBool,
    counters: Counters,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl<G: SceneGraph> Watcher<G> {
    pub fn new(
        graph: Arc<G>,
        scanner: Arc<Scanner>,
        matcher: MatchingEngine,
        auditor: Arc<Auditor>,
        config: WatcherConfig,
        sink: SharedSink,
    ) -> Self {
        Self {
            graph,
            scanner,
            matcher,
            auditor,
            healer: None,
            config,
            sink,
            shared: Mutex::new(Shared { state: WatcherState::Idle, pending: HashSet::new() }),
            cycle: tokio::sync::Mutex::new(()),
            wake: Notify::new(),
            stopped: AtomicBool::new(false),
            counters: Counters::default(),
            subscription: Mutex::new(None),
        }
    }

    /// Healing controller used when `auto_heal` is on.
    pub fn with_healer(mut self, healer: Arc<HealingController<G>>) -> Self {
        self.healer = Some(healer);
        self
    }

    pub fn state(&self) -> WatcherState {
        self.shared.lock().state
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
        }
    }

    /// Subscribe to the graph. Idempotent.
    pub fn attach(self: &Arc<Self>) -> SubscriptionId {
        let mut sub = self.subscription.lock();
        if let Some(id) = *sub {
            return id;
        }
        let listener: Arc<dyn ChangeListener> = Arc::clone(self) as Arc<dyn ChangeListener>;
        let id = self.graph.subscribe(listener);
        *sub = Some(id);
        id
    }

    pub fn detach(&self) -> bool {
        match self.subscription.lock().take() {
            Some(id) => self.graph.unsubscribe(id),
            None => false,
        }
    }

    /// Feed one notification through the state machine.
    pub fn notify(&self, batch: &ChangeBatch) -> NotifyOutcome {
        let outcome = {
            let mut shared = self.shared.lock();
            match shared.state {
                WatcherState::Idle => {
                    shared.state = WatcherState::Processing;
                    shared.pending.extend(batch.paths.iter().cloned());
                    NotifyOutcome::Accepted
                }
                WatcherState::Processing => {
                    shared.pending.extend(batch.paths.iter().cloned());
                    NotifyOutcome::Coalesced
                }
                WatcherState::Suppressed => NotifyOutcome::Suppressed,
            }
        };

        let first = batch.paths.first().cloned().unwrap_or_else(NodePath::root);
        match outcome {
            NotifyOutcome::Accepted => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                self.wake.notify_one();
            }
            NotifyOutcome::Coalesced => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                self.sink.emit(Diagnostic::new(
                    Level::Debug,
                    DiagnosticCode::Coalesced,
                    first,
                    format!("revision {} coalesced into running cycle", batch.revision),
                ));
            }
            NotifyOutcome::Suppressed => {
                self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                self.sink.emit(Diagnostic::new(
                    Level::Debug,
                    DiagnosticCode::Suppressed,
                    first,
                    format!("revision {} caused by own write, dropped", batch.revision),
                ));
            }
        }
        outcome
    }

    /// Run cycles until nothing is pending, then go Idle.
    pub async fn drain(&self) -> Result<Vec<CycleReport>> {
        let _cycle = self.cycle.lock().await;
        let mut reports = Vec::new();
        loop {
            let changed: Vec<NodePath> = {
                let mut shared = self.shared.lock();
                if shared.pending.is_empty() {
                    shared.state = WatcherState::Idle;
                    return Ok(reports);
                }
                shared.state = WatcherState::Processing;
                shared.pending.drain().collect()
            };
            match self.run_cycle(changed).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    // Paths coalesced during the failed cycle run with the next accepted notification.
                    self.shared.lock().state = WatcherState::Idle;
                    return Err(e);
                }
            }
        }
    }

    /// Drive `drain` whenever a notification starts a cycle. Returns after `stop`.
    pub async fn run(self: Arc<Self>) {
        tracing::info!("watcher started");
        while !self.stopped.load(Ordering::SeqCst) {
            self.wake.notified().await;
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.drain().await {
                tracing::error!(error = %e, "watcher cycle failed");
            }
        }
        tracing::info!("watcher stopped");
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    async fn run_cycle(&self, changed: Vec<NodePath>) -> Result<CycleReport> {
        let count = changed.len();
        let roots = self.resolve_roots(changed).await?;
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(changed = count, roots = roots.len(), "watcher cycle");

        let mut reports = Vec::with_capacity(roots.len());
        for root in &roots {
            if let Some(report) = self.process_root(root).await? {
                reports.push(report);
            }
        }
        Ok(CycleReport { changed: count, roots, reports })
    }

    async fn process_root(&self, root: &NodePath) -> Result<Option<RootReport>> {
        // The root may vanish between resolution and processing.
        let Some(node) = self.graph.get_node(root).await? else {
            self.sink.emit(Diagnostic::info(DiagnosticCode::NodeVanished, root.clone(), "root removed before processing"));
            return Ok(None);
        };
        let scanned = self.scanner.scan(&*self.graph, root).await?;
        let matching = self.matcher.match_all(&scanned.ports);
        let audit = self.auditor.audit_node(&node, &scanned.own_ports());
        let ports = scanned.ports;

        let healing = match (&self.healer, self.config.auto_heal && !audit.is_pass()) {
            (Some(healer), true) => {
                let max = healer.config().max_attempts;
                Some(healer.heal_guarded(root, max, self).await?)
            }
            _ => None,
        };

        Ok(Some(RootReport { root: root.clone(), ports, matching, audit, healing }))
    }

    /// Map changed paths to the minimal set of component subtrees.
    pub async fn resolve_roots(&self, changed: Vec<NodePath>) -> Result<Vec<NodePath>> {
        let mut roots: Vec<NodePath> = Vec::new();
        for path in changed {
            if let Some(root) = self.resolve_root(&path).await? {
                if !roots.contains(&root) {
                    roots.push(root);
                }
            }
        }
        roots.sort();
        let minimal = roots
            .iter()
            .filter(|r| !roots.iter().any(|other| other.is_ancestor_of(r)))
            .cloned()
            .collect();
        Ok(minimal)
    }

    /// Nearest existing ancestor-or-self declaring `capacity` or
    /// `generator_type`, else the nearest existing ancestor-or-self.
    async fn resolve_root(&self, path: &NodePath) -> Result<Option<NodePath>> {
        let mut nearest_existing = None;
        for candidate in std::iter::once(path.clone()).chain(path.ancestors()) {
            let Some(node) = self.graph.get_node(&candidate).await? else {
                continue;
            };
            if nearest_existing.is_none() {
                if candidate != *path {
                    self.sink.emit(Diagnostic::info(
                        DiagnosticCode::NodeVanished,
                        path.clone(),
                        format!("changed node no longer exists, using {candidate}"),
                    ));
                }
                nearest_existing = Some(candidate.clone());
            }
            if accessor::is_component(&node) {
                return Ok(Some(candidate));
            }
        }
        Ok(nearest_existing)
    }
}

impl<G: SceneGraph> ChangeListener for Watcher<G> {
    fn on_change(&self, batch: &ChangeBatch) {
        self.notify(batch);
    }
}

impl<G: SceneGraph> WriteGuard for Watcher<G> {
    fn enter(&self) {
        self.shared.lock().state = WatcherState::Suppressed;
    }

    fn exit(&self) {
        let mut shared = self.shared.lock();
        if shared.state == WatcherState::Suppressed {
            shared.state = WatcherState::Processing;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuditConfig, DiscoveryConfig};
    use crate::diagnostics::MemorySink;
    use crate::storage::MemoryScene;

    fn p(s: &str) -> NodePath {
        NodePath::parse(s).unwrap()
    }

    fn watcher(scene: Arc<MemoryScene>) -> (Arc<Watcher<MemoryScene>>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let scanner = Arc::new(Scanner::new(DiscoveryConfig::default(), sink.clone()));
        let auditor = Arc::new(Auditor::new(AuditConfig::default(), scanner.clone(), sink.clone()));
        let watcher = Watcher::new(
            scene,
            scanner,
            MatchingEngine::default(),
            auditor,
            WatcherConfig::default(),
            sink.clone(),
        );
        (Arc::new(watcher), sink)
    }

    fn scene() -> Arc<MemoryScene> {
        let scene = MemoryScene::new();
        scene.load(vec![
            SceneNode::new(p("/World"), "Xform"),
            SceneNode::new(p("/World/AHU"), "Xform").with_attribute("capacity", 1000.0),
            SceneNode::new(p("/World/AHU/Out"), "Port")
                .with_attribute("port_type", "duct")
                .with_attribute("system_type", "supply")
                .with_attribute("flow_direction", "outlet"),
            SceneNode::new(p("/World/Misc"), "Xform"),
        ]).unwrap();
        Arc::new(scene)
    }

    #[test]
    fn test_state_transitions() {
        let (watcher, sink) = watcher(scene());
        let batch = ChangeBatch::new(1, vec![p("/World/AHU")]);

        assert_eq!(watcher.notify(&batch), NotifyOutcome::Accepted);
        assert_eq!(watcher.state(), WatcherState::Processing);
        assert_eq!(watcher.notify(&batch), NotifyOutcome::Coalesced);

        watcher.enter();
        assert_eq!(watcher.notify(&batch), NotifyOutcome::Suppressed);
        watcher.exit();
        assert_eq!(watcher.state(), WatcherState::Processing);

        assert_eq!(sink.count(DiagnosticCode::Coalesced), 1);
        assert_eq!(sink.count(DiagnosticCode::Suppressed), 1);
        assert_eq!(watcher.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_roots_climbs_to_component_and_minimizes() {
        let (watcher, _) = watcher(scene());
        let roots = watcher
            .resolve_roots(vec![p("/World/AHU/Out"), p("/World/AHU"), p("/World/Misc")])
            .await
            .unwrap();
        assert_eq!(roots, vec![p("/World/AHU"), p("/World/Misc")]);

        let roots = watcher.resolve_roots(vec![p("/World"), p("/World/AHU/Out")]).await.unwrap();
        assert_eq!(roots, vec![p("/World")]);
    }

    #[tokio::test]
    async fn test_vanished_path_falls_back_to_existing_ancestor() {
        let (watcher, sink) = watcher(scene());
        let roots = watcher.resolve_roots(vec![p("/World/AHU/Gone/Deeper")]).await.unwrap();
        assert_eq!(roots, vec![p("/World/AHU")]);
        assert_eq!(sink.count(DiagnosticCode::NodeVanished), 1);
    }

    #[tokio::test]
    async fn test_cycle_audits_only_the_roots_own_ports() {
        let scene = MemoryScene::new();
        let outlet = |path: &str, radius: f64| {
            SceneNode::new(p(path), "Port")
                .with_attribute("port_type", "duct")
                .with_attribute("system_type", "supply")
                .with_attribute("flow_direction", "outlet")
                .with_attribute("radius", radius)
        };
        scene.load(vec![
            SceneNode::new(p("/Plant"), "Xform").with_attribute("capacity", 5000.0),
            outlet("/Plant/Out", 6.0),
            SceneNode::new(p("/Plant/Fan"), "Xform").with_attribute("generator_type", "fan"),
            outlet("/Plant/Fan/Out", 30.0),
        ]).unwrap();
        let (watcher, _) = watcher(Arc::new(scene));

        watcher.notify(&ChangeBatch::new(1, vec![p("/Plant")]));
        let cycles = watcher.drain().await.unwrap();
        let report = &cycles[0].reports[0];
        assert_eq!(report.ports.len(), 2);
        assert_eq!(report.audit.verdict, crate::audit::Verdict::Fail);
        assert_eq!(report.audit.metric(crate::audit::metrics::PORT_COUNT), Some(1.0));
    }

    #[tokio::test]
    async fn test_drain_runs_one_cycle_and_returns_idle() {
        let scene = scene();
        let (watcher, _) = watcher(scene.clone());
        watcher.attach();

        for i in 0..5 {
            scene
                .set_attribute(&p("/World/AHU/Out"), "radius", ValueType::Float, Some(Value::Float(4.0 + i as f64)))
                .await
                .unwrap();
        }
        let stats = watcher.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.coalesced, 4);

        let cycles = watcher.drain().await.unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].roots, vec![p("/World/AHU")]);
        assert_eq!(cycles[0].reports[0].ports.len(), 1);
        assert_eq!(watcher.state(), WatcherState::Idle);
        assert_eq!(watcher.stats().cycles, 1);

        assert!(watcher.detach());
        assert!(watcher.drain().await.unwrap().is_empty());
    }
}
