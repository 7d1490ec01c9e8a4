//! In-memory scene backend.
//!
//! This is the reference implementation of `SceneGraph`.
//! It uses a HashMap of node snapshots protected by RwLock.
//!
//! ## Notification delivery
//!
//! Listeners are invoked synchronously on the mutating thread once every
//! internal lock has been dropped, so a listener may read the store (or
//! even write to it) from inside `on_change` without deadlocking.
//!
//! Use this backend for:
//! - Testing discovery, matching, audit and healing
//! - Embedding the port core in tools that keep their own scene

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;

use crate::model::*;
use crate::{Error, Result};
use super::{ChangeBatch, ChangeListener, SceneGraph, SubscriptionId};

// ============================================================================
// MemoryScene
// ============================================================================

/// In-memory hierarchical scene.
#[derive(Clone)]
pub struct MemoryScene {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    nodes: RwLock<HashMap<NodePath, SceneNode>>,
    /// (node, attribute) pairs that refuse writes
    read_only: RwLock<HashSet<(NodePath, String)>>,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn ChangeListener>)>>,
    revision: AtomicU64,
    next_subscription: AtomicU64,
}

impl Default for MemoryScene {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryScene {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(NodePath::root(), SceneNode::new(NodePath::root(), "Root"));
        Self {
            inner: Arc::new(MemoryInner {
                nodes: RwLock::new(nodes),
                read_only: RwLock::new(HashSet::new()),
                listeners: RwLock::new(Vec::new()),
                revision: AtomicU64::new(0),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Bulk-load node snapshots without emitting notifications.
    ///
    /// Parents must come before their children. Any `children` listed on the
    /// incoming snapshots are ignored; hierarchy is rebuilt from the paths.
    pub fn load(&self, nodes: impl IntoIterator<Item = SceneNode>) -> Result<()> {
        let mut map = self.inner.nodes.write();
        for mut node in nodes {
            let parent = node.path.parent()
                .ok_or_else(|| Error::InvalidPath("cannot load over the root".into()))?;
            if map.contains_key(&node.path) {
                return Err(Error::Rejected(format!("node {} already exists", node.path)));
            }
            let parent_node = map.get_mut(&parent)
                .ok_or_else(|| Error::NotFound(format!("Parent node {parent}")))?;
            parent_node.children.push(node.path.clone());
            node.children.clear();
            map.insert(node.path.clone(), node);
        }
        Ok(())
    }

    /// Mark an attribute as read-only: later writes fail with `Error::Rejected`.
    pub fn set_read_only(&self, path: &NodePath, name: &str) {
        self.inner.read_only.write().insert((path.clone(), name.to_owned()));
    }

    /// Current store revision (number of mutations so far).
    pub fn revision(&self) -> u64 {
        self.inner.revision.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Bump the revision and deliver one batch to every listener.
    /// Must be called with no store lock held.
    fn notify(&self, paths: Vec<NodePath>) {
        let revision = self.inner.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let batch = ChangeBatch::new(revision, paths);
        let listeners: Vec<Arc<dyn ChangeListener>> = self.inner.listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.on_change(&batch);
        }
    }

    /// Validate and store one attribute write on an already-locked node.
    fn apply_write(
        &self,
        node: &mut SceneNode,
        name: &str,
        value_type: ValueType,
        value: Option<Value>,
    ) -> Result<()> {
        if self.inner.read_only.read().contains(&(node.path.clone(), name.to_owned())) {
            return Err(Error::Rejected(format!("attribute '{name}' on {} is read-only", node.path)));
        }
        // Numeric declarations only ever widen: an int written into a float
        // attribute is stored as a float, and a float written over an int
        // declaration redeclares the attribute as float.
        let declared = match node.attributes.get(name).map(|a| a.value_type) {
            None => value_type,
            Some(existing) if existing == value_type => existing,
            Some(existing) if existing.is_numeric() && value_type.is_numeric() => ValueType::Float,
            Some(existing) => {
                return Err(Error::TypeError {
                    expected: existing.name().into(),
                    got: value_type.name().into(),
                });
            }
        };
        if let Some(v) = &value {
            if !declared.accepts(v) {
                return Err(Error::TypeError {
                    expected: declared.name().into(),
                    got: v.type_name().into(),
                });
            }
        }
        let value = match (declared, value) {
            (ValueType::Float, Some(Value::Int(i))) => Some(Value::Float(i as f64)),
            (_, v) => v,
        };
        node.attributes.insert(name.to_owned(), Attribute::new(declared, value));
        Ok(())
    }
}

// ============================================================================
// SceneGraph impl
// ============================================================================

#[async_trait]
impl SceneGraph for MemoryScene {
    async fn get_node(&self, path: &NodePath) -> Result<Option<SceneNode>> {
        Ok(self.inner.nodes.read().get(path).cloned())
    }

    async fn create_node(&self, path: &NodePath, type_name: &str) -> Result<()> {
        {
            let mut nodes = self.inner.nodes.write();
            let parent = path.parent()
                .ok_or_else(|| Error::Rejected("the root node always exists".into()))?;
            if nodes.contains_key(path) {
                return Err(Error::Rejected(format!("node {path} already exists")));
            }
            let parent_node = nodes.get_mut(&parent)
                .ok_or_else(|| Error::NotFound(format!("Parent node {parent}")))?;
            parent_node.children.push(path.clone());
            nodes.insert(path.clone(), SceneNode::new(path.clone(), type_name));
        }
        self.notify(vec![path.clone()]);
        Ok(())
    }

    async fn remove_node(&self, path: &NodePath) -> Result<bool> {
        if path.is_root() {
            return Err(Error::Rejected("the root node cannot be removed".into()));
        }
        let removed = {
            let mut nodes = self.inner.nodes.write();
            if !nodes.contains_key(path) {
                false
            } else {
                let mut stack = vec![path.clone()];
                while let Some(p) = stack.pop() {
                    if let Some(node) = nodes.remove(&p) {
                        stack.extend(node.children);
                    }
                }
                if let Some(parent) = path.parent() {
                    if let Some(parent_node) = nodes.get_mut(&parent) {
                        parent_node.children.retain(|c| c != path);
                    }
                }
                true
            }
        };
        if removed {
            self.inner.read_only.write().retain(|(p, _)| p != path && !path.is_ancestor_of(p));
            self.notify(vec![path.clone()]);
        }
        Ok(removed)
    }

    async fn children(&self, path: &NodePath) -> Result<Vec<SceneNode>> {
        let nodes = self.inner.nodes.read();
        let Some(node) = nodes.get(path) else {
            return Ok(Vec::new());
        };
        Ok(node.children.iter().filter_map(|c| nodes.get(c).cloned()).collect())
    }

    async fn set_attribute(
        &self,
        path: &NodePath,
        name: &str,
        value_type: ValueType,
        value: Option<Value>,
    ) -> Result<()> {
        {
            let mut nodes = self.inner.nodes.write();
            let node = nodes.get_mut(path)
                .ok_or_else(|| Error::NotFound(format!("Node {path}")))?;
            self.apply_write(node, name, value_type, value)?;
        }
        self.notify(vec![path.clone()]);
        Ok(())
    }

    async fn set_attributes(
        &self,
        path: &NodePath,
        entries: Vec<(String, ValueType, Option<Value>)>,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        {
            let mut nodes = self.inner.nodes.write();
            let node = nodes.get_mut(path)
                .ok_or_else(|| Error::NotFound(format!("Node {path}")))?;
            // Validate on a scratch copy so a rejected entry leaves the node untouched.
            let mut staged = node.clone();
            for (name, value_type, value) in entries {
                self.apply_write(&mut staged, &name, value_type, value)?;
            }
            *node = staged;
        }
        self.notify(vec![path.clone()]);
        Ok(())
    }

    async fn remove_attribute(&self, path: &NodePath, name: &str) -> Result<bool> {
        let removed = {
            let mut nodes = self.inner.nodes.write();
            let node = nodes.get_mut(path)
                .ok_or_else(|| Error::NotFound(format!("Node {path}")))?;
            node.attributes.remove(name).is_some()
        };
        if removed {
            self.notify(vec![path.clone()]);
        }
        Ok(removed)
    }

    fn subscribe(&self, listener: Arc<dyn ChangeListener>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    async fn node_count(&self) -> Result<usize> {
        Ok(self.inner.nodes.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn p(s: &str) -> NodePath {
        NodePath::parse(s).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<ChangeBatch>>,
    }

    impl ChangeListener for Recorder {
        fn on_change(&self, batch: &ChangeBatch) {
            self.batches.lock().push(batch.clone());
        }
    }

    #[tokio::test]
    async fn test_create_and_children_order() {
        let scene = MemoryScene::new();
        scene.create_node(&p("/World"), "Xform").await.unwrap();
        scene.create_node(&p("/World/B"), "Xform").await.unwrap();
        scene.create_node(&p("/World/A"), "Xform").await.unwrap();

        let children = scene.children(&p("/World")).await.unwrap();
        let names: Vec<_> = children.iter().map(|c| c.path.name().to_owned()).collect();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(scene.node_count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let scene = MemoryScene::new();
        let err = scene.create_node(&p("/Missing/Child"), "Xform").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_type_mismatch_rejected() {
        let scene = MemoryScene::new();
        scene.create_node(&p("/A"), "Xform").await.unwrap();
        scene.set_attribute(&p("/A"), "radius", ValueType::Float, Some(Value::Float(3.0))).await.unwrap();

        let err = scene
            .set_attribute(&p("/A"), "radius", ValueType::String, Some(Value::from("big")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TypeError { .. }));

        // Ints widen into float attributes.
        scene.set_attribute(&p("/A"), "radius", ValueType::Int, Some(Value::Int(4))).await.unwrap();
        let node = scene.get_node(&p("/A")).await.unwrap().unwrap();
        assert_eq!(node.get("radius"), Some(&Value::Float(4.0)));
    }

    #[tokio::test]
    async fn test_float_over_int_declaration_widens() {
        let scene = MemoryScene::new();
        scene.load(vec![SceneNode::new(p("/A"), "Port").with_attribute("radius", 6)]).unwrap();

        scene.set_attribute(&p("/A"), "radius", ValueType::Float, Some(Value::Float(11.5))).await.unwrap();
        let node = scene.get_node(&p("/A")).await.unwrap().unwrap();
        assert_eq!(node.get("radius"), Some(&Value::Float(11.5)));
        assert_eq!(node.attribute("radius").map(|a| a.value_type), Some(ValueType::Float));

        // Later int writes keep the wider declaration.
        scene.set_attribute(&p("/A"), "radius", ValueType::Int, Some(Value::Int(7))).await.unwrap();
        let node = scene.get_node(&p("/A")).await.unwrap().unwrap();
        assert_eq!(node.get("radius"), Some(&Value::Float(7.0)));

        let err = scene
            .set_attribute(&p("/A"), "radius", ValueType::Bool, Some(Value::Bool(true)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TypeError { .. }));
    }

    #[tokio::test]
    async fn test_read_only_rejected() {
        let scene = MemoryScene::new();
        scene.create_node(&p("/A"), "Xform").await.unwrap();
        scene.set_read_only(&p("/A"), "radius");
        let err = scene
            .set_attribute(&p("/A"), "radius", ValueType::Float, Some(Value::Float(1.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
    }

    #[tokio::test]
    async fn test_batch_write_is_atomic_and_single_notification() {
        let scene = MemoryScene::new();
        scene.create_node(&p("/A"), "Xform").await.unwrap();
        scene.set_read_only(&p("/A"), "locked");
        let rec = Arc::new(Recorder::default());
        scene.subscribe(rec.clone());

        let result = scene.set_attributes(&p("/A"), vec![
            ("width".into(), ValueType::Float, Some(Value::Float(10.0))),
            ("locked".into(), ValueType::Float, Some(Value::Float(1.0))),
        ]).await;
        assert!(result.is_err());
        let node = scene.get_node(&p("/A")).await.unwrap().unwrap();
        assert!(node.get("width").is_none());
        assert!(rec.batches.lock().is_empty());

        scene.set_attributes(&p("/A"), vec![
            ("width".into(), ValueType::Float, Some(Value::Float(10.0))),
            ("height".into(), ValueType::Float, Some(Value::Float(8.0))),
        ]).await.unwrap();
        assert_eq!(rec.batches.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_listener_sees_revisions_and_unsubscribe() {
        let scene = MemoryScene::new();
        let rec = Arc::new(Recorder::default());
        let id = scene.subscribe(rec.clone());

        scene.create_node(&p("/A"), "Xform").await.unwrap();
        scene.set_attribute(&p("/A"), "x", ValueType::Int, Some(Value::Int(1))).await.unwrap();
        {
            let batches = rec.batches.lock();
            assert_eq!(batches.len(), 2);
            assert_eq!(batches[0].revision, 1);
            assert_eq!(batches[1].revision, 2);
            assert_eq!(batches[1].paths, vec![p("/A")]);
        }

        assert!(scene.unsubscribe(id));
        scene.set_attribute(&p("/A"), "x", ValueType::Int, Some(Value::Int(2))).await.unwrap();
        assert_eq!(rec.batches.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_subtree() {
        let scene = MemoryScene::new();
        scene.load(vec![
            SceneNode::new(p("/A"), "Xform"),
            SceneNode::new(p("/A/B"), "Xform"),
            SceneNode::new(p("/A/B/C"), "Xform"),
        ]).unwrap();
        assert!(scene.remove_node(&p("/A/B")).await.unwrap());
        assert!(scene.get_node(&p("/A/B/C")).await.unwrap().is_none());
        assert!(scene.get_node(&p("/A")).await.unwrap().unwrap().children.is_empty());
        assert!(!scene.remove_node(&p("/A/B")).await.unwrap());
    }
}
