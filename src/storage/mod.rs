//! # Scene Graph Store
//!
//! This is THE contract between the port core and whatever hosts the scene.
//! Discovery, matching and audit only read through it; healing writes
//! corrected attributes back through it.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryScene` | `memory` | In-memory scene for testing/embedding |

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::Result;

pub use memory::MemoryScene;

// ============================================================================
// Change notifications
// ============================================================================

/// One delivered notification: the paths touched by a single mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Store revision produced by the mutation.
    pub revision: u64,
    pub paths: Vec<NodePath>,
}

impl ChangeBatch {
    pub fn new(revision: u64, paths: Vec<NodePath>) -> Self {
        Self { revision, paths }
    }
}

/// Receives change notifications from a store.
///
/// Stores call `on_change` synchronously on the mutating thread, after every
/// internal lock has been released. Listeners must not block for long.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, batch: &ChangeBatch);
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

// ============================================================================
// SceneGraph Trait
// ============================================================================

/// The scene-graph contract.
///
/// Every successful mutation bumps the store revision and delivers exactly
/// one `ChangeBatch` to each subscribed listener.
#[async_trait]
pub trait SceneGraph: Send + Sync + 'static {
    // ========================================================================
    // Nodes
    // ========================================================================

    /// Get a node snapshot by path. Returns None if not found.
    async fn get_node(&self, path: &NodePath) -> Result<Option<SceneNode>>;

    /// Create a node under an existing parent. The root `/` always exists.
    async fn create_node(&self, path: &NodePath, type_name: &str) -> Result<()>;

    /// Remove a node and its whole subtree. Returns true if it existed.
    async fn remove_node(&self, path: &NodePath) -> Result<bool>;

    /// Child snapshots in stored order.
    ///
    /// Default: look the node up and fetch each child path.
    async fn children(&self, path: &NodePath) -> Result<Vec<SceneNode>> {
        let Some(node) = self.get_node(path).await? else {
            return Ok(Vec::new());
        };
        let mut result = Vec::with_capacity(node.children.len());
        for child in &node.children {
            if let Some(n) = self.get_node(child).await? {
                result.push(n);
            }
        }
        Ok(result)
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Create or update an attribute (upsert).
    ///
    /// Fails with `Error::TypeError` if the value disagrees with the declared
    /// type, and with `Error::Rejected` if the store refuses the write.
    async fn set_attribute(
        &self,
        path: &NodePath,
        name: &str,
        value_type: ValueType,
        value: Option<Value>,
    ) -> Result<()>;

    /// Apply several attribute writes to one node as a single mutation.
    ///
    /// Default falls back to sequential `set_attribute` calls (one
    /// notification each).
    async fn set_attributes(
        &self,
        path: &NodePath,
        entries: Vec<(String, ValueType, Option<Value>)>,
    ) -> Result<()> {
        for (name, value_type, value) in entries {
            self.set_attribute(path, &name, value_type, value).await?;
        }
        Ok(())
    }

    /// Remove an attribute. Returns true if it was declared.
    async fn remove_attribute(&self, path: &NodePath, name: &str) -> Result<bool>;

    // ========================================================================
    // Subscriptions
    // ========================================================================

    fn subscribe(&self, listener: Arc<dyn ChangeListener>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Total number of nodes, root included.
    async fn node_count(&self) -> Result<usize>;
}
