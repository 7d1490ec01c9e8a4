//! Node in the scene graph.

use serde::{Deserialize, Serialize};
use super::{Attribute, AttributeMap, NodePath, Value, ValueType};

/// Snapshot of a scene-graph node.
///
/// Owned by the store; everything outside `storage` works on clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneNode {
    pub path: NodePath,
    /// Schema/type tag, e.g. `"Xform"` or `"Port"`.
    pub type_name: String,
    pub attributes: AttributeMap,
    /// Child paths in insertion order.
    pub children: Vec<NodePath>,
}

impl SceneNode {
    pub fn new(path: NodePath, type_name: impl Into<String>) -> Self {
        Self {
            path,
            type_name: type_name.into(),
            attributes: AttributeMap::new(),
            children: Vec::new(),
        }
    }

    /// Builder: declare an attribute with a value. The declared type follows the value.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        let value_type = value.value_type().unwrap_or(ValueType::String);
        self.attributes.insert(name.into(), Attribute::new(value_type, Some(value)));
        self
    }

    /// Builder: declare an attribute without a value.
    pub fn with_declared(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.attributes.insert(name.into(), Attribute::declared(value_type));
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Value of an attribute if it is declared and set.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).and_then(Attribute::get)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }
}
