//! AttributeMap: the declared, possibly-unset attributes on a node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Value, ValueType};

/// A declared attribute. The name may exist without a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub value_type: ValueType,
    pub value: Option<Value>,
}

impl Attribute {
    pub fn new(value_type: ValueType, value: Option<Value>) -> Self {
        Self { value_type, value }
    }

    /// Declared with no value.
    pub fn declared(value_type: ValueType) -> Self {
        Self { value_type, value: None }
    }

    /// The stored value, treating `Null` the same as unset.
    pub fn get(&self) -> Option<&Value> {
        self.value.as_ref().filter(|v| !v.is_null())
    }
}

/// Attribute name → attribute. Ordered so snapshots compare and print stably.
pub type AttributeMap = BTreeMap<String, Attribute>;

/// Plain name → value map used for generation parameters.
pub type PropertyMap = BTreeMap<String, Value>;
