//! Attribute accessor, the only path to node attributes.
//!
//! Reads never fail: an attribute that is absent, declared but unset, or of
//! an incompatible type yields the caller's default. Writes report failure
//! as `false` instead of an error.

use std::collections::BTreeMap;

use crate::model::*;
use crate::storage::SceneGraph;

/// Well-known attribute names.
pub mod attrs {
    pub const PORT_TYPE: &str = "port_type";
    pub const SYSTEM_TYPE: &str = "system_type";
    pub const FLOW_DIRECTION: &str = "flow_direction";
    pub const POSITION: &str = "position";
    pub const RADIUS: &str = "radius";
    pub const DIAMETER: &str = "diameter";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const SHAPE: &str = "shape";
    /// Declared flow requirement on a component, or flow through a port (cfm).
    pub const CAPACITY: &str = "capacity";
    /// Duct service class (`supply`, `return`, ...) selecting a velocity band.
    pub const SERVICE: &str = "service";
    pub const GENERATOR_TYPE: &str = "generator_type";
    pub const CONNECTED_TO: &str = "connected_to";
}

// ============================================================================
// Typed extraction
// ============================================================================

/// Convert from Value to concrete types. `None` means "incompatible".
pub trait FromValue: Sized {
    fn from_value(val: &Value) -> Option<Self>;
}

impl FromValue for f64 {
    fn from_value(val: &Value) -> Option<Self> { val.as_float() }
}

impl FromValue for i64 {
    fn from_value(val: &Value) -> Option<Self> { val.as_int() }
}

impl FromValue for bool {
    fn from_value(val: &Value) -> Option<Self> { val.as_bool() }
}

impl FromValue for String {
    fn from_value(val: &Value) -> Option<Self> { val.as_str().map(str::to_owned) }
}

impl FromValue for Vec3 {
    fn from_value(val: &Value) -> Option<Self> { val.as_vec3() }
}

impl FromValue for Value {
    fn from_value(val: &Value) -> Option<Self> { Some(val.clone()) }
}

// ============================================================================
// Reads
// ============================================================================

/// Typed read with no default. `None` if absent, unset or incompatible.
pub fn read_opt<T: FromValue>(node: &SceneNode, name: &str) -> Option<T> {
    node.get(name).and_then(T::from_value)
}

/// Typed read falling back to `default`. Never fails.
pub fn read<T: FromValue>(node: &SceneNode, name: &str, default: T) -> T {
    read_opt(node, name).unwrap_or(default)
}

/// Non-empty trimmed string attribute.
pub fn read_text(node: &SceneNode, name: &str) -> Option<String> {
    read_opt::<String>(node, name)
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

/// Read several attributes at once. Each default's variant decides which
/// stored values are acceptable (ints and floats are interchangeable; an
/// int stored under a float default comes back as a float).
pub fn read_many(node: &SceneNode, specs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    specs
        .iter()
        .map(|(name, default)| {
            let value = match node.get(name) {
                Some(v) if v.same_kind(default) => match (default, v) {
                    (Value::Float(_), Value::Int(i)) => Value::Float(*i as f64),
                    (Value::Int(_), Value::Float(_)) => {
                        v.as_int().map(Value::Int).unwrap_or_else(|| default.clone())
                    }
                    _ => v.clone(),
                },
                _ => default.clone(),
            };
            ((*name).to_owned(), value)
        })
        .collect()
}

/// Every set attribute value, by name. Declared-but-unset attributes are left out.
pub fn values(node: &SceneNode) -> PropertyMap {
    node.attributes
        .iter()
        .filter_map(|(name, attr)| attr.get().map(|v| (name.clone(), v.clone())))
        .collect()
}

/// Whether the attribute is declared, set or not.
pub fn declares(node: &SceneNode, name: &str) -> bool {
    node.has_attribute(name)
}

/// A component owns its ports: it declares `capacity` or `generator_type`
/// and is not itself a port.
pub fn is_component(node: &SceneNode) -> bool {
    !declares(node, attrs::PORT_TYPE)
        && (declares(node, attrs::CAPACITY) || declares(node, attrs::GENERATOR_TYPE))
}

/// Report which required names are absent, unset, or empty strings.
///
/// Returns `(all_present, missing_names)`; never fails.
pub fn require_all(node: &SceneNode, names: &[&str]) -> (bool, Vec<String>) {
    let missing: Vec<String> = names
        .iter()
        .filter(|name| match node.get(name) {
            None => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        })
        .map(|name| (*name).to_owned())
        .collect();
    (missing.is_empty(), missing)
}

// ============================================================================
// Writes
// ============================================================================

/// Create or update an attribute. Returns false if the store rejects it.
pub async fn write<G: SceneGraph + ?Sized>(
    graph: &G,
    path: &NodePath,
    name: &str,
    value: Value,
    value_type: ValueType,
) -> bool {
    match graph.set_attribute(path, name, value_type, Some(value)).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(path = %path, attribute = name, error = %e, "attribute write rejected");
            false
        }
    }
}

/// Write several attributes to one node as a single store mutation.
///
/// Each entry's declared type follows its value; the store widens numeric
/// declarations, so a float may replace an int. `Null` values clear the
/// attribute's value under a float declaration.
pub async fn write_many<G: SceneGraph + ?Sized>(
    graph: &G,
    path: &NodePath,
    entries: Vec<(String, Value)>,
) -> bool {
    let entries: Vec<_> = entries
        .into_iter()
        .map(|(name, value)| {
            let ty = value.value_type().unwrap_or(ValueType::Float);
            let value = if value.is_null() { None } else { Some(value) };
            (name, ty, value)
        })
        .collect();
    match graph.set_attributes(path, entries).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "batched attribute write rejected");
            false
        }
    }
}
