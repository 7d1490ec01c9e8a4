//! Explicit table from generator names to regenerators.
//!
//! Names and queries are normalized to lowercase alphanumeric tokens, so
//! `"Heater Box"` and `"heater_box"` are the same name (`"HeaterBox"` is a
//! single token). A query matches the first registered entry whose tokens
//! contain every query token: `"heater"` finds `"Heater Box"`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::accessor::{self, attrs};
use crate::model::{PropertyMap, SceneNode};
use super::{RegeneratedState, RegenerationError, Regenerator};

/// Split into lowercase alphanumeric tokens.
pub fn tokenize(raw: &str) -> Vec<String> {
    raw.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

struct Entry {
    name: String,
    tokens: Vec<String>,
    generator: Arc<dyn Regenerator>,
}

#[derive(Default)]
pub struct GeneratorRegistry {
    entries: Vec<Entry>,
}

impl fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|e| &e.name)).finish()
    }
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generator. Earlier registrations win ties.
    pub fn register(&mut self, name: impl Into<String>, generator: Arc<dyn Regenerator>) -> &mut Self {
        let name = name.into();
        let tokens = tokenize(&name);
        self.entries.push(Entry { name, tokens, generator });
        self
    }

    pub fn with(mut self, name: impl Into<String>, generator: Arc<dyn Regenerator>) -> Self {
        self.register(name, generator);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// First generator whose name covers every token of `intent`.
    pub fn lookup(&self, intent: &str) -> Option<(&str, Arc<dyn Regenerator>)> {
        let query = tokenize(intent);
        if query.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|e| query.iter().all(|q| e.tokens.contains(q)))
            .map(|e| (e.name.as_str(), Arc::clone(&e.generator)))
    }
}

/// Dispatches on the node's `generator_type` attribute.
#[async_trait]
impl Regenerator for GeneratorRegistry {
    async fn regenerate(
        &self,
        node: &SceneNode,
        params: &PropertyMap,
    ) -> Result<RegeneratedState, RegenerationError> {
        let Some(kind) = accessor::read_text(node, attrs::GENERATOR_TYPE) else {
            return Err(RegenerationError::NoGenerator(format!("{} (no generator_type)", node.path)));
        };
        let Some((name, generator)) = self.lookup(&kind) else {
            return Err(RegenerationError::NoGenerator(kind));
        };
        tracing::debug!(path = %node.path, generator = name, "dispatching regeneration");
        generator.regenerate(node, params).await
    }
}
