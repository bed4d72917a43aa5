/*
 * context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Variable scopes for template execution.
//!
//! A [`TemplateContext`] is the data context a template runs against. Included
//! templates get a child context: reads fall through to the enclosing scope,
//! writes (assignments, loop bindings, `extraData`) stay in the child and are
//! never merged back upward.
//!
//! Bindings are shared copy-on-write, so creating a child is constant time and
//! a scope's map is only copied when it is written while a child still holds it.

use crate::error::{TemplateError, TemplateResult};
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;

/// A context for template evaluation containing variable bindings.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    /// Variable bindings at this level.
    variables: Arc<IndexMap<String, Value>>,

    /// Enclosing scope (the includer, or the engine-global data).
    parent: Option<Arc<TemplateContext>>,
}

impl TemplateContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context from a JSON object, one binding per member.
    pub fn from_json(json: serde_json::Value) -> TemplateResult<Self> {
        match Value::from(json) {
            Value::Map(variables) => Ok(variables.into()),
            other => Err(TemplateError::eval(format!(
                "template data must be a JSON object, got {}",
                other.type_name()
            ))),
        }
    }

    /// Insert a variable into this scope.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.bindings_mut().insert(key.into(), value.into());
    }

    /// Remove a variable from this scope. Parent bindings are untouched.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.bindings_mut().shift_remove(key)
    }

    /// Insert every binding from `data`, overriding existing ones.
    pub fn extend<K, V>(&mut self, data: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in data {
            self.insert(key, value);
        }
    }

    /// Get a variable from the context, checking parent scopes.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables
            .get(key)
            .or_else(|| self.parent.as_ref().and_then(|p| p.get(key)))
    }

    /// Get a variable for in-place modification.
    ///
    /// A binding that only exists in a parent scope is first copied into this
    /// scope, so the parent never observes the write.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        if !self.variables.contains_key(key) {
            let inherited = self.parent.as_ref().and_then(|p| p.get(key)).cloned()?;
            self.bindings_mut().insert(key.to_string(), inherited);
        }
        self.bindings_mut().get_mut(key)
    }

    /// Mutable slot for `key` in this scope, inherited from a parent scope or
    /// bound to null if nothing is visible.
    pub fn entry(&mut self, key: &str) -> &mut Value {
        let parent = self.parent.clone();
        self.bindings_mut()
            .entry(key.to_string())
            .or_insert_with(|| parent.and_then(|p| p.get(key).cloned()).unwrap_or_default())
    }

    /// Get a variable by path (e.g., `["employee", "salary"]`).
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        self.get(first).and_then(|v| v.get_path(rest))
    }

    /// Whether `key` is bound to a non-null value in any scope.
    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_null())
    }

    /// Create a child context for a nested scope (e.g., an included template).
    ///
    /// The child context inherits access to parent variables.
    pub fn child(&self) -> TemplateContext {
        TemplateContext {
            variables: Arc::default(),
            parent: Some(Arc::new(self.clone())),
        }
    }

    fn bindings_mut(&mut self) -> &mut IndexMap<String, Value> {
        Arc::make_mut(&mut self.variables)
    }

    /// All visible bindings, innermost scope winning.
    pub fn flatten(&self) -> IndexMap<String, Value> {
        let mut merged = self
            .parent
            .as_ref()
            .map(|p| p.flatten())
            .unwrap_or_default();
        for (key, value) in self.variables.iter() {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TemplateContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = TemplateContext::new();
        ctx.extend(iter);
        ctx
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for TemplateContext {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl From<IndexMap<String, Value>> for TemplateContext {
    fn from(variables: IndexMap<String, Value>) -> Self {
        TemplateContext {
            variables: Arc::new(variables),
            parent: None,
        }
    }
}
