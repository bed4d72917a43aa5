/*
 * directive.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! User-registered directives.
//!
//! A directive is a plain `&str -> String` rewrite applied to template
//! *source* before any built-in pass runs. Directives are applied in
//! registration order on every compile; compiled output is never fed back
//! through them.

use std::fmt;

/// A user rewrite callback.
pub type DirectiveFn = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Ordered list of user directives.
#[derive(Default)]
pub struct DirectiveRegistry {
    entries: Vec<DirectiveFn>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a directive. It runs after every previously registered one.
    pub fn register<F>(&mut self, directive: F)
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.entries.push(Box::new(directive));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every directive over `source`, in registration order.
    pub fn apply(&self, source: &str) -> String {
        self.entries
            .iter()
            .fold(source.to_string(), |text, directive| directive(&text))
    }
}

impl fmt::Debug for DirectiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectiveRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}
