/*
 * sections.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Named content regions.
//!
//! The [`SectionStack`] holds the sections currently open, each with the
//! output captured since it opened. The [`SectionTable`] holds closed
//! sections. Both live in one render session and are shared by every
//! template the render pulls in.

use std::collections::HashMap;

/// Token in section content replaced by the content of a later definition.
pub const PARENT_PLACEHOLDER: &str = "@parent";

#[derive(Debug)]
struct OpenSection {
    name: String,
    buffer: String,
}

/// Currently open sections, innermost last.
#[derive(Debug, Default)]
pub struct SectionStack {
    open: Vec<OpenSection>,
}

impl SectionStack {
    pub fn push(&mut self, name: impl Into<String>) {
        self.open.push(OpenSection {
            name: name.into(),
            buffer: String::new(),
        });
    }

    /// Pop the innermost section, returning its name and captured output.
    pub fn pop(&mut self) -> Option<(String, String)> {
        self.open.pop().map(|s| (s.name, s.buffer))
    }

    /// Capture buffer of the innermost section.
    pub fn capture(&mut self) -> Option<&mut String> {
        self.open.last_mut().map(|s| &mut s.buffer)
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Names of sections opened at or above `depth`, outermost first.
    pub fn names_from(&self, depth: usize) -> Vec<String> {
        self.open
            .iter()
            .skip(depth)
            .map(|s| s.name.clone())
            .collect()
    }
}

/// Content of closed sections.
#[derive(Debug, Default)]
pub struct SectionTable {
    sections: HashMap<String, String>,
}

impl SectionTable {
    /// Record `content` for `name`.
    ///
    /// If `name` already has content, every `@parent` in the *existing*
    /// content is replaced with `content` and the result is kept; otherwise
    /// `content` is stored as is.
    pub fn merge(&mut self, name: &str, content: &str) {
        match self.sections.get_mut(name) {
            Some(existing) => *existing = existing.replace(PARENT_PLACEHOLDER, content),
            None => {
                self.sections.insert(name.to_string(), content.to_string());
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.sections.get(name).map(String::as_str)
    }

    /// Content of `name`, or `default` when it has none.
    pub fn yield_section(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or(default).to_string()
    }
}

/// Section stack plus table.
#[derive(Debug, Default)]
pub struct Sections {
    pub stack: SectionStack,
    pub table: SectionTable,
}

impl Sections {
    /// Open `name`. With an inline value the section closes immediately with
    /// that content; otherwise output is captured until [`Sections::close`].
    pub fn open(&mut self, name: &str, inline: Option<String>) {
        self.stack.push(name);
        if let Some(value) = inline {
            self.close(Some(value));
        }
    }

    /// Close the innermost section, merging `explicit` (or the captured
    /// output) into the table. Returns the section name, or `None` when no
    /// section is open.
    pub fn close(&mut self, explicit: Option<String>) -> Option<String> {
        let (name, captured) = self.stack.pop()?;
        let content = explicit.unwrap_or(captured);
        self.table.merge(&name, &content);
        Some(name)
    }

    pub fn yield_section(&self, name: &str, default: &str) -> String {
        self.table.yield_section(name, default)
    }
}
