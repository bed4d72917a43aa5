/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template compilation and rendering.

use thiserror::Error;

/// Errors that can occur during template operations.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The resolver could not locate a source for a logical template name.
    #[error("Template not found: {name}")]
    TemplateNotFound { name: String },

    /// Sections were still open when a template finished executing.
    #[error("Unterminated section(s): {}", names.join(", "))]
    UnterminatedSection { names: Vec<String> },

    /// A closing section directive ran with no section open.
    #[error("@{directive} without a matching @section")]
    UnbalancedSection { directive: &'static str },

    /// The compiled program has malformed block structure.
    #[error("Parse error: {message}")]
    ParseError { message: String },

    /// An embedded expression could not be parsed.
    #[error("Invalid expression `{expression}`: {message}")]
    ExpressionError { expression: String, message: String },

    /// Error evaluating the template.
    #[error("Evaluation error: {message}")]
    EvaluationError { message: String },

    /// A call to a function that is neither built in nor registered.
    #[error("Unknown function: {name}")]
    UnknownFunction { name: String },

    /// Include/extends/each nesting went past the configured depth.
    #[error("Recursive template inclusion detected (depth > {max_depth}): {name}")]
    RecursiveInclude { name: String, max_depth: usize },

    /// A loop ran more iterations than the configured limit.
    #[error("Loop exceeded {limit} iterations")]
    LoopLimitExceeded { limit: usize },

    /// The byte cache could not be read. Treated as a cache miss.
    #[error("Cache read failure for {key}: {message}")]
    CacheReadFailure { key: String, message: String },

    /// A locale file could not be loaded.
    #[error("Failed to load locale file {file} ({locale}): {message}")]
    LocaleLoad {
        file: String,
        locale: String,
        message: String,
    },

    /// Invalid engine configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O error (e.g., reading a template file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TemplateError {
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        TemplateError::ParseError {
            message: message.into(),
        }
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        TemplateError::EvaluationError {
            message: message.into(),
        }
    }
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;
