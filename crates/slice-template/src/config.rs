/*
 * config.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Engine configuration.
//!
//! ```toml
//! extension = ".slice.html"
//! cache_ttl = 3600
//! locale = "english"
//! environment = "production"
//! ```
//!
//! Every key is optional; missing keys take the defaults below.

use crate::cache::CachePolicy;
use crate::error::{TemplateError, TemplateResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Deployment environment. Only `Production` trusts cached programs blindly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
}

impl Environment {
    pub fn cache_policy(self) -> CachePolicy {
        match self {
            Environment::Production => CachePolicy::Trust,
            Environment::Development | Environment::Testing => CachePolicy::Validate,
        }
    }
}

impl FromStr for Environment {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "testing" => Ok(Environment::Testing),
            "production" => Ok(Environment::Production),
            other => Err(TemplateError::Config {
                message: format!(
                    "unknown environment `{other}` (expected development, testing or production)"
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Suffix appended to a logical template name to find its file.
    pub extension: String,
    /// Lifetime of cached programs, in seconds. Zero never expires.
    pub cache_ttl: u64,
    /// Active locale for `@lang` / `@choice`.
    pub locale: String,
    pub environment: Environment,
    /// Maximum nesting of `@include` / `@extends` / `@each`.
    pub max_include_depth: usize,
    /// Maximum iterations of any single loop.
    pub max_loop_iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extension: ".slice.html".to_string(),
            cache_ttl: 3600,
            locale: "english".to_string(),
            environment: Environment::Development,
            max_include_depth: 50,
            max_loop_iterations: 1_000_000,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> TemplateResult<Self> {
        let config: EngineConfig = toml::from_str(text).map_err(|e| TemplateError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> TemplateResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| TemplateError::Config {
            message: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> TemplateResult<()> {
        if self.max_include_depth == 0 {
            return Err(TemplateError::Config {
                message: "max_include_depth must be at least 1".to_string(),
            });
        }
        if self.max_loop_iterations == 0 {
            return Err(TemplateError::Config {
                message: "max_loop_iterations must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }
}
