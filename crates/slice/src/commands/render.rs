/*
 * render.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Render command implementation
 */

//! Render command implementation.
//!
//! `slice render <template>` resolves the template under `--views`, binds
//! the JSON object from `--data`, and writes the rendered HTML.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use slice_template::{JsonLocaleSource, TemplateContext};
use tracing::debug;

use super::{ENV_VAR, EngineOptions, write_output};

/// Arguments for the render command
#[derive(Debug)]
pub struct RenderArgs {
    /// Logical template name
    pub template: String,
    /// JSON data file
    pub data: Option<PathBuf>,
    /// Locale table directory
    pub locale_dir: Option<PathBuf>,
    /// Active locale
    pub locale: Option<String>,
    /// Output file path
    pub output: Option<PathBuf>,
    pub engine: EngineOptions,
}

/// Execute the render command
pub fn execute(args: RenderArgs) -> Result<()> {
    let html = render(&args, std::env::var(ENV_VAR).ok())?;
    write_output(args.output.as_deref(), &html)
}

fn render(args: &RenderArgs, env_var: Option<String>) -> Result<String> {
    let mut config = args.engine.resolve_config(env_var)?;
    if let Some(locale) = &args.locale {
        config.locale = locale.clone();
    }
    debug!(
        environment = ?config.environment,
        locale = %config.locale,
        "engine configuration"
    );

    let mut engine = args.engine.build_engine(config)?;
    if let Some(dir) = &args.locale_dir {
        engine = engine.with_locale_source(Arc::new(JsonLocaleSource::new(dir)));
    }

    let data = match &args.data {
        Some(path) => load_data(path)?,
        None => TemplateContext::new(),
    };

    engine
        .render(&args.template, data)
        .with_context(|| format!("Failed to render template '{}'", args.template))
}

/// Read a JSON object to use as template data.
fn load_data(path: &Path) -> Result<TemplateContext> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read data file {}", path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse data file {}", path.display()))?;
    TemplateContext::from_json(json)
        .with_context(|| format!("Invalid data file {}", path.display()))
}
