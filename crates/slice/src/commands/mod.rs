//! Command implementations for the Slice CLI
//!
//! Each command module handles the CLI interface and delegates to
//! slice-template for the actual work.

pub mod compile;
pub mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use slice_template::{Engine, EngineConfig, FileSystemCache};

/// Environment variable that selects the deployment environment.
pub const ENV_VAR: &str = "SLICE_ENV";

/// Engine options shared by every command.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct EngineOptions {
    /// Directory containing the templates
    #[arg(long, default_value = "views")]
    pub views: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Environment: development, testing or production (overrides SLICE_ENV)
    #[arg(long)]
    pub env: Option<String>,

    /// Directory for compiled programs (kept in memory when omitted)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

impl EngineOptions {
    /// Configuration from the config file, then `env_var` (the value of
    /// `SLICE_ENV`), then `--env`.
    pub fn resolve_config(&self, env_var: Option<String>) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(env) = env_var.filter(|e| !e.trim().is_empty()) {
            config.environment = env
                .parse()
                .with_context(|| format!("Invalid {ENV_VAR}"))?;
        }
        if let Some(env) = &self.env {
            config.environment = env.parse().context("Invalid --env")?;
        }
        Ok(config)
    }

    pub fn build_engine(&self, config: EngineConfig) -> Result<Engine> {
        if !self.views.is_dir() {
            anyhow::bail!("Views directory does not exist: {}", self.views.display());
        }
        let mut engine = Engine::for_directory(&self.views, config);
        if let Some(dir) = &self.cache_dir {
            engine = engine.with_cache(Arc::new(FileSystemCache::new(dir)));
        }
        Ok(engine)
    }
}

/// Write `text` to `output`, or to stdout when it is absent or `-`.
pub fn write_output(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) if path != Path::new("-") => {
            std::fs::write(path, text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Output written to: {}", path.display());
        }
        _ => print!("{text}"),
    }
    Ok(())
}
