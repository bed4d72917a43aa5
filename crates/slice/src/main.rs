//! Slice CLI - Main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::EngineOptions;

#[derive(Parser)]
#[command(name = "slice")]
#[command(version)]
#[command(about = "Compile and render Slice templates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template to HTML
    Render {
        /// Logical template name (e.g. pages.home)
        template: String,

        /// JSON file whose top-level object becomes the template data
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Directory of locale tables (<dir>/<locale>/<file>.json)
        #[arg(long)]
        locale_dir: Option<PathBuf>,

        /// Active locale (overrides the config file)
        #[arg(long)]
        locale: Option<String>,

        /// Write output to FILE (use '--output -' for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineOptions,
    },

    /// Compile a template and print its program text
    Compile {
        /// Logical template name (e.g. pages.home)
        template: String,

        /// Print one line per literal run or instruction instead of raw program text
        #[arg(long)]
        explain: bool,

        /// Write output to FILE (use '--output -' for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineOptions,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slice=info,slice_template=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            template,
            data,
            locale_dir,
            locale,
            output,
            engine,
        } => commands::render::execute(commands::render::RenderArgs {
            template,
            data,
            locale_dir,
            locale,
            output,
            engine,
        }),
        Commands::Compile {
            template,
            explain,
            output,
            engine,
        } => commands::compile::execute(commands::compile::CompileArgs {
            template,
            explain,
            output,
            engine,
        }),
    }
}
