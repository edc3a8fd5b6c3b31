//! Graft command-line tool
//!
//! Patches compiled graft modules and inspects their contents.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "graft")]
#[command(about = "Load-time field patching for graft modules", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Patch a set of modules and write the touched ones to an artifact
    Patch {
        /// Module files (.grft)
        #[arg(required = true)]
        modules: Vec<PathBuf>,
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Artifact path (overrides the configured output path)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the types, members and markers of a module
    Inspect {
        /// Module file (.grft)
        module: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Install the log subscriber; `RUST_LOG` overrides the default filter
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,graft_engine=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Patch {
            modules,
            config,
            out,
            json,
        } => commands::patch::execute(modules, config, out, json),
        Commands::Inspect { module, json } => commands::inspect::execute(&module, json),
    }
}
