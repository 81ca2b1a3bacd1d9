//! # pt-cli
//!
//! Command-line interface for the plugin trust system.
//!
//! - `pt plugins list/show/check` - discovered plugins and their boundaries
//! - `pt validate <path>` - validate one manifest file
//! - `pt route <query>` / `pt suggest <query>` - where a request would go
//! - `pt report` - routing overview
//! - `pt audit verify/tail` - inspect a plugin's hash-chained audit trail

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pt_router::HostConfig;
use tracing_subscriber::EnvFilter;

/// Plugin trust CLI - inspect manifests, routes and audit trails.
#[derive(Parser)]
#[command(name = "pt", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Plugin directory, overriding the configured one and `PT_PLUGIN_DIR`.
    #[arg(long)]
    plugins_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect discovered plugins.
    Plugins {
        #[command(subcommand)]
        command: commands::plugins::PluginCommands,
    },
    /// Validate a manifest file (.yaml, .yml or .json).
    Validate {
        path: PathBuf,
    },
    /// Show which handler a request would be routed to.
    Route {
        query: String,
        /// Print the decision as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List plugins that may be relevant to a request.
    Suggest {
        query: String,
    },
    /// Print the routing overview.
    Report,
    /// Inspect plugin audit trails.
    Audit {
        #[command(subcommand)]
        command: commands::audit::AuditCommands,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("pt_loader=warn".parse()?)
                .add_directive("pt_router=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);
    let mut config = HostConfig::load(&project_root)?;
    let plugins_dir = cli
        .plugins_dir
        .or_else(|| std::env::var_os("PT_PLUGIN_DIR").map(PathBuf::from));
    if let Some(dir) = plugins_dir {
        config = config.with_plugins_dir(dir);
    }

    match &cli.command {
        Commands::Plugins { command } => commands::plugins::execute(command, &config),
        Commands::Validate { path } => commands::validate::execute(path),
        Commands::Route { query, json } => commands::route::route(&config, query, *json),
        Commands::Suggest { query } => commands::route::suggest(&config, query),
        Commands::Report => commands::route::report(&config),
        Commands::Audit { command } => commands::audit::execute(command, &config),
    }
}
