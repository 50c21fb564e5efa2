use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;

use jvmap::cli::commands;
use jvmap::cli::{Cli, Commands};
use jvmap::config::resolve_config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let root = PathBuf::from(&cli.workspace);
    let root = root.canonicalize().unwrap_or(root);
    let config = resolve_config(&root, cli.config.as_deref().map(Path::new))?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_tracing(&level);

    let ws = commands::open_workspace(&root, config)?;

    let output = match cli.command {
        Commands::Import { ref paths, no_map } => {
            commands::run_import(&ws, paths, no_map, &cli.format)?
        }
        Commands::Map => commands::run_map(&ws, &cli.format)?,
        Commands::Symbols {
            ref kind,
            ref file,
            declared,
        } => commands::run_symbols(
            &ws,
            kind.as_deref(),
            file.as_deref(),
            declared,
            &cli.format,
        )?,
        Commands::References { ref identity } => {
            commands::run_references(&ws, identity, &cli.format)?
        }
        Commands::Rename {
            ref identity,
            ref new_name,
        } => commands::run_rename(&ws, identity, new_name, &cli.format)?,
        Commands::Export { ref dest } => commands::run_export(&ws, dest, &cli.format)?,
        Commands::Summary => commands::run_summary(&ws, &cli.format)?,
    };
    println!("{}", output);

    Ok(())
}

/// Logs go to stderr; `RUST_LOG` wins over `level`.
fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}
