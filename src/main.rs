// src/main.rs

use anyhow::Result;
use clap::Parser;
use dub::cli::{Cli, Commands};

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Describe { path }) => dub::commands::describe(&path),
        Some(Commands::BuildSettings {
            path,
            config,
            build_type,
        }) => dub::commands::build_settings(&path, config.as_deref(), &build_type),
        Some(Commands::Upgrade {
            path,
            registry,
            pre_release,
            dry_run,
        }) => dub::commands::upgrade(&path, &registry, pre_release, dry_run),
        Some(Commands::Fetch {
            name,
            version,
            registry,
            path,
        }) => dub::commands::fetch(&name, &version, &registry, &path),
        Some(Commands::Remove {
            name,
            version,
            path,
        }) => dub::commands::remove(&name, &version, &path),
        Some(Commands::List { path }) => dub::commands::list(&path),
        None => {
            dub::commands::describe(".")
        }
    }
}
