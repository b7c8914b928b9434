// src/cli.rs
//! CLI definitions for the dub package manager
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dub")]
#[command(author = "dub contributors")]
#[command(version)]
#[command(about = "Package manager and build driver for the D programming language", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the root package and its resolved dependency graph
    Describe {
        /// Project directory
        #[arg(default_value = ".")]
        path: String,
    },

    /// Print the aggregated build settings for a configuration
    BuildSettings {
        /// Project directory
        #[arg(default_value = ".")]
        path: String,

        /// Configuration to resolve (defaults to the platform default)
        #[arg(short, long)]
        config: Option<String>,

        /// Build type to mix in
        #[arg(short, long, default_value = "debug")]
        build_type: String,
    },

    /// Resolve dependency versions and update the selections
    Upgrade {
        /// Project directory
        #[arg(default_value = ".")]
        path: String,

        /// Registry directory to draw packages from
        #[arg(long)]
        registry: Vec<String>,

        /// Let pre-release versions compete with releases
        #[arg(long)]
        pre_release: bool,

        /// Show what would change without applying anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Fetch a package into the local cache
    Fetch {
        /// Package name
        name: String,

        /// Version spec to satisfy
        #[arg(short, long, default_value = "*")]
        version: String,

        /// Registry directory to draw packages from
        #[arg(long)]
        registry: Vec<String>,

        /// Project directory whose cache receives the package
        #[arg(long, default_value = ".")]
        path: String,
    },

    /// Remove a package from the local cache
    Remove {
        /// Package name
        name: String,

        /// Exact version to remove
        #[arg(short, long)]
        version: String,

        /// Project directory whose cache is modified
        #[arg(long, default_value = ".")]
        path: String,
    },

    /// List all packages the package manager knows about
    List {
        /// Project directory
        #[arg(default_value = ".")]
        path: String,
    },
}
