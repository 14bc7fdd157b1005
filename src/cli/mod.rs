// src/cli/mod.rs
//! CLI definitions for larder
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! - `cook` - Build a recipe into the local store
//! - `configure` - Show the options, dependencies and arguments a cook would use
//! - `validate` - Check a recipe without resolving anything
//! - `info` - Show the exported contract of a cooked package

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "larder")]
#[command(author, version)]
#[command(about = "Cook native libraries from declarative recipes", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Everything that selects one configuration of a recipe
#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
    /// Path to the recipe file
    pub recipe: String,

    /// Version to cook (default: recipe default or newest)
    #[arg(long = "pkg-version", value_name = "VERSION")]
    pub version: Option<String>,

    /// Option override, e.g. -o shared=True (repeatable)
    #[arg(short = 'o', long = "option", value_name = "NAME=VALUE")]
    pub options: Vec<String>,

    /// Setting override, e.g. -s build_type=Debug (repeatable)
    #[arg(short = 's', long = "setting", value_name = "KEY=VALUE")]
    pub settings: Vec<String>,

    /// Use an existing install prefix for a dependency (repeatable)
    #[arg(long = "dep", value_name = "NAME=DIR")]
    pub deps: Vec<String>,

    /// Package store directory (overrides the config file)
    #[arg(long)]
    pub store: Option<String>,

    /// Configuration file (default: $LARDER_CONFIG or ./larder.toml)
    #[arg(long)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a package from a recipe
    Cook {
        #[command(flatten)]
        resolve: ResolveArgs,

        /// Directory for caching downloaded sources
        #[arg(long)]
        source_cache: Option<String>,

        /// Number of parallel build jobs (default: number of CPUs)
        #[arg(short, long)]
        jobs: Option<u32>,

        /// Keep build directory after completion (for debugging)
        #[arg(long)]
        keep_builddir: bool,

        /// Rebuild even if the package is already in the store
        #[arg(long)]
        force: bool,

        /// Print the build log after cooking
        #[arg(long)]
        show_log: bool,
    },

    /// Resolve a recipe and print the derived configure arguments
    Configure {
        #[command(flatten)]
        resolve: ResolveArgs,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a recipe file
    Validate {
        /// Path to the recipe file(s)
        #[arg(required = true)]
        recipes: Vec<String>,
    },

    /// Show the exported contract of a cooked package
    Info {
        /// Package folder holding larder-package.json
        package_folder: String,

        /// Restrict link information to one component
        #[arg(short, long)]
        component: Option<String>,

        /// Package store for resolving the package's requirements
        #[arg(long)]
        store: Option<String>,

        /// Configuration file (default: $LARDER_CONFIG or ./larder.toml)
        #[arg(long)]
        config: Option<String>,

        /// Print the raw metadata as JSON
        #[arg(long)]
        json: bool,
    },
}
