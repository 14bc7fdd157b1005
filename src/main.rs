// src/main.rs

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Cook {
            resolve,
            source_cache,
            jobs,
            keep_builddir,
            force,
            show_log,
        }) => commands::cmd_cook(
            &resolve,
            source_cache.as_deref(),
            jobs,
            keep_builddir,
            force,
            show_log,
        ),

        Some(Commands::Configure { resolve, json }) => commands::cmd_configure(&resolve, json),

        Some(Commands::Validate { recipes }) => commands::cmd_validate(&recipes),

        Some(Commands::Info {
            package_folder,
            component,
            store,
            config,
            json,
        }) => commands::cmd_info(
            &package_folder,
            component.as_deref(),
            store.as_deref(),
            config.as_deref(),
            json,
        ),

        None => {
            println!("larder: cook native libraries from declarative recipes");
            println!("Run 'larder --help' for usage information");
            Ok(())
        }
    }
}
