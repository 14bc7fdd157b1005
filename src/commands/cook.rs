// src/commands/cook.rs

//! Cook command - build packages from recipes

use super::{build_kitchen, load_config, load_request};
use crate::cli::ResolveArgs;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

/// Cook a package from a recipe
///
/// # Arguments
/// * `args` - Recipe path, version, options, settings and dependency folders
/// * `source_cache` - Directory for caching downloaded sources
/// * `jobs` - Number of parallel build jobs (None = config or CPU count)
/// * `keep_builddir` - Keep build directory after completion
/// * `force` - Rebuild even if the package is already in the store
/// * `show_log` - Print the build log when done
pub fn cmd_cook(
    args: &ResolveArgs,
    source_cache: Option<&str>,
    jobs: Option<u32>,
    keep_builddir: bool,
    force: bool,
    show_log: bool,
) -> Result<()> {
    let (recipe, request) = load_request(args)?;

    let mut config = load_config(args.config.as_deref(), args.store.as_deref())?;
    if let Some(cache) = source_cache {
        config.source_cache = PathBuf::from(cache);
    }
    if let Some(j) = jobs {
        if j == 0 {
            anyhow::bail!("--jobs must be at least 1");
        }
        config.jobs = j;
    }
    config.keep_builddir |= keep_builddir;
    config.force |= force;

    let jobs = config.jobs;
    let kitchen = build_kitchen(config, &args.deps)?;

    println!(
        "Cooking {} for {} {} ({}) with {} parallel jobs...",
        recipe.package.name,
        request.settings.os,
        request.settings.arch,
        request.settings.build_type,
        jobs
    );

    let result = kitchen
        .cook(&recipe, &request)
        .with_context(|| format!("Failed to cook {}", recipe.package.name))?;

    if result.from_store {
        println!("\n[OK] Already cooked: {}", result.package_folder.display());
    } else {
        println!("\n[COMPLETE] Cooked: {}", result.package_folder.display());
    }
    println!("  Package id: {}", result.info.package_id);

    if let Some(dir) = &result.build_dir {
        println!("  Build directory kept: {}", dir.display());
    }

    if !result.warnings.is_empty() {
        println!("\nBuild warnings:");
        for warning in &result.warnings {
            println!("  - {}", warning);
        }
    }

    if show_log && !result.log.is_empty() {
        println!("\nBuild log:");
        print!("{}", result.log);
    }

    info!(
        "Successfully cooked {} to {}",
        recipe.package.name,
        result.package_folder.display()
    );

    Ok(())
}
