// src/commands/mod.rs
//! Command handlers for the larder CLI

mod configure;
mod cook;
mod info;
mod validate;

pub use configure::cmd_configure;
pub use cook::cmd_cook;
pub use info::cmd_info;
pub use validate::cmd_validate;

use crate::cli::ResolveArgs;
use anyhow::{Context, Result};
use larder::deps::{LocalStore, StaticProvider};
use larder::options::OptionOverride;
use larder::recipe::parse_recipe_file;
use larder::{CookRequest, Kitchen, KitchenConfig, Recipe, Settings};
use std::path::{Path, PathBuf};

/// Load the kitchen configuration, applying a `--store` override
fn load_config(config: Option<&str>, store: Option<&str>) -> Result<KitchenConfig> {
    let mut config = KitchenConfig::discover(config.map(Path::new))
        .context("Failed to load configuration")?;
    if let Some(store) = store {
        config.store_dir = PathBuf::from(store);
    }
    Ok(config)
}

/// Parse the recipe and turn the command line into a cook request
fn load_request(args: &ResolveArgs) -> Result<(Recipe, CookRequest)> {
    let recipe_path = Path::new(&args.recipe);
    println!("Reading recipe: {}", recipe_path.display());
    let recipe = parse_recipe_file(recipe_path)
        .with_context(|| format!("Failed to parse recipe: {}", recipe_path.display()))?;

    let mut settings = Settings::host();
    for assignment in &args.settings {
        settings
            .apply(assignment)
            .with_context(|| format!("Invalid setting: {}", assignment))?;
    }

    let options = args
        .options
        .iter()
        .map(|o| o.parse::<OptionOverride>())
        .collect::<larder::Result<Vec<_>>>()
        .context("Invalid option override")?;

    Ok((
        recipe,
        CookRequest {
            version: args.version.clone(),
            options,
            settings,
        },
    ))
}

/// A kitchen resolving `--dep` folders first, then the local store
fn build_kitchen(config: KitchenConfig, deps: &[String]) -> Result<Kitchen> {
    let mut provider = StaticProvider::new()
        .with_fallback(Box::new(LocalStore::new(&config.store_dir)));
    for spec in deps {
        provider
            .insert_spec(spec)
            .with_context(|| format!("Invalid --dep: {}", spec))?;
    }
    Ok(Kitchen::new(config).with_provider(Box::new(provider)))
}
