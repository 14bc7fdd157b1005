// src/commands/configure.rs

//! Configure command - show what a cook would do without building

use super::{build_kitchen, load_config, load_request};
use crate::cli::ResolveArgs;
use anyhow::{Context, Result};
use larder::translate::CapabilityState;
use serde_json::json;

/// Resolve options, dependencies and capabilities and print the result
pub fn cmd_configure(args: &ResolveArgs, as_json: bool) -> Result<()> {
    let (recipe, request) = load_request(args)?;
    let config = load_config(args.config.as_deref(), args.store.as_deref())?;
    let kitchen = build_kitchen(config, &args.deps)?;

    let plan = kitchen
        .plan(&recipe, &request)
        .with_context(|| format!("Failed to configure {}", recipe.package.name))?;

    if as_json {
        let deps: serde_json::Map<String, serde_json::Value> = plan
            .deps
            .iter()
            .map(|(name, dep)| {
                (
                    name.clone(),
                    json!({
                        "version": dep.version,
                        "package_id": dep.package_id,
                        "folder": dep.folder,
                    }),
                )
            })
            .collect();
        let capabilities: serde_json::Map<String, serde_json::Value> = plan
            .capabilities
            .iter()
            .map(|cap| (cap.name.clone(), json!(cap.state)))
            .collect();

        let out = json!({
            "name": plan.name,
            "version": plan.version,
            "package_id": plan.package_id,
            "package_folder": plan.package_folder,
            "settings": plan.settings,
            "options": plan.options,
            "dependencies": deps,
            "capabilities": capabilities,
            "configure_args": plan.configure_args,
            "command_line": plan.command_line,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Recipe: {} version {}", plan.name, plan.version);
    println!(
        "Settings: os={} arch={} build_type={}",
        plan.settings.os, plan.settings.arch, plan.settings.build_type
    );

    println!("\nOptions:");
    for (name, value) in plan.options.values() {
        println!("  {} = {}", name, value);
    }
    for name in plan.options.removed() {
        println!("  {} (removed)", name);
    }

    if !plan.deps.is_empty() {
        println!("\nDependencies:");
        for dep in plan.deps.values() {
            println!("  {}/{} -> {}", dep.name, dep.version, dep.folder.display());
        }
    }

    if !plan.capabilities.is_empty() {
        println!("\nCapabilities:");
        for cap in plan.capabilities.iter() {
            let state = match &cap.state {
                CapabilityState::Disabled => "disabled".to_string(),
                CapabilityState::Enabled => "enabled".to_string(),
                CapabilityState::Path(p) => p.display().to_string(),
                CapabilityState::Value(v) => v.clone(),
            };
            println!("  {:<16} {}", cap.name, state);
        }
    }

    println!("\nConfigure arguments:");
    for arg in &plan.command_line {
        println!("  {}", arg);
    }

    println!("\nPackage id: {}", plan.package_id);
    println!("Package folder: {}", plan.package_folder.display());

    for warning in &plan.warnings {
        println!("Warning: {}", warning);
    }

    Ok(())
}
