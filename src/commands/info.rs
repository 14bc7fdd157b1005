// src/commands/info.rs

//! Info command - show the exported contract of a cooked package

use super::load_config;
use anyhow::{Context, Result};
use larder::deps::LocalStore;
use larder::export::{CppInfo, PackageInfo};
use std::path::Path;

/// Print metadata, link flags and runtime environment of a package
pub fn cmd_info(
    package_folder: &str,
    component: Option<&str>,
    store: Option<&str>,
    config: Option<&str>,
    as_json: bool,
) -> Result<()> {
    let folder = Path::new(package_folder);
    let info = PackageInfo::load(folder)
        .with_context(|| format!("Not a cooked package: {}", folder.display()))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Package: {} version {}", info.name, info.version);
    println!("Type: {}", info.package_type);
    if !info.package_id.is_empty() {
        println!("Package id: {}", info.package_id);
    }
    if let Some(settings) = &info.settings {
        println!(
            "Settings: os={} arch={} build_type={}",
            settings.os, settings.arch, settings.build_type
        );
    }
    if !info.options.values().is_empty() {
        println!("Options: {}", info.options);
    }
    if !info.requires.is_empty() {
        println!("Requires:");
        for req in &info.requires {
            println!("  {}/{} ({})", req.name, req.version, req.package_id);
        }
    }

    if info.components.is_empty() {
        print_cpp_info("Exports", &info.cpp_info);
    } else {
        for (name, cpp) in &info.components {
            print_cpp_info(&format!("Component {}", name), cpp);
        }
    }

    let config = load_config(config, store)?;
    let store = LocalStore::new(&config.store_dir);
    let deps = store
        .closure(&info)
        .with_context(|| format!("Failed to resolve requirements of {}", info.name))?;
    let link = info
        .link_closure(folder, component, &deps)
        .with_context(|| format!("Failed to compute link closure of {}", info.name))?;

    println!("\nLink flags:");
    println!("  {}", link.linker_args().join(" "));
    if !link.includedirs.is_empty() {
        let includes: Vec<String> = link
            .includedirs
            .iter()
            .map(|d| format!("-I{}", d.display()))
            .collect();
        println!("Compile flags:");
        println!("  {}", includes.join(" "));
    }
    if !link.defines.is_empty() {
        let defines: Vec<String> = link.defines.iter().map(|d| format!("-D{}", d)).collect();
        println!("  {}", defines.join(" "));
    }

    let env = info.runenv.resolve(folder);
    if !env.is_empty() {
        println!("\nRuntime environment:");
        for (var, value) in env {
            println!("  {}={}", var, value);
        }
    }

    Ok(())
}

fn print_cpp_info(title: &str, cpp: &CppInfo) {
    println!("\n{}:", title);
    if !cpp.libs.is_empty() {
        println!("  libs: {}", cpp.libs.join(", "));
    }
    if !cpp.system_libs.is_empty() {
        println!("  system_libs: {}", cpp.system_libs.join(", "));
    }
    if !cpp.defines.is_empty() {
        println!("  defines: {}", cpp.defines.join(", "));
    }
    if !cpp.requires.is_empty() {
        println!("  requires: {}", cpp.requires.join(", "));
    }
    for (key, value) in &cpp.properties {
        println!("  {}: {}", key, value);
    }
}
