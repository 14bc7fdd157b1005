// src/recipe/kitchen/mod.rs

//! Kitchen: where recipes are cooked
//!
//! Cooking a recipe runs four phases in a fixed order:
//! - Resolve options, requirements and capabilities into a [`BuildPlan`]
//! - Fetch, unpack and patch the pinned sources
//! - Run the native build once with the derived arguments
//! - Normalize the install tree and write the exported package contract
//!
//! Everything in the first phase happens before any network access or
//! build tool invocation, so configuration mistakes fail fast.

mod config;
mod cook;

pub use config::{BuildPlan, CONFIG_ENV, CONFIG_FILE, CookRequest, CookResult, KitchenConfig};
pub use cook::Cook;

use crate::build::{CommandRunner, SystemRunner, toolchain_args};
use crate::deps::{DependencyMap, DependencyProvider, LocalStore, evaluate_requirements, resolve_all};
use crate::error::{Error, Result};
use crate::export::{METADATA_FILE, PackageInfo};
use crate::hash::{HashAlgorithm, hash_bytes};
use crate::options::{EvalContext, OptionAssignment};
use crate::recipe::format::Recipe;
use crate::recipe::parser::validate_recipe;
use crate::settings::Settings;
use crate::translate::{Environment, ProcessEnvironment, TranslateContext};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// The Kitchen: where recipes are cooked
pub struct Kitchen {
    pub(crate) config: KitchenConfig,
    runner: Box<dyn CommandRunner>,
    env: Box<dyn Environment>,
    provider: Box<dyn DependencyProvider>,
}

impl Kitchen {
    /// Create a new Kitchen resolving dependencies from its local store
    pub fn new(config: KitchenConfig) -> Self {
        let store = LocalStore::new(&config.store_dir);
        Self {
            config,
            runner: Box::new(SystemRunner),
            env: Box::new(ProcessEnvironment),
            provider: Box::new(store),
        }
    }

    /// Create a Kitchen with default configuration
    pub fn with_defaults() -> Self {
        Self::new(KitchenConfig::default())
    }

    /// Use a different command runner
    pub fn with_runner(mut self, runner: Box<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Use a different environment for capability discovery
    pub fn with_environment(mut self, env: Box<dyn Environment>) -> Self {
        self.env = env;
        self
    }

    /// Use a different dependency provider
    pub fn with_provider(mut self, provider: Box<dyn DependencyProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn config(&self) -> &KitchenConfig {
        &self.config
    }

    pub(crate) fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub(crate) fn env(&self) -> &dyn Environment {
        self.env.as_ref()
    }

    /// Resolve options, requirements and capabilities without building
    pub fn plan(&self, recipe: &Recipe, request: &CookRequest) -> Result<BuildPlan> {
        let name = &recipe.package.name;
        let settings = &request.settings;

        if !recipe.supports(settings.os) {
            return Err(Error::ConfigError(format!(
                "Recipe {} does not support {}",
                name, settings.os
            )));
        }

        let warnings = validate_recipe(recipe)?;
        for warning in &warnings {
            warn!("{}: {}", name, warning);
        }

        let version = recipe.select_version(request.version.as_deref())?.to_string();
        let schema = recipe.option_schema()?;
        let options = schema.resolve(&request.options, settings)?;
        debug!("Options for {}/{}: {}", name, version, options);

        let ctx = EvalContext {
            options: &options,
            settings,
            capabilities: None,
        };
        let edges = evaluate_requirements(&recipe.requires, &ctx)?;
        let deps = resolve_all(&edges, self.provider.as_ref())?;

        let translation = recipe.configure.translate(
            &schema,
            &TranslateContext {
                options: &options,
                settings,
                deps: &deps,
                env: self.env(),
            },
        )?;

        let package_id = package_id(
            recipe,
            &version,
            settings,
            &options,
            &deps,
            &translation.args,
        )?;
        let package_folder =
            LocalStore::new(&self.config.store_dir).package_folder(name, &version, &package_id);

        let mut command_line =
            toolchain_args(recipe.build.system, &options, settings, &package_folder, &deps);
        command_line.extend(translation.args.iter().cloned());

        Ok(BuildPlan {
            name: name.clone(),
            version,
            settings: settings.clone(),
            options,
            edges,
            deps,
            capabilities: translation.capabilities,
            configure_args: translation.args,
            command_line,
            package_id,
            package_folder,
            warnings,
        })
    }

    /// Cook a recipe into the local store
    ///
    /// An existing package with the same id is reused unless `force` is
    /// set. A package folder without metadata is left over from a failed
    /// cook and is removed first.
    pub fn cook(&self, recipe: &Recipe, request: &CookRequest) -> Result<CookResult> {
        let plan = self.plan(recipe, request)?;
        info!(
            "Cooking {} version {} ({})",
            plan.name, plan.version, plan.package_id
        );

        let folder = &plan.package_folder;
        if folder.join(METADATA_FILE).is_file() {
            if !self.config.force {
                info!("Package {} already cooked, reusing", folder.display());
                return Ok(CookResult {
                    package_folder: folder.clone(),
                    info: PackageInfo::load(folder)?,
                    log: String::new(),
                    warnings: Vec::new(),
                    from_store: true,
                    build_dir: None,
                });
            }
            info!("Rebuilding {} (forced)", folder.display());
            remove_package_folder(folder)?;
        } else if folder.exists() {
            warn!("Removing unfinished package folder {}", folder.display());
            remove_package_folder(folder)?;
        }

        let mut cook = Cook::new(self, recipe, &plan)?;
        match cook.run() {
            Ok(info) => Ok(cook.finish(info)),
            Err(e) => {
                if folder.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(folder) {
                        warn!("Failed to remove {}: {}", folder.display(), cleanup);
                    }
                }
                cook.abandon();
                Err(e)
            }
        }
    }
}

fn remove_package_folder(folder: &Path) -> Result<()> {
    fs::remove_dir_all(folder).map_err(|e| {
        Error::IoError(format!("Failed to remove {}: {}", folder.display(), e))
    })
}

/// Identity of a cooked package
///
/// Hashes everything that can change the produced binaries: recipe text,
/// version, settings, option assignment, the ids of the dependencies it
/// was built against and the derived configure arguments. The arguments
/// carry locations found in the environment, such as a CUDA toolkit.
pub fn package_id(
    recipe: &Recipe,
    version: &str,
    settings: &Settings,
    options: &OptionAssignment,
    deps: &DependencyMap,
    configure_args: &[String],
) -> Result<String> {
    let mut material = String::new();
    material.push_str(&recipe.package.name);
    material.push('\n');
    material.push_str(version);
    material.push('\n');
    material.push_str(&serde_json::to_string(settings)?);
    material.push('\n');
    material.push_str(&serde_json::to_string(options)?);
    material.push('\n');
    for (name, dep) in deps {
        material.push_str(&format!("{}/{}#{}\n", name, dep.version, dep.package_id));
    }
    for arg in configure_args {
        material.push_str(arg);
        material.push('\n');
    }
    material.push_str(&recipe.recipe_hash);

    Ok(hash_bytes(HashAlgorithm::Sha256, material.as_bytes()))
}
