// src/recipe/kitchen/cook.rs

//! Cook: the actual build execution for a single recipe

use crate::build::{BuildInputs, BuildLayout, invoke, plan_steps};
use crate::deps::pkgconfig;
use crate::error::{Error, Result};
use crate::export::{DependencyRef, PackageInfo, verify_package};
use crate::options::{EvalContext, select};
use crate::recipe::format::Recipe;
use crate::source::{SourceFetcher, apply_patches, apply_replacements};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::{debug, info};

use super::{BuildPlan, CookResult, Kitchen};

/// A single cook operation
pub struct Cook<'a> {
    kitchen: &'a Kitchen,
    recipe: &'a Recipe,
    plan: &'a BuildPlan,
    /// Temporary build directory
    build_dir: TempDir,
    /// Unpacked and patched sources
    source_dir: PathBuf,
    /// Out-of-tree build directory
    work_dir: PathBuf,
    /// Generated pkg-config files for the dependencies
    generators_dir: PathBuf,
    /// Build log accumulator
    log: String,
    /// Warnings
    warnings: Vec<String>,
}

impl<'a> Cook<'a> {
    pub(super) fn new(kitchen: &'a Kitchen, recipe: &'a Recipe, plan: &'a BuildPlan) -> Result<Self> {
        let build_dir = match &kitchen.config.build_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                TempDir::with_prefix_in(format!("{}-", plan.name), root)
            }
            None => TempDir::with_prefix(format!("larder-{}-", plan.name)),
        }
        .map_err(|e| Error::IoError(format!("Failed to create build directory: {}", e)))?;

        let source_dir = build_dir.path().join("source");
        let work_dir = build_dir.path().join("build");
        let generators_dir = build_dir.path().join("generators");
        fs::create_dir_all(&work_dir)?;
        debug!("Build directory: {}", build_dir.path().display());

        Ok(Self {
            kitchen,
            recipe,
            plan,
            build_dir,
            source_dir,
            work_dir,
            generators_dir,
            log: String::new(),
            warnings: plan.warnings.clone(),
        })
    }

    /// Run every phase after planning
    pub(super) fn run(&mut self) -> Result<PackageInfo> {
        info!("Prep: fetching sources...");
        self.prep()?;

        info!("Patching sources...");
        self.patch()?;

        info!("Writing pkg-config files...");
        self.generate()?;

        info!("Simmering: running build...");
        self.simmer()?;

        info!("Plating: packaging the result...");
        self.plate()
    }

    /// Variables available to `%(name)s` substitution
    fn variables(&self) -> Vec<(&'static str, String)> {
        vec![
            ("version", self.plan.version.clone()),
            ("package_folder", self.plan.package_folder.display().to_string()),
            ("source_dir", self.source_dir.display().to_string()),
            ("build_dir", self.work_dir.display().to_string()),
            ("generators_dir", self.generators_dir.display().to_string()),
            ("jobs", self.jobs().to_string()),
        ]
    }

    fn substitute(&self, template: &str) -> String {
        let vars = self.variables();
        let pairs: Vec<(&str, &str)> = vars.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.recipe.substitute(template, &pairs)
    }

    fn jobs(&self) -> u32 {
        self.recipe.build.jobs.unwrap_or(self.kitchen.config.jobs)
    }

    fn eval_context(&self) -> EvalContext<'_> {
        EvalContext {
            options: &self.plan.options,
            settings: &self.plan.settings,
            capabilities: None,
        }
    }

    /// Phase 1: Prep - fetch and unpack the pinned source
    fn prep(&mut self) -> Result<()> {
        let source = self
            .recipe
            .source(&self.plan.version)?
            .substituted(|s| self.substitute(s));

        let fetcher = SourceFetcher::new(&self.kitchen.config.source_cache, self.kitchen.runner());
        fetcher.fetch(&source, &self.source_dir)?;
        self.log_line(&format!("Fetched source: {}", source.location()));
        Ok(())
    }

    /// Phase 2: apply patches and source replacements
    fn patch(&mut self) -> Result<()> {
        let recipe = self.recipe;
        let patches = recipe.patches_for(&self.plan.version);
        apply_patches(self.kitchen.runner(), patches, &recipe.base_dir, &self.source_dir)?;
        for patch in patches {
            self.log_line(&format!("Applied patch: {}", patch.file));
        }

        let replaced =
            apply_replacements(&recipe.source_replace, &self.source_dir, &self.eval_context())?;
        if replaced > 0 {
            self.log_line(&format!("Applied {} source replacement(s)", replaced));
        }
        Ok(())
    }

    /// Phase 3: pkg-config files for the resolved dependencies
    fn generate(&mut self) -> Result<()> {
        let written = pkgconfig::generate(&self.plan.deps, &self.generators_dir)?;
        self.log_line(&format!("Generated {} pkg-config file(s)", written.len()));
        Ok(())
    }

    /// Phase 4: Simmer - run the native build
    fn simmer(&mut self) -> Result<()> {
        let plan = self.plan;
        let recipe = self.recipe;
        let build = &recipe.build;

        let commands: Vec<String> = select(&build.commands, &self.eval_context())?
            .iter()
            .map(|c| self.substitute(c))
            .collect();
        let env: BTreeMap<String, String> = build
            .env
            .iter()
            .map(|(k, v)| (k.clone(), self.substitute(v)))
            .collect();

        let layout = BuildLayout {
            source_dir: self.source_dir.clone(),
            build_dir: self.work_dir.clone(),
            generators_dir: self.generators_dir.clone(),
            package_folder: plan.package_folder.clone(),
        };
        let inputs = BuildInputs {
            options: &plan.options,
            settings: &plan.settings,
            deps: &plan.deps,
            configure_args: &plan.configure_args,
            commands: &commands,
            env: &env,
            jobs: self.jobs(),
            inherited_pkg_config_path: self.kitchen.env().var("PKG_CONFIG_PATH"),
        };

        let steps = plan_steps(build, &layout, &inputs)?;
        if steps.is_empty() {
            debug!("Build system '{}' has nothing to run", build.system);
        }

        fs::create_dir_all(&plan.package_folder)?;
        let outputs = invoke(self.kitchen.runner(), &steps)?;
        for (step, output) in steps.iter().zip(outputs) {
            self.log_build_output(&step.phase, &output.stdout, &output.stderr);
        }
        Ok(())
    }

    /// Phase 5: Plate - normalize the install tree and export metadata
    fn plate(&mut self) -> Result<PackageInfo> {
        let plan = self.plan;
        let recipe = self.recipe;
        let folder = &plan.package_folder;
        fs::create_dir_all(folder)?;

        let ctx = EvalContext {
            options: &plan.options,
            settings: &plan.settings,
            capabilities: Some(&plan.capabilities),
        };

        let report = recipe.packaging.apply(&self.source_dir, folder, &ctx)?;
        self.log_line(&format!(
            "Packaging: copied {}, removed {}, renamed {}, rewrote {}",
            report.copied,
            report.removed.len(),
            report.renamed.len(),
            report.replaced.len()
        ));

        let mut exported = recipe.export.evaluate(&ctx)?;
        let derived = recipe
            .export
            .derive_flags(&mut exported, folder, self.kitchen.runner())?;
        if derived > 0 {
            self.log_line(&format!("Read flags for {} export(s) from the install tree", derived));
        }
        let info = PackageInfo {
            name: plan.name.clone(),
            version: plan.version.clone(),
            package_id: plan.package_id.clone(),
            package_type: recipe.package.package_type,
            settings: Some(plan.settings.clone()),
            options: plan.options.clone(),
            requires: plan.deps.values().map(DependencyRef::from_resolved).collect(),
            configure_args: plan.command_line.clone(),
            cpp_info: exported.cpp_info,
            components: exported.components,
            runenv: exported.runenv,
        };

        verify_package(folder, &info, &plan.deps)?;

        // Metadata last: its presence marks the package as complete
        let path = info.write(folder)?;
        self.log_line(&format!("Wrote {}", path.display()));
        info!("Cooked: {}", folder.display());

        Ok(info)
    }

    /// Turn a successful cook into its result, keeping the build directory if asked
    pub(super) fn finish(self, info: PackageInfo) -> CookResult {
        let build_dir = if self.kitchen.config.keep_builddir {
            let kept = self.build_dir.keep();
            info!("Keeping build directory {}", kept.display());
            Some(kept)
        } else {
            None
        };

        CookResult {
            package_folder: self.plan.package_folder.clone(),
            info,
            log: self.log,
            warnings: self.warnings,
            from_store: false,
            build_dir,
        }
    }

    /// Drop a failed cook, keeping the build directory if asked
    pub(super) fn abandon(self) {
        if self.kitchen.config.keep_builddir {
            let kept = self.build_dir.keep();
            info!("Keeping failed build directory {}", kept.display());
        }
    }

    fn log_line(&mut self, line: &str) {
        self.log.push_str(line);
        self.log.push('\n');
    }

    /// Log build step output (stdout/stderr) with a phase header
    fn log_build_output(&mut self, phase: &str, stdout: &str, stderr: &str) {
        self.log_line(&format!("=== {} ===", phase));
        if !stdout.is_empty() {
            self.log.push_str(stdout);
            self.log.push('\n');
        }
        if !stderr.is_empty() {
            self.log.push_str(stderr);
            self.log.push('\n');
        }
    }
}
