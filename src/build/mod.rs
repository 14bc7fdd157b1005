// src/build/mod.rs

//! Build invocation
//!
//! Turns the `[build]` section plus the derived configure arguments into an
//! ordered list of external commands and runs each of them exactly once.
//! The first failing step aborts the cook; its output is carried verbatim
//! in the resulting [`Error::BuildError`].

pub mod runner;

pub use runner::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};

use crate::deps::DependencyMap;
use crate::error::{Error, Result};
use crate::options::{FPIC, OptionAssignment};
use crate::settings::{BuildType, Settings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};
use tracing::info;

/// Native build system driven by a recipe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BuildSystem {
    /// `configure` + `make` + `make install`
    Autotools,
    /// `cmake` configure, build and install
    Cmake,
    /// Plain `make` in a subdirectory; packaging copies the results
    Make,
    /// Explicit shell commands
    Shell,
    /// Nothing to compile (header-only or copy-only packages)
    #[default]
    None,
}

/// The `[build]` section of a recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSection {
    #[serde(default)]
    pub system: BuildSystem,

    /// Bootstrap script run in the source tree before configure
    #[serde(default)]
    pub autogen: Option<String>,

    /// Configure script relative to the source subdirectory
    #[serde(default = "default_configure_script")]
    pub configure_script: String,

    /// Subdirectory of the source tree holding the build files
    #[serde(default)]
    pub subdir: Option<String>,

    /// Shell commands for `system = "shell"`; supports `%(var)s`
    #[serde(default)]
    pub commands: Vec<crate::options::CondItem<String>>,

    /// Extra arguments for every `make` invocation
    #[serde(default)]
    pub make_args: Vec<String>,

    /// Parallel jobs; defaults to the kitchen setting
    #[serde(default)]
    pub jobs: Option<u32>,

    /// Environment variables set for every step; supports `%(var)s`
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_configure_script() -> String {
    "configure".to_string()
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            system: BuildSystem::None,
            autogen: None,
            configure_script: default_configure_script(),
            subdir: None,
            commands: Vec::new(),
            make_args: Vec::new(),
            jobs: None,
            env: BTreeMap::new(),
        }
    }
}

impl BuildSection {
    /// Structural checks that do not need an option assignment
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        match self.system {
            BuildSystem::Shell if self.commands.is_empty() => {
                return Err(Error::ParseError(
                    "Build system 'shell' needs at least one command".to_string(),
                ));
            }
            BuildSystem::Shell => {}
            _ if !self.commands.is_empty() => {
                warnings.push(format!(
                    "Build commands are ignored for build system '{}'",
                    self.system
                ));
            }
            _ => {}
        }

        if self.autogen.is_some() && self.system != BuildSystem::Autotools {
            warnings.push("autogen is only used by the autotools build system".to_string());
        }

        if self.jobs == Some(0) {
            return Err(Error::ParseError("build.jobs must be at least 1".to_string()));
        }

        Ok(warnings)
    }
}

/// Directories of one cook
#[derive(Debug, Clone)]
pub struct BuildLayout {
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub generators_dir: PathBuf,
    pub package_folder: PathBuf,
}

impl BuildLayout {
    /// Directory the native build files live in
    pub fn work_dir(&self, section: &BuildSection) -> PathBuf {
        match &section.subdir {
            Some(sub) => self.source_dir.join(sub),
            None => self.source_dir.clone(),
        }
    }
}

/// Everything the build steps are derived from
pub struct BuildInputs<'a> {
    pub options: &'a OptionAssignment,
    pub settings: &'a Settings,
    pub deps: &'a DependencyMap,
    /// Capability flags, passthroughs and static arguments
    pub configure_args: &'a [String],
    /// Selected and substituted shell commands
    pub commands: &'a [String],
    /// Substituted `[build.env]`
    pub env: &'a BTreeMap<String, String>,
    pub jobs: u32,
    /// `PKG_CONFIG_PATH` inherited from the caller, if any
    pub inherited_pkg_config_path: Option<String>,
}

/// Toolchain-level arguments derived from the standard options
///
/// These come before the capability flags on the configure command line.
pub fn toolchain_args(
    system: BuildSystem,
    options: &OptionAssignment,
    settings: &Settings,
    package_folder: &Path,
    deps: &DependencyMap,
) -> Vec<String> {
    let shared = options.get("shared").and_then(|v| v.as_bool());
    let mut args = Vec::new();

    match system {
        BuildSystem::Autotools => {
            args.push(format!("--prefix={}", package_folder.display()));
            match shared {
                Some(true) => {
                    args.push("--enable-shared".to_string());
                    args.push("--disable-static".to_string());
                }
                Some(false) => {
                    args.push("--disable-shared".to_string());
                    args.push("--enable-static".to_string());
                }
                None => {}
            }
        }
        BuildSystem::Cmake => {
            args.push(format!("-DCMAKE_INSTALL_PREFIX={}", package_folder.display()));
            args.push(format!("-DCMAKE_BUILD_TYPE={}", cmake_build_type(settings.build_type)));
            if let Some(shared) = shared {
                args.push(format!("-DBUILD_SHARED_LIBS={}", on_off(shared)));
            }
            if let Some(fpic) = options.get(FPIC).and_then(|v| v.as_bool()) {
                args.push(format!("-DCMAKE_POSITION_INDEPENDENT_CODE={}", on_off(fpic)));
            }
            if !deps.is_empty() {
                let prefixes: Vec<String> = deps
                    .values()
                    .map(|d| d.folder.display().to_string())
                    .collect();
                args.push(format!("-DCMAKE_PREFIX_PATH={}", prefixes.join(";")));
            }
        }
        BuildSystem::Make | BuildSystem::Shell | BuildSystem::None => {}
    }

    args
}

fn cmake_build_type(build_type: BuildType) -> &'static str {
    match build_type {
        BuildType::Release => "Release",
        BuildType::Debug => "Debug",
        BuildType::RelWithDebInfo => "RelWithDebInfo",
        BuildType::MinSizeRel => "MinSizeRel",
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "ON" } else { "OFF" }
}

/// Compiler flags from the build type and `fPIC`
pub fn compiler_flags(options: &OptionAssignment, settings: &Settings) -> String {
    let mut flags = settings.build_type.cflags().to_string();
    if options.get(FPIC).and_then(|v| v.as_bool()) == Some(true) {
        flags.push_str(" -fPIC");
    }
    flags
}

/// Environment shared by every build step
pub fn build_env(
    system: BuildSystem,
    layout: &BuildLayout,
    inputs: &BuildInputs<'_>,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();

    let mut pkg_config = layout.generators_dir.display().to_string();
    if let Some(inherited) = inputs
        .inherited_pkg_config_path
        .as_deref()
        .filter(|p| !p.is_empty())
    {
        pkg_config.push(':');
        pkg_config.push_str(inherited);
    }
    env.insert("PKG_CONFIG_PATH".to_string(), pkg_config);

    if system != BuildSystem::Cmake {
        let flags = compiler_flags(inputs.options, inputs.settings);
        env.insert("CFLAGS".to_string(), flags.clone());
        env.insert("CXXFLAGS".to_string(), flags);
    }

    env.insert("MAKEFLAGS".to_string(), format!("-j{}", inputs.jobs));
    env.insert("PREFIX".to_string(), layout.package_folder.display().to_string());
    env.insert("SOURCE_DIR".to_string(), layout.source_dir.display().to_string());
    env.insert("BUILD_DIR".to_string(), layout.build_dir.display().to_string());

    // Recipe variables win over the defaults above
    env.extend(inputs.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// Ordered build steps for a recipe
pub fn plan_steps(
    section: &BuildSection,
    layout: &BuildLayout,
    inputs: &BuildInputs<'_>,
) -> Result<Vec<CommandSpec>> {
    let env = build_env(section.system, layout, inputs);
    let work_dir = layout.work_dir(section);
    let jobs = format!("-j{}", inputs.jobs);
    let toolchain = toolchain_args(
        section.system,
        inputs.options,
        inputs.settings,
        &layout.package_folder,
        inputs.deps,
    );

    let mut steps = Vec::new();
    match section.system {
        BuildSystem::Autotools => {
            if let Some(autogen) = &section.autogen {
                steps.push(CommandSpec::new("configure", "sh", &work_dir).args(["-c", autogen.as_str()]));
            }
            let script = work_dir.join(&section.configure_script);
            steps.push(
                CommandSpec::new("configure", &script.display().to_string(), &layout.build_dir)
                    .args(toolchain)
                    .args(inputs.configure_args.iter().cloned()),
            );
            steps.push(
                CommandSpec::new("build", "make", &layout.build_dir)
                    .arg(jobs)
                    .args(section.make_args.iter().cloned()),
            );
            steps.push(
                CommandSpec::new("install", "make", &layout.build_dir)
                    .arg("install")
                    .args(section.make_args.iter().cloned()),
            );
        }
        BuildSystem::Cmake => {
            let source = work_dir.display().to_string();
            let build = layout.build_dir.display().to_string();
            steps.push(
                CommandSpec::new("configure", "cmake", &layout.build_dir)
                    .args(["-S", source.as_str(), "-B", build.as_str()])
                    .args(toolchain)
                    .args(inputs.configure_args.iter().cloned()),
            );
            steps.push(
                CommandSpec::new("build", "cmake", &layout.build_dir)
                    .args(["--build", build.as_str(), "--parallel"])
                    .arg(inputs.jobs.to_string()),
            );
            steps.push(
                CommandSpec::new("install", "cmake", &layout.build_dir)
                    .args(["--install", build.as_str()]),
            );
        }
        BuildSystem::Make => {
            steps.push(
                CommandSpec::new("build", "make", &work_dir)
                    .arg(jobs)
                    .args(section.make_args.iter().cloned())
                    .args(inputs.configure_args.iter().cloned()),
            );
        }
        BuildSystem::Shell => {
            if inputs.commands.is_empty() {
                return Err(Error::ConfigError(
                    "No build command applies to this configuration".to_string(),
                ));
            }
            for command in inputs.commands {
                steps.push(CommandSpec::new("build", "sh", &work_dir).args(["-c", command.as_str()]));
            }
        }
        BuildSystem::None => {}
    }

    Ok(steps.into_iter().map(|s| s.envs(&env)).collect())
}

/// Run the steps in order; the first failure aborts
pub fn invoke(runner: &dyn CommandRunner, steps: &[CommandSpec]) -> Result<Vec<CommandOutput>> {
    let mut outputs = Vec::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        info!("[{}/{}] {}: {}", i + 1, steps.len(), step.phase, step);
        outputs.push(runner.run(step)?);
    }
    Ok(outputs)
}
