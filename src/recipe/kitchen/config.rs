// src/recipe/kitchen/config.rs

//! Configuration types for the Kitchen

use crate::deps::{DependencyEdge, DependencyMap};
use crate::error::{Error, Result};
use crate::export::PackageInfo;
use crate::options::{OptionAssignment, OptionOverride};
use crate::settings::Settings;
use crate::translate::CapabilitySet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "LARDER_CONFIG";

/// Configuration file looked up in the working directory
pub const CONFIG_FILE: &str = "larder.toml";

/// Configuration for the Kitchen
///
/// ```toml
/// store_dir = "/srv/larder/store"
/// source_cache = "/srv/larder/sources"
/// jobs = 16
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KitchenConfig {
    /// Root of the local package store
    pub store_dir: PathBuf,
    /// Directory for downloaded sources
    pub source_cache: PathBuf,
    /// Parent of per-cook build directories; system temp dir when unset
    pub build_root: Option<PathBuf>,
    /// Number of parallel jobs
    pub jobs: u32,
    /// Keep build directory after completion (for debugging)
    pub keep_builddir: bool,
    /// Rebuild even if the package folder already exists
    pub force: bool,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        let jobs = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);
        let data = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
        let cache = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);

        Self {
            store_dir: data.join("larder").join("store"),
            source_cache: cache.join("larder").join("sources"),
            build_root: None,
            jobs,
            keep_builddir: false,
            force: false,
        }
    }
}

impl KitchenConfig {
    /// Load a configuration file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ParseError(format!("Invalid config {}: {}", path.display(), e)))?;
        if config.jobs == 0 {
            return Err(Error::ConfigError("jobs must be at least 1".to_string()));
        }
        Ok(config)
    }

    /// Find the configuration: explicit path, `$LARDER_CONFIG`, `./larder.toml`
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.is_empty() {
                return Self::load(Path::new(&path));
            }
        }
        let local = Path::new(CONFIG_FILE);
        if local.is_file() {
            debug!("Using {}", local.display());
            return Self::load(local);
        }
        Ok(Self::default())
    }

    /// Configuration rooted in one directory (tests and throwaway stores)
    pub fn rooted(root: &Path) -> Self {
        Self {
            store_dir: root.join("store"),
            source_cache: root.join("sources"),
            build_root: Some(root.join("build")),
            ..Self::default()
        }
    }
}

/// What to cook: version, option overrides and target settings
#[derive(Debug, Clone)]
pub struct CookRequest {
    pub version: Option<String>,
    pub options: Vec<OptionOverride>,
    pub settings: Settings,
}

impl Default for CookRequest {
    fn default() -> Self {
        Self {
            version: None,
            options: Vec::new(),
            settings: Settings::host(),
        }
    }
}

/// Everything derived before any source is fetched
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub name: String,
    pub version: String,
    pub settings: Settings,
    pub options: OptionAssignment,
    pub edges: Vec<DependencyEdge>,
    pub deps: DependencyMap,
    pub capabilities: CapabilitySet,
    /// Capability flags, passthroughs and static arguments
    pub configure_args: Vec<String>,
    /// Toolchain arguments followed by `configure_args`
    pub command_line: Vec<String>,
    pub package_id: String,
    pub package_folder: PathBuf,
    /// Recipe validation warnings
    pub warnings: Vec<String>,
}

/// Result of cooking a recipe
#[derive(Debug)]
pub struct CookResult {
    /// Folder holding the installed package and its metadata
    pub package_folder: PathBuf,
    /// Exported package contract
    pub info: PackageInfo,
    /// Build log
    pub log: String,
    /// Warnings generated during build
    pub warnings: Vec<String>,
    /// Whether an existing package was reused
    pub from_store: bool,
    /// Build directory, when kept
    pub build_dir: Option<PathBuf>,
}
