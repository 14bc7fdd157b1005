// src/recipe/format.rs

//! Recipe file format definitions
//!
//! A recipe is a TOML file describing how to fetch, configure, build and
//! package one native library. One recipe covers every version it has a
//! `[sources."<version>"]` entry for.

use crate::build::BuildSection;
use crate::deps::{Requirement, compare_versions};
use crate::error::{Error, Result};
use crate::export::{ExportSection, PackageType, PackagingSection};
use crate::options::{OptionDecl, OptionSchema};
use crate::settings::Os;
use crate::source::{PatchSpec, SourceReplace, SourceSpec};
use crate::translate::ConfigureSection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A complete recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    /// Package metadata
    pub package: PackageSection,

    /// Option schema
    #[serde(default)]
    pub options: BTreeMap<String, OptionDecl>,

    /// Pinned sources by version
    #[serde(default)]
    pub sources: BTreeMap<String, SourceSpec>,

    /// Patches by version, applied in order
    #[serde(default)]
    pub patches: BTreeMap<String, Vec<PatchSpec>>,

    /// Literal text replacements in the unpacked sources
    #[serde(default)]
    pub source_replace: Vec<SourceReplace>,

    /// Dependency requirements
    #[serde(default)]
    pub requires: Vec<Requirement>,

    /// Capability declarations and static configure arguments
    #[serde(default)]
    pub configure: ConfigureSection,

    /// Build instructions
    #[serde(default)]
    pub build: BuildSection,

    /// Install tree normalization
    #[serde(default)]
    pub packaging: PackagingSection,

    /// Exported package contract
    #[serde(default)]
    pub export: ExportSection,

    /// Variables for substitution (optional)
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Directory the recipe was loaded from; patch paths are relative to it
    #[serde(skip)]
    pub base_dir: PathBuf,

    /// sha256 of the recipe text, part of every package id
    #[serde(skip)]
    pub recipe_hash: String,
}

/// Package metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    /// Package name
    pub name: String,

    /// Version cooked when none is requested; newest source otherwise
    #[serde(default)]
    pub default_version: Option<String>,

    #[serde(default)]
    pub package_type: PackageType,

    /// Operating systems the recipe supports; empty means any
    #[serde(default)]
    pub supported_os: Vec<Os>,

    /// Short description
    #[serde(default)]
    pub summary: Option<String>,

    /// License identifier (SPDX)
    #[serde(default)]
    pub license: Option<String>,

    /// Homepage URL
    #[serde(default)]
    pub homepage: Option<String>,
}

impl Recipe {
    /// Substitute variables in a string
    ///
    /// Replaces `%(name)s` patterns with values from the `[variables]`
    /// section first, then from `builtins`, so recipe variables may refer to
    /// built-in ones such as `%(version)s`.
    pub fn substitute(&self, template: &str, builtins: &[(&str, &str)]) -> String {
        let mut result = template.to_string();

        for (key, value) in &self.variables {
            result = result.replace(&format!("%({})s", key), value);
        }

        result = result.replace("%(name)s", &self.package.name);
        for (key, value) in builtins {
            result = result.replace(&format!("%({})s", key), value);
        }

        result
    }

    /// Versions with sources, newest first
    pub fn versions(&self) -> Vec<&str> {
        let mut versions: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        versions.sort_by(|a, b| compare_versions(b, a));
        versions
    }

    /// The version to cook: the requested one, the default, or the newest
    pub fn select_version<'a>(&'a self, requested: Option<&'a str>) -> Result<&'a str> {
        let version = match requested.or(self.package.default_version.as_deref()) {
            Some(v) => v,
            None => self.versions().first().copied().ok_or_else(|| {
                Error::ConfigError(format!("Recipe {} has no sources", self.package.name))
            })?,
        };

        if !self.sources.contains_key(version) {
            return Err(Error::ConfigError(format!(
                "Recipe {} has no sources for version {} (available: {})",
                self.package.name,
                version,
                self.versions().join(", ")
            )));
        }

        Ok(version)
    }

    /// Pinned source of a version
    pub fn source(&self, version: &str) -> Result<&SourceSpec> {
        self.sources.get(version).ok_or_else(|| {
            Error::ConfigError(format!(
                "Recipe {} has no sources for version {}",
                self.package.name, version
            ))
        })
    }

    /// Patches of a version, possibly none
    pub fn patches_for(&self, version: &str) -> &[PatchSpec] {
        self.patches.get(version).map(Vec::as_slice).unwrap_or_default()
    }

    /// Validated option schema
    pub fn option_schema(&self) -> Result<OptionSchema> {
        OptionSchema::from_decls(&self.options)
    }

    /// Whether the recipe can be cooked for `os`
    pub fn supports(&self, os: Os) -> bool {
        self.package.supported_os.is_empty() || self.package.supported_os.contains(&os)
    }
}
