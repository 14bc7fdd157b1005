// src/export/mod.rs

//! Package exporter: the contract a cooked package offers its consumers
//!
//! After the native build installs into the package folder, the exporter
//! normalizes the tree (see [`layout`]), checks that every declared library
//! is actually there, and writes `larder-package.json`. Downstream recipes
//! read that file back as a resolved dependency, which closes the loop.

pub mod derive;
pub mod layout;

pub use derive::{DerivedFlags, FlagSource};
pub use layout::{PackagingSection, RenameOutcome, ReplaceOutcome};

use crate::build::CommandRunner;
use crate::deps::{DependencyMap, ResolvedDependency};
use crate::error::{Error, Result};
use crate::options::{CondItem, Condition, EvalContext, OptionAssignment, select};
use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};
use tracing::{debug, warn};

/// File written into every package folder, last, once the package is complete
pub const METADATA_FILE: &str = "larder-package.json";

/// Separator between a dependency name and one of its components
pub const COMPONENT_SEP: &str = "::";

/// What kind of artifact a package is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PackageType {
    #[default]
    Library,
    HeaderLibrary,
    Application,
}

/// Link and compile information for a package or one of its components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CppInfo {
    pub libs: Vec<String>,
    pub system_libs: Vec<String>,
    pub includedirs: Vec<String>,
    pub libdirs: Vec<String>,
    pub bindirs: Vec<String>,
    pub defines: Vec<String>,
    /// Local component names or `dep::component` references
    pub requires: Vec<String>,
    pub builddirs: Vec<String>,
    pub properties: BTreeMap<String, String>,
}

impl Default for CppInfo {
    fn default() -> Self {
        Self {
            libs: Vec::new(),
            system_libs: Vec::new(),
            includedirs: vec!["include".to_string()],
            libdirs: vec!["lib".to_string()],
            bindirs: vec!["bin".to_string()],
            defines: Vec::new(),
            requires: Vec::new(),
            builddirs: Vec::new(),
            properties: BTreeMap::new(),
        }
    }
}

/// Runtime environment a package contributes to its consumers
///
/// Paths are relative to the package folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunEnv {
    pub prepend_path: BTreeMap<String, Vec<String>>,
    pub define_path: BTreeMap<String, String>,
    pub define: BTreeMap<String, String>,
}

impl RunEnv {
    pub fn is_empty(&self) -> bool {
        self.prepend_path.is_empty() && self.define_path.is_empty() && self.define.is_empty()
    }

    /// Render the environment for a package installed at `folder`
    ///
    /// Prepended paths are joined with the platform separator in front of
    /// `${VAR}` so shells can evaluate them.
    pub fn resolve(&self, folder: &Path) -> Vec<(String, String)> {
        let sep = if cfg!(windows) { ";" } else { ":" };
        let mut env = Vec::new();

        for (var, paths) in &self.prepend_path {
            let mut parts: Vec<String> = paths
                .iter()
                .map(|p| package_path(folder, p).display().to_string())
                .collect();
            parts.push(format!("${{{}}}", var));
            env.push((var.clone(), parts.join(sep)));
        }
        for (var, path) in &self.define_path {
            env.push((var.clone(), package_path(folder, path).display().to_string()));
        }
        for (var, value) in &self.define {
            env.push((var.clone(), value.clone()));
        }

        env
    }
}

fn package_path(folder: &Path, rel: &str) -> PathBuf {
    if rel.is_empty() || rel == "." {
        folder.to_path_buf()
    } else {
        folder.join(rel)
    }
}

/// A dependency a cooked package was built against
///
/// Store packages are found again by id; the folder it was built against
/// covers prefixes given on the command line, which may have no id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    pub name: String,
    pub version: String,
    pub package_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<PathBuf>,
}

impl DependencyRef {
    pub fn from_resolved(dep: &ResolvedDependency) -> Self {
        Self {
            name: dep.name.clone(),
            version: dep.version.clone(),
            package_id: dep.package_id.clone(),
            folder: Some(dep.folder.clone()),
        }
    }
}

/// Exported metadata of a cooked package (`larder-package.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub package_id: String,
    #[serde(default)]
    pub package_type: PackageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(default)]
    pub options: OptionAssignment,
    #[serde(default)]
    pub requires: Vec<DependencyRef>,
    /// Derived configure arguments, for provenance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configure_args: Vec<String>,
    #[serde(default)]
    pub cpp_info: CppInfo,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, CppInfo>,
    #[serde(default, skip_serializing_if = "RunEnv::is_empty")]
    pub runenv: RunEnv,
}

impl PackageInfo {
    /// Metadata for a folder that larder did not produce
    pub fn bare(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            package_id: String::new(),
            package_type: PackageType::Library,
            settings: None,
            options: OptionAssignment::default(),
            requires: Vec::new(),
            configure_args: Vec::new(),
            cpp_info: CppInfo::default(),
            components: BTreeMap::new(),
            runenv: RunEnv::default(),
        }
    }

    /// Load `larder-package.json` from a package folder
    pub fn load(folder: &Path) -> Result<Self> {
        let path = folder.join(METADATA_FILE);
        let content = fs::read_to_string(&path).map_err(|e| {
            Error::NotFound(format!("Package metadata {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| Error::ParseError(format!("Invalid {}: {}", path.display(), e)))
    }

    /// Write `larder-package.json` into a package folder
    pub fn write(&self, folder: &Path) -> Result<PathBuf> {
        let path = folder.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    pub fn component(&self, name: &str) -> Option<&CppInfo> {
        self.components.get(name)
    }

    /// What `<this package>::<component>` refers to
    ///
    /// A package without components answers for any component name with
    /// its global info, as does `pkg::pkg`.
    pub fn component_target(&self, component: &str) -> Option<ComponentTarget> {
        if self.component(component).is_some() {
            Some(ComponentTarget::Component)
        } else if component == self.name || self.components.is_empty() {
            Some(ComponentTarget::Package)
        } else {
            None
        }
    }

    /// Every `CppInfo` of this package with its component name
    fn infos(&self) -> Vec<(Option<&str>, &CppInfo)> {
        if self.components.is_empty() {
            vec![(None, &self.cpp_info)]
        } else {
            self.components
                .iter()
                .map(|(name, info)| (Some(name.as_str()), info))
                .collect()
        }
    }

    /// Transitive, ordered link set of a component (or the whole package)
    ///
    /// Dependents come before what they require, so the returned libraries
    /// can be passed to a linker as-is. `deps` must contain every package
    /// reachable through `requires`.
    pub fn link_closure(
        &self,
        folder: &Path,
        component: Option<&str>,
        deps: &DependencyMap,
    ) -> Result<LinkPlan> {
        let mut walker = ClosureWalker {
            root: (self, folder),
            deps,
            visiting: BTreeSet::new(),
            done: BTreeSet::new(),
            order: Vec::new(),
        };

        let start = match component {
            Some(c) => {
                if self.component(c).is_none() {
                    return Err(Error::NotFound(format!(
                        "Component '{}' in package {}",
                        c, self.name
                    )));
                }
                vec![NodeKey::new(&self.name, Some(c))]
            }
            None => walker.package_nodes(&self.name)?,
        };

        for node in start {
            walker.visit(node)?;
        }

        Ok(walker.plan())
    }
}

/// Resolution of a `dep::component` reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentTarget {
    /// A declared component
    Component,
    /// The whole package
    Package,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct NodeKey {
    package: String,
    component: Option<String>,
}

impl NodeKey {
    fn new(package: &str, component: Option<&str>) -> Self {
        Self {
            package: package.to_string(),
            component: component.map(str::to_string),
        }
    }
}

struct ClosureWalker<'a> {
    root: (&'a PackageInfo, &'a Path),
    deps: &'a DependencyMap,
    visiting: BTreeSet<NodeKey>,
    done: BTreeSet<NodeKey>,
    order: Vec<(NodeKey, PathBuf, CppInfo)>,
}

impl<'a> ClosureWalker<'a> {
    fn package(&self, name: &str) -> Result<(&'a PackageInfo, &'a Path)> {
        if name == self.root.0.name {
            return Ok(self.root);
        }
        self.deps
            .get(name)
            .map(|d| (&d.info, d.folder.as_path()))
            .ok_or_else(|| {
                Error::PackageError(format!(
                    "Package '{}' is required but was not resolved",
                    name
                ))
            })
    }

    /// All nodes a bare package reference expands to
    fn package_nodes(&self, name: &str) -> Result<Vec<NodeKey>> {
        let (info, _) = self.package(name)?;
        Ok(info
            .infos()
            .into_iter()
            .map(|(comp, _)| NodeKey::new(name, comp))
            .collect())
    }

    /// Expand one `requires` entry of `from` into graph nodes
    fn expand(&self, from: &NodeKey, req: &str) -> Result<Vec<NodeKey>> {
        match req.split_once(COMPONENT_SEP) {
            Some((dep, comp)) => {
                let (info, _) = self.package(dep)?;
                match info.component_target(comp) {
                    Some(ComponentTarget::Component) => Ok(vec![NodeKey::new(dep, Some(comp))]),
                    Some(ComponentTarget::Package) => self.package_nodes(dep),
                    None => Err(Error::PackageError(format!(
                        "Package '{}' has no component '{}'",
                        dep, comp
                    ))),
                }
            }
            None if from.component.is_some() => Ok(vec![NodeKey::new(&from.package, Some(req))]),
            None => self.package_nodes(req),
        }
    }

    fn visit(&mut self, node: NodeKey) -> Result<()> {
        if self.done.contains(&node) {
            return Ok(());
        }
        if !self.visiting.insert(node.clone()) {
            return Err(Error::PackageError(format!(
                "Component cycle through {}{}{}",
                node.package,
                COMPONENT_SEP,
                node.component.as_deref().unwrap_or(&node.package)
            )));
        }

        let (info, folder) = self.package(&node.package)?;
        let cpp = match &node.component {
            Some(c) => info.component(c).ok_or_else(|| {
                Error::PackageError(format!(
                    "Package '{}' has no component '{}'",
                    node.package, c
                ))
            })?,
            None => &info.cpp_info,
        };

        for req in &cpp.requires {
            for next in self.expand(&node, req)? {
                self.visit(next)?;
            }
        }

        self.visiting.remove(&node);
        self.done.insert(node.clone());
        self.order.push((node, folder.to_path_buf(), cpp.clone()));
        Ok(())
    }

    fn plan(self) -> LinkPlan {
        let mut plan = LinkPlan::default();

        // Postorder puts requirements first; linkers want them last
        for (_, folder, cpp) in self.order.iter().rev() {
            push_keep_last(&mut plan.libs, &cpp.libs);
            push_keep_last(&mut plan.system_libs, &cpp.system_libs);
            for d in &cpp.libdirs {
                push_unique(&mut plan.libdirs, package_path(folder, d));
            }
            for d in &cpp.includedirs {
                push_unique(&mut plan.includedirs, package_path(folder, d));
            }
            for def in &cpp.defines {
                push_unique(&mut plan.defines, def.clone());
            }
        }

        plan
    }
}

fn push_keep_last(list: &mut Vec<String>, items: &[String]) {
    for item in items {
        list.retain(|existing| existing != item);
        list.push(item.clone());
    }
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) {
    if !list.contains(&item) {
        list.push(item);
    }
}

/// Everything needed to link against a component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkPlan {
    pub libs: Vec<String>,
    pub system_libs: Vec<String>,
    pub libdirs: Vec<PathBuf>,
    pub includedirs: Vec<PathBuf>,
    pub defines: Vec<String>,
}

impl LinkPlan {
    /// Linker arguments in `-L`/`-l` form
    pub fn linker_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .libdirs
            .iter()
            .map(|d| format!("-L{}", d.display()))
            .collect();
        args.extend(self.libs.iter().map(|l| format!("-l{}", l)));
        args.extend(self.system_libs.iter().map(|l| format!("-l{}", l)));
        args
    }
}

fn default_includedirs() -> Vec<CondItem<String>> {
    vec![CondItem::Plain("include".to_string())]
}

fn default_libdirs() -> Vec<CondItem<String>> {
    vec![CondItem::Plain("lib".to_string())]
}

fn default_bindirs() -> Vec<CondItem<String>> {
    vec![CondItem::Plain("bin".to_string())]
}

/// Recipe declaration of a `CppInfo`; every list entry may carry a `when`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CppInfoDecl {
    #[serde(default)]
    pub libs: Vec<CondItem<String>>,
    #[serde(default)]
    pub system_libs: Vec<CondItem<String>>,
    #[serde(default = "default_includedirs")]
    pub includedirs: Vec<CondItem<String>>,
    #[serde(default = "default_libdirs")]
    pub libdirs: Vec<CondItem<String>>,
    #[serde(default = "default_bindirs")]
    pub bindirs: Vec<CondItem<String>>,
    #[serde(default)]
    pub defines: Vec<CondItem<String>>,
    #[serde(default)]
    pub requires: Vec<CondItem<String>>,
    #[serde(default)]
    pub builddirs: Vec<CondItem<String>>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Components only: export this component only when the condition holds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,
    /// Read further flags from the installed tree after packaging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags_from: Option<FlagSource>,
}

impl Default for CppInfoDecl {
    fn default() -> Self {
        Self {
            libs: Vec::new(),
            system_libs: Vec::new(),
            includedirs: default_includedirs(),
            libdirs: default_libdirs(),
            bindirs: default_bindirs(),
            defines: Vec::new(),
            requires: Vec::new(),
            builddirs: Vec::new(),
            properties: BTreeMap::new(),
            when: None,
            flags_from: None,
        }
    }
}

impl CppInfoDecl {
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<CppInfo> {
        Ok(CppInfo {
            libs: select(&self.libs, ctx)?,
            system_libs: select(&self.system_libs, ctx)?,
            includedirs: select(&self.includedirs, ctx)?,
            libdirs: select(&self.libdirs, ctx)?,
            bindirs: select(&self.bindirs, ctx)?,
            defines: select(&self.defines, ctx)?,
            requires: select(&self.requires, ctx)?,
            builddirs: select(&self.builddirs, ctx)?,
            properties: self.properties.clone(),
        })
    }

    /// Every condition in this declaration
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        [
            &self.libs,
            &self.system_libs,
            &self.includedirs,
            &self.libdirs,
            &self.bindirs,
            &self.defines,
            &self.requires,
            &self.builddirs,
        ]
        .into_iter()
        .flatten()
        .filter_map(CondItem::condition)
        .chain(self.when.as_ref())
    }
}

/// The `[export]` section of a recipe
///
/// ```toml
/// [export]
/// libs = ["ucp", "uct", "ucs", "ucm"]
/// system_libs = [{ value = "dl", when = "os=Linux" }]
///
/// [export.components.ompi]
/// libs = ["mpi"]
/// requires = ["openpmix::pmix", { value = "openucx::ucp", when = "cap:ucx" }]
///
/// [export.components.upcxx-udp-seq]
/// when = "udp"
/// flags_from = { command = { program = "bin/upcxx-meta", cflags = "CPPFLAGS", libs = "LIBS" } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportSection {
    #[serde(flatten)]
    pub root: CppInfoDecl,
    #[serde(default)]
    pub components: BTreeMap<String, CppInfoDecl>,
    #[serde(default)]
    pub runenv: RunEnv,
}

/// Evaluated export: root info plus components
#[derive(Debug, Clone, Default)]
pub struct ExportedInfo {
    pub cpp_info: CppInfo,
    pub components: BTreeMap<String, CppInfo>,
    pub runenv: RunEnv,
}

impl ExportSection {
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<ExportedInfo> {
        let cpp_info = self.root.evaluate(ctx)?;
        let mut components = BTreeMap::new();
        for (name, decl) in &self.components {
            if let Some(cond) = &decl.when {
                if !cond.eval(ctx)? {
                    debug!("Component {} not exported ({})", name, cond);
                    continue;
                }
            }
            components.insert(name.clone(), decl.evaluate(ctx)?);
        }
        Ok(ExportedInfo {
            cpp_info,
            components,
            runenv: self.runenv.clone(),
        })
    }

    /// Fill in flags read from the package installed at `folder`
    ///
    /// Runs after packaging, for the root and every exported component
    /// that declares a [`FlagSource`].
    pub fn derive_flags(
        &self,
        exported: &mut ExportedInfo,
        folder: &Path,
        runner: &dyn CommandRunner,
    ) -> Result<usize> {
        let mut derived = 0;
        if let Some(source) = &self.root.flags_from {
            source.apply(folder, runner, &mut exported.cpp_info)?;
            derived += 1;
        }
        for (name, decl) in &self.components {
            let (Some(source), Some(info)) = (&decl.flags_from, exported.components.get_mut(name)) else {
                continue;
            };
            debug!("Deriving flags for component {}", name);
            source.apply(folder, runner, info)?;
            derived += 1;
        }
        Ok(derived)
    }
}

/// Whether `file_name` is a build product of library `lib`
fn is_library_file(file_name: &str, lib: &str) -> bool {
    let stem = format!("lib{}", lib);
    let Some(rest) = file_name.strip_prefix(&stem) else {
        return file_name == format!("{}.lib", lib);
    };
    rest == ".a"
        || rest == ".so"
        || rest.starts_with(".so.")
        || rest.ends_with(".dylib") && (rest == ".dylib" || rest.starts_with('.'))
}

fn library_present(folder: &Path, libdirs: &[String], lib: &str) -> bool {
    libdirs.iter().any(|dir| {
        fs::read_dir(package_path(folder, dir))
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .any(|e| is_library_file(&e.file_name().to_string_lossy(), lib))
            })
            .unwrap_or(false)
    })
}

/// Check the install tree against the exported contract
///
/// Every exported library must exist under one of its libdirs, and every
/// component requirement must name a local component or a component of a
/// dependency that was actually enabled for this build.
pub fn verify_package(folder: &Path, info: &PackageInfo, deps: &DependencyMap) -> Result<()> {
    for (component, cpp) in info.infos() {
        let label = component.unwrap_or(&info.name);

        for lib in &cpp.libs {
            if !library_present(folder, &cpp.libdirs, lib) {
                return Err(Error::PackageError(format!(
                    "Library '{}' exported by {} not found in {:?}",
                    lib, label, cpp.libdirs
                )));
            }
            debug!("Verified library {} for {}", lib, label);
        }

        for dir in &cpp.includedirs {
            if info.package_type != PackageType::Application && !package_path(folder, dir).is_dir() {
                warn!("Include directory '{}' of {} does not exist", dir, label);
            }
        }

        for req in &cpp.requires {
            verify_requirement(info, component, req, deps)?;
        }
    }

    Ok(())
}

fn verify_requirement(
    info: &PackageInfo,
    component: Option<&str>,
    req: &str,
    deps: &DependencyMap,
) -> Result<()> {
    let (dep_name, dep_comp) = match req.split_once(COMPONENT_SEP) {
        Some((d, c)) => (d, Some(c)),
        None if component.is_some() => {
            if info.component(req).is_some() {
                return Ok(());
            }
            return Err(Error::PackageError(format!(
                "Component '{}' requires unknown local component '{}'",
                component.unwrap_or_default(),
                req
            )));
        }
        None => (req, None),
    };

    let dep = deps.get(dep_name).ok_or_else(|| {
        Error::PackageError(format!(
            "{} requires '{}' but dependency '{}' is not enabled for this build",
            component.unwrap_or(&info.name),
            req,
            dep_name
        ))
    })?;

    if let Some(c) = dep_comp {
        if dep.info.component_target(c).is_none() {
            return Err(Error::PackageError(format!(
                "Dependency '{}' has no component '{}'",
                dep_name, c
            )));
        }
    }

    Ok(())
}
