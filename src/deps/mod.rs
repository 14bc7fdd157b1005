// src/deps/mod.rs

//! Dependency requirements and their resolution
//!
//! A recipe declares requirement edges; which edges exist depends on the
//! option assignment (`when`) and each edge may propagate options into the
//! dependency (`"$rdma"` inherits this recipe's value). Resolving an edge
//! to an installed package is the job of a [`DependencyProvider`].

mod reference;
pub mod pkgconfig;

pub use reference::{PackageRef, VersionSpec, compare_versions, parse_lenient};

use crate::error::{Error, Result};
use crate::export::{DependencyRef, METADATA_FILE, PackageInfo};
use crate::options::{Condition, EvalContext, OptionOverride};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Resolved dependencies by name
pub type DependencyMap = BTreeMap<String, ResolvedDependency>;

/// A requirement as written in a recipe
///
/// ```toml
/// requires = [
///     "munge/0.5.15",
///     { ref = "rdma-core/[>=50]", when = "rdma" },
///     { ref = "openucx/1.17.0", options = { cuda = "$cuda", shared = "True" } },
/// ]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Requirement {
    Plain(PackageRef),
    Detailed {
        #[serde(rename = "ref")]
        reference: PackageRef,
        #[serde(default)]
        when: Option<Condition>,
        #[serde(default)]
        options: BTreeMap<String, String>,
    },
}

impl Requirement {
    pub fn reference(&self) -> &PackageRef {
        match self {
            Self::Plain(r) | Self::Detailed { reference: r, .. } => r,
        }
    }

    pub fn condition(&self) -> Option<&Condition> {
        match self {
            Self::Plain(_) => None,
            Self::Detailed { when, .. } => when.as_ref(),
        }
    }

    /// Options propagated into the dependency, before `$` expansion
    pub fn propagated(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Plain(_) => None,
            Self::Detailed { options, .. } => Some(options),
        }
    }

    /// The concrete edge for an assignment, or `None` if `when` is false
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Option<DependencyEdge>> {
        if let Some(cond) = self.condition() {
            if !cond.eval(ctx)? {
                debug!("Requirement {} skipped ({})", self.reference(), cond);
                return Ok(None);
            }
        }

        let mut options = Vec::new();
        for (name, raw) in self.propagated().into_iter().flatten() {
            let value = match raw.strip_prefix('$') {
                Some(source) => match ctx.options.get(source) {
                    Some(v) => v.to_string(),
                    None => {
                        debug!(
                            "Not propagating {} to {}: option '{}' was removed",
                            name,
                            self.reference().name,
                            source
                        );
                        continue;
                    }
                },
                None => raw.clone(),
            };
            options.push(OptionOverride {
                name: name.clone(),
                value,
            });
        }

        Ok(Some(DependencyEdge {
            reference: self.reference().clone(),
            options,
        }))
    }
}

/// Evaluate all requirements into edges; duplicate names are an error
pub fn evaluate_requirements(
    requirements: &[Requirement],
    ctx: &EvalContext<'_>,
) -> Result<Vec<DependencyEdge>> {
    let mut seen = BTreeSet::new();
    let mut edges = Vec::new();

    for req in requirements {
        if let Some(edge) = req.evaluate(ctx)? {
            if !seen.insert(edge.reference.name.clone()) {
                return Err(Error::ConfigError(format!(
                    "Dependency '{}' is required more than once",
                    edge.reference.name
                )));
            }
            edges.push(edge);
        }
    }

    Ok(edges)
}

/// A dependency this evaluation actually needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub reference: PackageRef,
    pub options: Vec<OptionOverride>,
}

impl DependencyEdge {
    pub fn name(&self) -> &str {
        &self.reference.name
    }

    /// Whether an installed package was built with the propagated options
    pub fn accepts(&self, info: &PackageInfo) -> bool {
        self.reference.version.matches(&info.version)
            && self.options.iter().all(|ov| {
                info.options
                    .get(&ov.name)
                    .is_some_and(|v| v.to_string().eq_ignore_ascii_case(&ov.value))
            })
    }
}

/// A dependency resolved to an installed package folder
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub name: String,
    pub version: String,
    pub package_id: String,
    pub folder: PathBuf,
    pub info: PackageInfo,
}

impl ResolvedDependency {
    pub fn from_info(folder: &Path, info: PackageInfo) -> Self {
        Self {
            name: info.name.clone(),
            version: info.version.clone(),
            package_id: info.package_id.clone(),
            folder: folder.to_path_buf(),
            info,
        }
    }
}

/// Resolves requirement edges to installed packages
pub trait DependencyProvider {
    fn resolve(&self, edge: &DependencyEdge) -> Result<ResolvedDependency>;
}

/// Resolve every edge in order
pub fn resolve_all(
    edges: &[DependencyEdge],
    provider: &dyn DependencyProvider,
) -> Result<DependencyMap> {
    let mut resolved = DependencyMap::new();
    for edge in edges {
        let dep = provider.resolve(edge)?;
        info!(
            "Resolved {} -> {}/{} ({})",
            edge.reference,
            dep.name,
            dep.version,
            dep.folder.display()
        );
        resolved.insert(edge.name().to_string(), dep);
    }
    Ok(resolved)
}

/// Packages previously cooked by larder
///
/// Layout: `<root>/<name>/<version>/<package_id>/larder-package.json`.
/// A folder without metadata is an unfinished cook and is ignored.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn package_folder(&self, name: &str, version: &str, package_id: &str) -> PathBuf {
        self.root.join(name).join(version).join(package_id)
    }

    /// A complete package, if present
    pub fn find(&self, name: &str, version: &str, package_id: &str) -> Result<Option<ResolvedDependency>> {
        let folder = self.package_folder(name, version, package_id);
        if !folder.join(METADATA_FILE).is_file() {
            return Ok(None);
        }
        let info = PackageInfo::load(&folder)?;
        Ok(Some(ResolvedDependency::from_info(&folder, info)))
    }

    /// Every complete package of `name`, newest version first
    pub fn packages(&self, name: &str) -> Result<Vec<ResolvedDependency>> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut versions: Vec<String> = subdirs(&dir)?;
        versions.sort_by(|a, b| compare_versions(b, a));

        let mut found = Vec::new();
        for version in versions {
            let mut ids = subdirs(&dir.join(&version))?;
            ids.sort();
            for id in ids {
                if let Some(dep) = self.find(name, &version, &id)? {
                    found.push(dep);
                }
            }
        }
        Ok(found)
    }

    /// Transitive requirements of a cooked package, keyed by name
    ///
    /// Requirements are looked up in the store by id first, then read back
    /// from the folder they were built against.
    pub fn closure(&self, info: &PackageInfo) -> Result<DependencyMap> {
        let mut deps = DependencyMap::new();
        let mut pending: Vec<DependencyRef> = info.requires.clone();

        while let Some(req) = pending.pop() {
            if deps.contains_key(&req.name) {
                continue;
            }
            let dep = self.locate(&req)?;
            pending.extend(dep.info.requires.iter().cloned());
            deps.insert(req.name.clone(), dep);
        }
        Ok(deps)
    }

    /// Find a recorded requirement again
    fn locate(&self, req: &DependencyRef) -> Result<ResolvedDependency> {
        if !req.package_id.is_empty() {
            if let Some(dep) = self.find(&req.name, &req.version, &req.package_id)? {
                return Ok(dep);
            }
        }
        match &req.folder {
            Some(folder) => external_prefix(folder, &req.name, &req.version),
            None => Err(Error::NotFound(format!(
                "{}/{} ({}) is not in {}",
                req.name,
                req.version,
                req.package_id,
                self.root.display()
            ))),
        }
    }

    /// Names of all packages in the store
    pub fn names(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = subdirs(&self.root)?;
        names.sort();
        Ok(names)
    }
}

fn subdirs(dir: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            out.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(out)
}

impl DependencyProvider for LocalStore {
    fn resolve(&self, edge: &DependencyEdge) -> Result<ResolvedDependency> {
        let candidates: Vec<ResolvedDependency> = self
            .packages(edge.name())?
            .into_iter()
            .filter(|d| edge.accepts(&d.info))
            .collect();

        let Some(newest) = candidates.first() else {
            return Err(Error::ConfigError(format!(
                "Dependency {} not found in {}; cook it first",
                edge.reference,
                self.root.display()
            )));
        };

        let same_version = candidates
            .iter()
            .filter(|d| d.version == newest.version)
            .count();
        if same_version > 1 {
            warn!(
                "{} packages of {}/{} match; using {}",
                same_version, newest.name, newest.version, newest.package_id
            );
        }

        Ok(newest.clone())
    }
}

/// Explicit name -> folder table, with an optional fallback provider
///
/// Folders without `larder-package.json` are treated as plain install
/// prefixes with the default `include`/`lib`/`bin` layout.
#[derive(Default)]
pub struct StaticProvider {
    folders: BTreeMap<String, PathBuf>,
    fallback: Option<Box<dyn DependencyProvider>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, folder: impl Into<PathBuf>) -> Self {
        self.folders.insert(name.to_string(), folder.into());
        self
    }

    pub fn with_fallback(mut self, fallback: Box<dyn DependencyProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Parse a `name=DIR` command-line entry
    pub fn insert_spec(&mut self, spec: &str) -> Result<()> {
        let (name, dir) = spec.split_once('=').ok_or_else(|| {
            Error::ConfigError(format!("Invalid dependency '{}': expected name=DIR", spec))
        })?;
        self.folders.insert(name.trim().to_string(), PathBuf::from(dir.trim()));
        Ok(())
    }
}

impl DependencyProvider for StaticProvider {
    fn resolve(&self, edge: &DependencyEdge) -> Result<ResolvedDependency> {
        let Some(folder) = self.folders.get(edge.name()) else {
            return match &self.fallback {
                Some(fallback) => fallback.resolve(edge),
                None => Err(Error::ConfigError(format!(
                    "No folder given for dependency {}",
                    edge.reference
                ))),
            };
        };

        if !folder.is_dir() {
            return Err(Error::ConfigError(format!(
                "Folder {} for dependency {} does not exist",
                folder.display(),
                edge.name()
            )));
        }

        let version = edge.reference.version.exact().unwrap_or("unknown");
        external_prefix(folder, edge.name(), version)
    }
}

/// A folder given by path: a larder package or a plain install prefix
fn external_prefix(folder: &Path, name: &str, version: &str) -> Result<ResolvedDependency> {
    if !folder.is_dir() {
        return Err(Error::NotFound(format!(
            "{}/{}: folder {} does not exist",
            name,
            version,
            folder.display()
        )));
    }
    let info = if folder.join(METADATA_FILE).is_file() {
        PackageInfo::load(folder)?
    } else {
        PackageInfo::bare(name, version)
    };
    Ok(ResolvedDependency::from_info(folder, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OptionAssignment, OptionValue};
    use crate::settings::Settings;
    use tempfile::TempDir;

    fn ctx_eval<T>(values: &[(&str, OptionValue)], f: impl FnOnce(&EvalContext<'_>) -> T) -> T {
        let options = OptionAssignment::from_values(
            values
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        );
        let settings = Settings::host();
        let ctx = EvalContext {
            options: &options,
            settings: &settings,
            capabilities: None,
        };
        f(&ctx)
    }

    #[derive(Deserialize)]
    struct Reqs {
        requires: Vec<Requirement>,
    }

    fn reqs(src: &str) -> Vec<Requirement> {
        toml::from_str::<Reqs>(src).unwrap().requires
    }

    #[test]
    fn test_requirement_when_and_propagation() {
        let requires = reqs(
            r#"requires = [
                "munge/0.5.15",
                { ref = "rdma-core/61.0", when = "rdma" },
                { ref = "openucx/1.17.0", options = { cuda = "$cuda", shared = "True", fPIC = "$fPIC" } },
            ]"#,
        );

        let edges = ctx_eval(
            &[("rdma", OptionValue::Bool(false)), ("cuda", OptionValue::Bool(true))],
            |ctx| evaluate_requirements(&requires, ctx).unwrap(),
        );
        let names: Vec<&str> = edges.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["munge", "openucx"]);
        assert_eq!(
            edges[1].options,
            vec![
                OptionOverride { name: "cuda".into(), value: "True".into() },
                OptionOverride { name: "shared".into(), value: "True".into() },
            ]
        );

        let edges = ctx_eval(&[("rdma", OptionValue::Bool(true))], |ctx| {
            evaluate_requirements(&requires, ctx).unwrap()
        });
        assert_eq!(edges.len(), 3);
    }

    #[test]
    fn test_duplicate_requirement() {
        let requires = reqs(r#"requires = ["munge/0.5.15", "munge/0.5.16"]"#);
        let result = ctx_eval(&[], |ctx| evaluate_requirements(&requires, ctx));
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    fn store_package(root: &Path, name: &str, version: &str, id: &str, opts: &[(&str, bool)]) {
        let mut info = PackageInfo::bare(name, version);
        info.package_id = id.to_string();
        info.options = OptionAssignment::from_values(
            opts.iter()
                .map(|(k, v)| (k.to_string(), OptionValue::Bool(*v)))
                .collect(),
        );
        let folder = root.join(name).join(version).join(id);
        fs::create_dir_all(&folder).unwrap();
        info.write(&folder).unwrap();
    }

    fn edge(reference: &str, opts: &[(&str, &str)]) -> DependencyEdge {
        DependencyEdge {
            reference: reference.parse().unwrap(),
            options: opts
                .iter()
                .map(|(k, v)| OptionOverride { name: k.to_string(), value: v.to_string() })
                .collect(),
        }
    }

    #[test]
    fn test_local_store_picks_newest_match() {
        let dir = TempDir::new().unwrap();
        store_package(dir.path(), "openpmix", "4.2.9", "aaa", &[("shared", false)]);
        store_package(dir.path(), "openpmix", "5.0.3", "bbb", &[("shared", false)]);
        store_package(dir.path(), "openpmix", "5.0.3", "ccc", &[("shared", true)]);
        // Unfinished cook, no metadata
        fs::create_dir_all(dir.path().join("openpmix/6.0.0/ddd")).unwrap();

        let store = LocalStore::new(dir.path());
        let dep = store.resolve(&edge("openpmix/[>=4 <7]", &[])).unwrap();
        assert_eq!(dep.version, "5.0.3");

        let dep = store.resolve(&edge("openpmix/[>=4 <7]", &[("shared", "True")])).unwrap();
        assert_eq!(dep.package_id, "ccc");

        let dep = store.resolve(&edge("openpmix/4.2.9", &[])).unwrap();
        assert_eq!(dep.package_id, "aaa");
        assert_eq!(dep.folder, dir.path().join("openpmix/4.2.9/aaa"));

        let err = store.resolve(&edge("openpmix/6.0.0", &[])).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert!(store.resolve(&edge("munge/0.5.15", &[])).is_err());
        assert_eq!(store.names().unwrap(), vec!["openpmix"]);
    }

    #[test]
    fn test_static_provider() {
        let prefix = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        store_package(store_dir.path(), "munge", "0.5.15", "m1", &[]);

        let provider = StaticProvider::new()
            .with("rdma-core", prefix.path())
            .with("missing", "/nonexistent/larder/prefix")
            .with_fallback(Box::new(LocalStore::new(store_dir.path())));

        let rdma = provider.resolve(&edge("rdma-core/61.0", &[])).unwrap();
        assert_eq!(rdma.folder, prefix.path());
        assert_eq!(rdma.version, "61.0");
        assert_eq!(rdma.info.cpp_info.libdirs, vec!["lib"]);

        let munge = provider.resolve(&edge("munge/0.5.15", &[])).unwrap();
        assert_eq!(munge.package_id, "m1");

        assert!(provider.resolve(&edge("missing/1.0", &[])).is_err());

        let mut bare = StaticProvider::new();
        bare.insert_spec("cuda=/usr/local/cuda").unwrap();
        assert!(bare.insert_spec("cuda").is_err());
        assert!(bare.resolve(&edge("other/1.0", &[])).is_err());
    }

    #[test]
    fn test_store_closure() {
        let dir = TempDir::new().unwrap();
        store_package(dir.path(), "munge", "0.5.15", "m1", &[]);

        let mut ucx = PackageInfo::bare("openucx", "1.17.0");
        ucx.package_id = "u1".into();
        ucx.requires = vec![DependencyRef {
            name: "munge".into(),
            version: "0.5.15".into(),
            package_id: "m1".into(),
            folder: None,
        }];
        let folder = dir.path().join("openucx/1.17.0/u1");
        fs::create_dir_all(&folder).unwrap();
        ucx.write(&folder).unwrap();

        let mut ucc = PackageInfo::bare("openucc", "1.3.0");
        ucc.requires = vec![DependencyRef {
            name: "openucx".into(),
            version: "1.17.0".into(),
            package_id: "u1".into(),
            folder: None,
        }];

        let store = LocalStore::new(dir.path());
        let deps = store.closure(&ucc).unwrap();
        assert_eq!(deps.keys().collect::<Vec<_>>(), vec!["munge", "openucx"]);

        ucc.requires[0].package_id = "gone".into();
        assert!(matches!(store.closure(&ucc), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_closure_reads_external_prefixes_from_their_folder() {
        let store_dir = TempDir::new().unwrap();
        let prefix = TempDir::new().unwrap();
        let provider = StaticProvider::new().with("libevent", prefix.path());
        let libevent = provider.resolve(&edge("libevent/2.1.12", &[])).unwrap();

        let mut ompi = PackageInfo::bare("openmpi", "5.0.5");
        ompi.requires = vec![DependencyRef::from_resolved(&libevent)];
        assert_eq!(ompi.requires[0].folder.as_deref(), Some(prefix.path()));

        let store = LocalStore::new(store_dir.path());
        let deps = store.closure(&ompi).unwrap();
        assert_eq!(deps["libevent"].folder, prefix.path());
        assert_eq!(deps["libevent"].version, "2.1.12");

        // Without a folder only the store is searched
        ompi.requires[0].folder = None;
        assert!(matches!(store.closure(&ompi), Err(Error::NotFound(_))));

        ompi.requires[0].folder = Some(prefix.path().join("gone"));
        assert!(matches!(store.closure(&ompi), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_resolve_all_stops_at_first_failure() {
        struct Failing;
        impl DependencyProvider for Failing {
            fn resolve(&self, edge: &DependencyEdge) -> Result<ResolvedDependency> {
                Err(Error::ConfigError(format!("no {}", edge.name())))
            }
        }
        let edges = vec![edge("munge/0.5.15", &[])];
        assert!(resolve_all(&edges, &Failing).is_err());
        assert!(resolve_all(&[], &Failing).unwrap().is_empty());
    }
}
