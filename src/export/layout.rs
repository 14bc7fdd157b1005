// src/export/layout.rs

//! Install tree normalization
//!
//! Runs after the native install step and before metadata is written:
//! copy extra files from the source tree, drop unwanted files, move
//! build-metadata directories aside so consumers' own generators do not
//! pick them up, and rewrite absolute paths baked into installed files.

use crate::error::{Error, Result};
use crate::options::{Condition, EvalContext};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Prefix given to directories renamed aside
pub const ASIDE_PREFIX: &str = "_orig_";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Copy files matching `pattern` from the source tree into the package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyRule {
    pub pattern: String,
    /// Directory in the source tree to search, relative to its root
    #[serde(default)]
    pub from: String,
    /// Destination directory relative to the package folder
    #[serde(default)]
    pub to: String,
    /// Keep the path below `from` instead of flattening
    #[serde(default = "default_true")]
    pub keep_path: bool,
    #[serde(default)]
    pub when: Option<Condition>,
}

fn default_true() -> bool {
    true
}

/// Rewrite a literal string in an installed file
///
/// `%(package_folder)s` in either string stands for the package folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceRule {
    pub file: String,
    pub search: String,
    pub replace: String,
    #[serde(default)]
    pub when: Option<Condition>,
}

/// The `[packaging]` section of a recipe
///
/// ```toml
/// [packaging]
/// copy = [{ pattern = "LICENSE*", to = "licenses", keep_path = false }]
/// remove = ["**/*.la", "share/doc"]
/// rename_aside = ["lib/pkgconfig", "lib/cmake"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackagingSection {
    #[serde(default)]
    pub copy: Vec<CopyRule>,
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub rename_aside: Vec<String>,
    #[serde(default)]
    pub replace: Vec<ReplaceRule>,
}

/// What happened to a directory scheduled to be renamed aside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameOutcome {
    /// Moved to its aside name
    Renamed,
    /// Already aside from an earlier run; nothing to do
    AlreadyAside,
    /// Both existed; the fresh directory replaced the old aside copy
    Replaced,
    /// Neither exists
    Missing,
}

/// What a replace rule did to its file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    /// The pattern is gone and the replacement is in place from an earlier run
    AlreadyApplied,
    NotFound,
}

/// Summary of a packaging pass
#[derive(Debug, Clone, Default)]
pub struct PackagingReport {
    pub copied: usize,
    pub removed: Vec<PathBuf>,
    pub renamed: Vec<(String, RenameOutcome)>,
    pub replaced: Vec<String>,
    pub already_replaced: Vec<String>,
}

impl PackagingSection {
    pub fn is_empty(&self) -> bool {
        self.copy.is_empty()
            && self.remove.is_empty()
            && self.rename_aside.is_empty()
            && self.replace.is_empty()
    }

    /// Normalize `package_folder` in place
    ///
    /// Running it again on an already normalized tree succeeds and changes
    /// nothing.
    pub fn apply(
        &self,
        source_dir: &Path,
        package_folder: &Path,
        ctx: &EvalContext<'_>,
    ) -> Result<PackagingReport> {
        let mut report = PackagingReport::default();

        for rule in &self.copy {
            if let Some(cond) = &rule.when {
                if !cond.eval(ctx)? {
                    continue;
                }
            }
            report.copied += copy_matching(source_dir, rule, package_folder)?;
        }

        report.removed = remove_matching(package_folder, &self.remove)?;

        for rel in &self.rename_aside {
            let outcome = rename_aside(package_folder, rel)?;
            report.renamed.push((rel.clone(), outcome));
        }

        let folder = package_folder.display().to_string();
        for rule in &self.replace {
            if let Some(cond) = &rule.when {
                if !cond.eval(ctx)? {
                    continue;
                }
            }
            let search = rule.search.replace("%(package_folder)s", &folder);
            let replacement = rule.replace.replace("%(package_folder)s", &folder);
            let path = package_folder.join(&rule.file);
            match rewrite_installed_file(&path, &search, &replacement)? {
                ReplaceOutcome::Replaced => report.replaced.push(rule.file.clone()),
                ReplaceOutcome::AlreadyApplied => {
                    debug!("'{}' already rewritten in {}", rule.search, rule.file);
                    report.already_replaced.push(rule.file.clone());
                }
                ReplaceOutcome::NotFound => {
                    return Err(Error::PackageError(format!(
                        "Pattern '{}' not found in {}",
                        rule.search, rule.file
                    )));
                }
            }
        }

        info!(
            "Packaging: {} copied, {} removed, {} renamed aside",
            report.copied,
            report.removed.len(),
            report.renamed.len()
        );

        Ok(report)
    }
}

fn compile(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern)
        .map_err(|e| Error::ConfigError(format!("Invalid glob pattern '{}': {}", pattern, e)))
}

fn has_glob_chars(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Path relative to `root` with `/` separators
fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Remove files and directories matching any of `patterns`
///
/// Literal entries name a path relative to `root`; entries containing glob
/// characters are matched against every relative path in the tree.
pub fn remove_matching(root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    for raw in patterns {
        if !has_glob_chars(raw) {
            let path = root.join(raw);
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
                removed.push(path);
            } else if path.exists() {
                fs::remove_file(&path)?;
                removed.push(path);
            }
            continue;
        }

        let pattern = compile(raw)?;
        let mut matched = Vec::new();
        let mut walker = WalkDir::new(root).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
            let Some(rel) = relative(root, entry.path()) else {
                continue;
            };
            if pattern.matches_with(&rel, MATCH_OPTIONS) {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                matched.push(entry.into_path());
            }
        }

        for path in matched {
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            debug!("Removed {}", path.display());
            removed.push(path);
        }
    }

    Ok(removed)
}

/// The aside name of a relative directory (`lib/pkgconfig` -> `lib/_orig_pkgconfig`)
pub fn aside_path(rel: &str) -> PathBuf {
    let path = Path::new(rel);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let aside = format!("{}{}", ASIDE_PREFIX, name);
    match path.parent() {
        Some(parent) => parent.join(aside),
        None => PathBuf::from(aside),
    }
}

/// Rename `root/rel` to its aside name; safe to run more than once
pub fn rename_aside(root: &Path, rel: &str) -> Result<RenameOutcome> {
    let original = root.join(rel);
    let aside = root.join(aside_path(rel));

    let outcome = match (original.exists(), aside.exists()) {
        (false, false) => {
            debug!("Nothing to rename aside at {}", rel);
            RenameOutcome::Missing
        }
        (false, true) => RenameOutcome::AlreadyAside,
        (true, false) => {
            fs::rename(&original, &aside)?;
            RenameOutcome::Renamed
        }
        (true, true) => {
            warn!("Replacing stale {}", aside.display());
            if aside.is_dir() {
                fs::remove_dir_all(&aside)?;
            } else {
                fs::remove_file(&aside)?;
            }
            fs::rename(&original, &aside)?;
            RenameOutcome::Replaced
        }
    };

    Ok(outcome)
}

/// Copy files matching a rule from the source tree; returns the file count
pub fn copy_matching(source_root: &Path, rule: &CopyRule, dest_root: &Path) -> Result<usize> {
    let base = if rule.from.is_empty() {
        source_root.to_path_buf()
    } else {
        source_root.join(&rule.from)
    };
    if !base.is_dir() {
        return Err(Error::PackageError(format!(
            "Copy source directory '{}' does not exist",
            rule.from
        )));
    }

    let pattern = compile(&rule.pattern)?;
    let dest = dest_root.join(&rule.to);
    let mut count = 0;

    for entry in WalkDir::new(&base).min_depth(1) {
        let entry = entry.map_err(|e| {
            Error::PackageError(format!("Failed to walk {}: {}", base.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = relative(&base, entry.path()) else {
            continue;
        };
        let file_name = entry.file_name().to_string_lossy();
        if !pattern.matches_with(&rel, MATCH_OPTIONS) && !pattern.matches(&file_name) {
            continue;
        }

        let target = if rule.keep_path {
            dest.join(&rel)
        } else {
            dest.join(file_name.as_ref())
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), &target)?;
        count += 1;
    }

    debug!("Copied {} file(s) matching {}", count, rule.pattern);
    Ok(count)
}

/// Replace every occurrence of `search` in a file; false if it was absent
pub fn replace_in_file(path: &Path, search: &str, replacement: &str) -> Result<bool> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::IoError(format!("Failed to read {}: {}", path.display(), e))
    })?;
    if !content.contains(search) {
        return Ok(false);
    }
    fs::write(path, content.replace(search, replacement))?;
    Ok(true)
}

/// Replace `search` in an installed file, recognizing an earlier rewrite
///
/// An empty replacement or one already present in the file counts as
/// applied once the pattern is gone. A replacement that contains its own
/// pattern is not applied twice.
pub fn rewrite_installed_file(path: &Path, search: &str, replacement: &str) -> Result<ReplaceOutcome> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::PackageError(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let applied = replacement.is_empty() || content.contains(replacement);

    if applied && replacement.contains(search) {
        return Ok(ReplaceOutcome::AlreadyApplied);
    }
    if content.contains(search) {
        fs::write(path, content.replace(search, replacement))?;
        return Ok(ReplaceOutcome::Replaced);
    }
    if applied {
        Ok(ReplaceOutcome::AlreadyApplied)
    } else {
        Ok(ReplaceOutcome::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionAssignment;
    use crate::settings::Settings;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel.as_bytes()).unwrap();
    }

    #[test]
    fn test_rename_aside_is_idempotent() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "lib/pkgconfig/ucx.pc");

        assert_eq!(
            rename_aside(dir.path(), "lib/pkgconfig").unwrap(),
            RenameOutcome::Renamed
        );
        assert!(dir.path().join("lib/_orig_pkgconfig/ucx.pc").exists());
        assert!(!dir.path().join("lib/pkgconfig").exists());

        assert_eq!(
            rename_aside(dir.path(), "lib/pkgconfig").unwrap(),
            RenameOutcome::AlreadyAside
        );
        assert!(dir.path().join("lib/_orig_pkgconfig/ucx.pc").exists());
    }

    #[test]
    fn test_rename_aside_replaces_stale_copy() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "lib/_orig_cmake/old.cmake");
        touch(dir.path(), "lib/cmake/new.cmake");

        assert_eq!(
            rename_aside(dir.path(), "lib/cmake").unwrap(),
            RenameOutcome::Replaced
        );
        assert!(dir.path().join("lib/_orig_cmake/new.cmake").exists());
        assert!(!dir.path().join("lib/_orig_cmake/old.cmake").exists());
        assert_eq!(
            rename_aside(dir.path(), "share/pkgconfig").unwrap(),
            RenameOutcome::Missing
        );
    }

    #[test]
    fn test_aside_path() {
        assert_eq!(aside_path("lib/pkgconfig"), PathBuf::from("lib/_orig_pkgconfig"));
        assert_eq!(aside_path("cmake"), PathBuf::from("_orig_cmake"));
    }

    #[test]
    fn test_remove_matching() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "lib/libucp.la");
        touch(dir.path(), "lib/ucx/libuct_ib.la");
        touch(dir.path(), "lib/libucp.so");
        touch(dir.path(), "share/doc/ucx/README");
        touch(dir.path(), "share/man/man1/ucx_info.1");

        let removed = remove_matching(
            dir.path(),
            &["**/*.la".to_string(), "share/doc".to_string(), "share/man".to_string()],
        )
        .unwrap();

        assert_eq!(removed.len(), 4);
        assert!(dir.path().join("lib/libucp.so").exists());
        assert!(!dir.path().join("lib/ucx/libuct_ib.la").exists());
        assert!(!dir.path().join("share/doc").exists());

        // Second pass finds nothing
        assert!(remove_matching(dir.path(), &["**/*.la".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn test_copy_matching() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        touch(src.path(), "include/Random123/philox.h");
        touch(src.path(), "include/Random123/features/gccfeatures.h");
        touch(src.path(), "include/Random123/README.txt");
        touch(src.path(), "LICENSE");

        let headers = CopyRule {
            pattern: "*.h".into(),
            from: "include".into(),
            to: "include".into(),
            keep_path: true,
            when: None,
        };
        assert_eq!(copy_matching(src.path(), &headers, dest.path()).unwrap(), 2);
        assert!(dest.path().join("include/Random123/features/gccfeatures.h").exists());

        let license = CopyRule {
            pattern: "LICENSE*".into(),
            from: String::new(),
            to: "licenses".into(),
            keep_path: false,
            when: None,
        };
        assert_eq!(copy_matching(src.path(), &license, dest.path()).unwrap(), 1);
        assert!(dest.path().join("licenses/LICENSE").exists());

        let missing = CopyRule {
            from: "nope".into(),
            ..license
        };
        assert!(copy_matching(src.path(), &missing, dest.path()).is_err());
    }

    #[test]
    fn test_replace_in_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ucx.cmake");
        fs::write(&path, "set(UCX_PREFIX /build/prefix)\n").unwrap();

        assert!(replace_in_file(&path, "/build/prefix", "/opt/ucx").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "set(UCX_PREFIX /opt/ucx)\n");
        assert!(!replace_in_file(&path, "/build/prefix", "/opt/ucx").unwrap());
    }

    #[test]
    fn test_apply_section() {
        let src = TempDir::new().unwrap();
        let pkg = TempDir::new().unwrap();
        touch(src.path(), "COPYING");
        touch(pkg.path(), "lib/libmunge.la");
        touch(pkg.path(), "lib/pkgconfig/munge.pc");
        fs::write(pkg.path().join("lib/munge.cmake"), "prefix=@PREFIX@").unwrap();

        let section: PackagingSection = toml::from_str(
            r#"
copy = [{ pattern = "COPYING", to = "licenses" }]
remove = ["**/*.la"]
rename_aside = ["lib/pkgconfig"]
replace = [{ file = "lib/munge.cmake", search = "@PREFIX@", replace = "%(package_folder)s" }]
"#,
        )
        .unwrap();

        let options = OptionAssignment::default();
        let settings = Settings::host();
        let ctx = EvalContext {
            options: &options,
            settings: &settings,
            capabilities: None,
        };
        let report = section.apply(src.path(), pkg.path(), &ctx).unwrap();

        assert_eq!(report.copied, 1);
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.renamed[0].1, RenameOutcome::Renamed);
        let cmake = fs::read_to_string(pkg.path().join("lib/munge.cmake")).unwrap();
        assert_eq!(cmake, format!("prefix={}", pkg.path().display()));

        // A second pass over the normalized tree changes nothing
        let again = section.apply(src.path(), pkg.path(), &ctx).unwrap();
        assert_eq!(again.renamed[0].1, RenameOutcome::AlreadyAside);
        assert!(again.replaced.is_empty());
        assert_eq!(again.already_replaced, vec!["lib/munge.cmake"]);
        assert_eq!(
            fs::read_to_string(pkg.path().join("lib/munge.cmake")).unwrap(),
            cmake
        );
    }

    #[test]
    fn test_rewrite_installed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("upcxx-meta");
        fs::write(&path, "CPPFLAGS=-I/build/include\nLIBS=-lupcxx\n").unwrap();

        assert_eq!(
            rewrite_installed_file(&path, "/build/include", "/opt/upcxx/include").unwrap(),
            ReplaceOutcome::Replaced
        );
        assert_eq!(
            rewrite_installed_file(&path, "/build/include", "/opt/upcxx/include").unwrap(),
            ReplaceOutcome::AlreadyApplied
        );

        // Replacement containing its own pattern is applied once
        assert_eq!(
            rewrite_installed_file(&path, "-lupcxx", "-lupcxx -lpthread").unwrap(),
            ReplaceOutcome::Replaced
        );
        assert_eq!(
            rewrite_installed_file(&path, "-lupcxx", "-lupcxx -lpthread").unwrap(),
            ReplaceOutcome::AlreadyApplied
        );
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "CPPFLAGS=-I/opt/upcxx/include\nLIBS=-lupcxx -lpthread\n"
        );

        // Neither the pattern nor the replacement: the file is not what the rule expects
        assert_eq!(
            rewrite_installed_file(&path, "@PREFIX@", "/srv/upcxx").unwrap(),
            ReplaceOutcome::NotFound
        );
        assert!(rewrite_installed_file(&dir.path().join("missing"), "a", "b").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_matching_reports_walk_errors() {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        touch(src.path(), "docs/LICENSE");
        let locked = src.path().join("docs");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Permission bits do not stop root
        let readable = fs::read_dir(&locked).is_ok();

        let rule = CopyRule {
            pattern: "LICENSE".into(),
            from: String::new(),
            to: "licenses".into(),
            keep_path: false,
            when: None,
        };
        let result = copy_matching(src.path(), &rule, dest.path());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        if readable {
            assert_eq!(result.unwrap(), 1);
        } else {
            assert!(matches!(result, Err(Error::PackageError(_))));
        }
    }
}
