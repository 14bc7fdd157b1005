// src/source/mod.rs

//! Source acquisition: pinned archives and git checkouts
//!
//! Every source is pinned. Archives carry a sha256 and are verified every
//! time they are taken from the cache; git sources name a tag or a commit.
//! After unpacking, recipe patches and literal text replacements are
//! applied in declaration order.

mod archive;

pub use archive::{ArchiveFormat, extract_archive, single_root};

use crate::build::runner::{CommandRunner, CommandSpec};
use crate::error::{Error, Result};
use crate::hash::{HashAlgorithm, hash_bytes, is_valid_digest, verify_file_sha256};
use crate::export::layout::replace_in_file;
use crate::options::{Condition, EvalContext};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Timeout for a single source download
const HTTP_TIMEOUT: Duration = Duration::from_secs(600);

/// Where the sources of one version come from
///
/// ```toml
/// [sources."0.5.15"]
/// url = "https://github.com/dun/munge/releases/download/munge-0.5.15/munge-0.5.15.tar.xz"
/// sha256 = "3f979df117a34c74db8fe2835521044bdeb08e3b7d6b9d6ef5b2f9fb8a65a6ff"
///
/// [sources."61.0"]
/// git = "https://github.com/linux-rdma/rdma-core.git"
/// tag = "v61.0"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceSpec {
    Archive {
        url: String,
        #[serde(default)]
        sha256: Option<String>,
        /// Drop the top-level directory; detected automatically when unset
        #[serde(default)]
        strip_root: Option<bool>,
    },
    Git {
        git: String,
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        commit: Option<String>,
        #[serde(default)]
        submodules: bool,
    },
}

impl SourceSpec {
    /// Reject sources that are not pinned to exact content
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Archive { url, sha256, .. } => {
                let sha = sha256.as_deref().ok_or_else(|| {
                    Error::ParseError(format!("Source {} has no sha256 pin", url))
                })?;
                if !is_valid_digest(HashAlgorithm::Sha256, sha) {
                    return Err(Error::ParseError(format!(
                        "Source {} has a malformed sha256: {}",
                        url, sha
                    )));
                }
                if ArchiveFormat::from_name(url_file_name(url)).is_none() {
                    return Err(Error::ParseError(format!(
                        "Source {} is not a supported archive",
                        url
                    )));
                }
            }
            Self::Git { git, tag, commit, .. } => match (tag, commit) {
                (None, None) => {
                    return Err(Error::ParseError(format!(
                        "Git source {} must pin a tag or a commit",
                        git
                    )));
                }
                (Some(_), Some(_)) => {
                    return Err(Error::ParseError(format!(
                        "Git source {} pins both a tag and a commit",
                        git
                    )));
                }
                _ => {}
            },
        }
        Ok(())
    }

    pub fn location(&self) -> &str {
        match self {
            Self::Archive { url, .. } => url,
            Self::Git { git, .. } => git,
        }
    }

    /// Apply `%(name)s`-style substitution to the location
    pub fn substituted(&self, subst: impl Fn(&str) -> String) -> Self {
        match self.clone() {
            Self::Archive { url, sha256, strip_root } => Self::Archive {
                url: subst(&url),
                sha256,
                strip_root,
            },
            Self::Git { git, tag, commit, submodules } => Self::Git {
                git: subst(&git),
                tag: tag.map(|t| subst(&t)),
                commit,
                submodules,
            },
        }
    }
}

fn url_file_name(url: &str) -> &str {
    url.split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or(url)
}

/// A patch file shipped next to the recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSpec {
    /// Path relative to the recipe directory
    pub file: String,
    #[serde(default = "default_strip")]
    pub strip: u32,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_strip() -> u32 {
    1
}

/// Literal text replacement applied to the unpacked sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReplace {
    pub file: String,
    pub search: String,
    pub replace: String,
    #[serde(default)]
    pub when: Option<Condition>,
}

/// Downloads, caches and unpacks sources
pub struct SourceFetcher<'a> {
    cache_dir: PathBuf,
    runner: &'a dyn CommandRunner,
}

impl<'a> SourceFetcher<'a> {
    pub fn new(cache_dir: impl Into<PathBuf>, runner: &'a dyn CommandRunner) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            runner,
        }
    }

    /// Cache location of a URL; the key is a hash of the URL only
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let key = hash_bytes(HashAlgorithm::Xxh128, url.as_bytes());
        self.cache_dir.join(key).join(url_file_name(url))
    }

    /// Fetch `spec` and lay out the sources in `dest`
    pub fn fetch(&self, spec: &SourceSpec, dest: &Path) -> Result<()> {
        spec.validate().map_err(|e| Error::SourceError(e.to_string()))?;

        match spec {
            SourceSpec::Archive { url, sha256, strip_root } => {
                let sha = sha256.as_deref().unwrap_or_default();
                let archive = self.download(url, sha)?;
                let strip = match strip_root {
                    Some(true) => 1,
                    Some(false) => 0,
                    None => usize::from(single_root(&archive)?.is_some()),
                };
                extract_archive(&archive, dest, strip)?;
                info!("Unpacked {} into {}", url_file_name(url), dest.display());
            }
            SourceSpec::Git { git, tag, commit, submodules } => {
                self.clone_git(git, tag.as_deref(), commit.as_deref(), *submodules, dest)?;
            }
        }

        Ok(())
    }

    /// Return a verified cached copy of `url`, downloading it if needed
    ///
    /// Each download goes to its own temporary file in the cache directory
    /// and is only renamed into place once its checksum matches, so cooks
    /// sharing a cache never see a partial file.
    pub fn download(&self, url: &str, sha256: &str) -> Result<PathBuf> {
        let cached = self.cache_path(url);

        if cached.is_file() {
            match verify_file_sha256(&cached, sha256, url) {
                Ok(()) => {
                    debug!("Using cached source {}", cached.display());
                    return Ok(cached);
                }
                Err(e) => {
                    warn!("Discarding cached {}: {}", cached.display(), e);
                    if let Err(e) = fs::remove_file(&cached) {
                        if e.kind() != io::ErrorKind::NotFound {
                            return Err(e.into());
                        }
                    }
                }
            }
        }

        let dir = cached.parent().unwrap_or(&self.cache_dir);
        fs::create_dir_all(dir)?;
        let mut partial = NamedTempFile::with_prefix_in(".download-", dir).map_err(|e| {
            Error::IoError(format!("Failed to create download file in {}: {}", dir.display(), e))
        })?;

        info!("Downloading {}", url);
        self.transfer(url, partial.as_file_mut())?;
        verify_file_sha256(partial.path(), sha256, url)?;

        partial.persist(&cached).map_err(|e| {
            Error::IoError(format!("Failed to store {}: {}", cached.display(), e.error))
        })?;
        Ok(cached)
    }

    fn transfer(&self, url: &str, dest: &mut File) -> Result<()> {
        if let Some(path) = url.strip_prefix("file://") {
            let mut src = File::open(path)
                .map_err(|e| Error::SourceError(format!("Failed to open {}: {}", url, e)))?;
            io::copy(&mut src, dest)
                .map_err(|e| Error::SourceError(format!("Failed to copy {}: {}", url, e)))?;
            return Ok(());
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::SourceError(format!("Failed to create HTTP client: {}", e)))?;
        let mut response = client
            .get(url)
            .send()
            .map_err(|e| Error::SourceError(format!("Failed to fetch {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(Error::SourceError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        io::copy(&mut response, dest)
            .map_err(|e| Error::SourceError(format!("Failed to download {}: {}", url, e)))?;
        Ok(())
    }

    fn clone_git(
        &self,
        url: &str,
        tag: Option<&str>,
        commit: Option<&str>,
        submodules: bool,
        dest: &Path,
    ) -> Result<()> {
        let parent = dest.parent().unwrap_or(dest);
        fs::create_dir_all(parent)?;
        let dest_str = dest.display().to_string();

        match (tag, commit) {
            (Some(tag), _) => {
                let mut clone = CommandSpec::new("source", "git", parent)
                    .args(["clone", "--depth", "1", "--branch", tag]);
                if submodules {
                    clone = clone.args(["--recurse-submodules", "--shallow-submodules"]);
                }
                self.run(clone.args([url, dest_str.as_str()]))?;
                info!("Cloned {} at {}", url, tag);
            }
            (None, Some(commit)) => {
                self.run(CommandSpec::new("source", "git", parent).args([
                    "clone",
                    "--no-checkout",
                    url,
                    dest_str.as_str(),
                ]))?;
                self.run(CommandSpec::new("source", "git", dest).args(["checkout", commit]))?;
                if submodules {
                    self.run(CommandSpec::new("source", "git", dest).args([
                        "submodule",
                        "update",
                        "--init",
                        "--recursive",
                    ]))?;
                }
                info!("Cloned {} at {}", url, commit);
            }
            (None, None) => {
                return Err(Error::SourceError(format!("Git source {} is not pinned", url)));
            }
        }

        Ok(())
    }

    fn run(&self, spec: CommandSpec) -> Result<()> {
        run_source_step(self.runner, &spec)
    }
}

/// Run a command whose failure is a source error rather than a build error
fn run_source_step(runner: &dyn CommandRunner, spec: &CommandSpec) -> Result<()> {
    match runner.run(spec) {
        Ok(_) => Ok(()),
        Err(Error::BuildError { code, stderr, .. }) => Err(Error::SourceError(format!(
            "`{}` failed (exit code {:?}): {}",
            spec,
            code,
            stderr.trim()
        ))),
        Err(e) => Err(e),
    }
}

/// Apply patches in order with `patch -p<strip>`
pub fn apply_patches(
    runner: &dyn CommandRunner,
    patches: &[PatchSpec],
    recipe_dir: &Path,
    source_dir: &Path,
) -> Result<()> {
    for patch in patches {
        let path = recipe_dir.join(&patch.file);
        if !path.is_file() {
            return Err(Error::SourceError(format!(
                "Patch file not found: {}",
                path.display()
            )));
        }

        info!(
            "Applying patch {}{}",
            patch.file,
            patch
                .description
                .as_deref()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default()
        );
        let spec = CommandSpec::new("source", "patch", source_dir)
            .arg(format!("-p{}", patch.strip))
            .args(["--batch", "-i"])
            .arg(path.display().to_string());
        run_source_step(runner, &spec)?;
    }
    Ok(())
}

/// Apply literal text replacements whose conditions hold
pub fn apply_replacements(
    replacements: &[SourceReplace],
    source_dir: &Path,
    ctx: &EvalContext<'_>,
) -> Result<usize> {
    let mut applied = 0;
    for rule in replacements {
        if let Some(cond) = &rule.when {
            if !cond.eval(ctx)? {
                continue;
            }
        }
        let path = source_dir.join(&rule.file);
        let found = replace_in_file(&path, &rule.search, &rule.replace)
            .map_err(|e| Error::SourceError(e.to_string()))?;
        if !found {
            return Err(Error::SourceError(format!(
                "Pattern '{}' not found in {}",
                rule.search, rule.file
            )));
        }
        debug!("Replaced '{}' in {}", rule.search, rule.file);
        applied += 1;
    }
    Ok(applied)
}
