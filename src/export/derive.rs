// src/export/derive.rs

//! Link information read back from the installed tree
//!
//! Some packages know their own flags better than a recipe can spell them
//! out: openpmix installs `pmix.pc`, and upcxx ships `upcxx-meta`, which
//! prints different flags per network backend. A [`FlagSource`] on an
//! export declaration is consulted after packaging, and what it reports is
//! merged in front of the declared lists.

use super::{CppInfo, library_present};
use crate::build::{CommandRunner, CommandSpec};
use crate::deps::pkgconfig::PcFile;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

fn default_pc_dir() -> String {
    "lib/pkgconfig".to_string()
}

/// Where an export declaration reads its flags from
///
/// ```toml
/// flags_from = { pkg_config = { name = "pmix", system_libs = ["m"] } }
/// flags_from = { command = { program = "bin/upcxx-meta", cflags = "CPPFLAGS", libs = "LIBS" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSource {
    /// An installed `.pc` file, relative to the package folder
    PkgConfig {
        name: String,
        #[serde(default = "default_pc_dir")]
        dir: String,
        #[serde(default)]
        system_libs: Vec<String>,
    },
    /// A program in the package folder, run once for compile and once for link flags
    Command {
        program: String,
        cflags: String,
        libs: String,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        system_libs: Vec<String>,
    },
}

/// Flags reported by a [`FlagSource`], split by kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedFlags {
    pub libs: Vec<String>,
    pub libdirs: Vec<String>,
    pub includedirs: Vec<String>,
    pub defines: Vec<String>,
}

impl DerivedFlags {
    /// Sort compiler and linker tokens; paths inside `folder` become relative
    pub fn from_tokens<S: AsRef<str>>(folder: &Path, tokens: &[S]) -> Self {
        let mut flags = DerivedFlags::default();
        let mut iter = tokens.iter().map(AsRef::as_ref);

        while let Some(token) = iter.next() {
            let (kind, value) = match token.get(..2) {
                Some(kind @ ("-I" | "-L" | "-l" | "-D")) if token.len() > 2 => (kind, &token[2..]),
                Some(kind @ ("-I" | "-L" | "-l" | "-D")) => match iter.next() {
                    Some(next) => (kind, next),
                    None => break,
                },
                _ if token == "-pthread" => ("-l", "pthread"),
                _ => {
                    debug!("Ignoring flag '{}'", token);
                    continue;
                }
            };
            let list = match kind {
                "-I" => &mut flags.includedirs,
                "-L" => &mut flags.libdirs,
                "-l" => &mut flags.libs,
                _ => &mut flags.defines,
            };
            let value = match kind {
                "-I" | "-L" => relative_to(folder, value),
                _ => value.to_string(),
            };
            if !list.contains(&value) {
                list.push(value);
            }
        }

        flags
    }
}

fn relative_to(folder: &Path, path: &str) -> String {
    match Path::new(path).strip_prefix(folder) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.display().to_string(),
        Err(_) => path.to_string(),
    }
}

impl FlagSource {
    /// Read the flags for a package installed at `folder`
    pub fn read(&self, folder: &Path, runner: &dyn CommandRunner) -> Result<DerivedFlags> {
        let tokens = match self {
            FlagSource::PkgConfig { name, dir, .. } => {
                let path = folder.join(dir).join(format!("{}.pc", name));
                debug!("Reading flags from {}", path.display());
                let pc = PcFile::load(&path)?;
                let mut tokens = pc.flags("Cflags");
                tokens.extend(pc.flags("Libs"));
                tokens
            }
            FlagSource::Command {
                program,
                cflags,
                libs,
                env,
                ..
            } => {
                let program = folder.join(program).display().to_string();
                let mut tokens = Vec::new();
                for query in [cflags, libs] {
                    let spec = CommandSpec::new("package", &program, folder)
                        .arg(query.as_str())
                        .envs(env);
                    let output = runner.run(&spec).map_err(|e| {
                        Error::PackageError(format!("{} {} failed: {}", program, query, e))
                    })?;
                    tokens.extend(output.stdout.split_whitespace().map(str::to_string));
                }
                tokens
            }
        };
        Ok(DerivedFlags::from_tokens(folder, &tokens))
    }

    fn system_libs(&self) -> &[String] {
        match self {
            FlagSource::PkgConfig { system_libs, .. } | FlagSource::Command { system_libs, .. } => {
                system_libs
            }
        }
    }

    /// Merge what this source reports into `info`, ahead of the declared entries
    ///
    /// A `-l` is a package library when it is found under one of the
    /// libdirs; anything else, or anything listed in `system_libs`, is a
    /// system library.
    pub fn apply(&self, folder: &Path, runner: &dyn CommandRunner, info: &mut CppInfo) -> Result<()> {
        let derived = self.read(folder, runner)?;

        info.libdirs = merged(&derived.libdirs, &info.libdirs);
        info.includedirs = merged(&derived.includedirs, &info.includedirs);
        info.defines = merged(&derived.defines, &info.defines);

        let (system, own): (Vec<String>, Vec<String>) = derived.libs.into_iter().partition(|lib| {
            self.system_libs().contains(lib) || !library_present(folder, &info.libdirs, lib)
        });
        info.libs = merged(&own, &info.libs);
        info.system_libs = merged(&system, &info.system_libs);
        Ok(())
    }
}

fn merged(first: &[String], then: &[String]) -> Vec<String> {
    let mut out = first.to_vec();
    for item in then {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}
