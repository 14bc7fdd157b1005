// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use larder::build::{CommandOutput, CommandRunner, CommandSpec};
use larder::hash::sha256_file;
use larder::settings::{Os, Settings};
use larder::{Error, Result};
use std::cell::RefCell;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Records every command and pretends it succeeded
///
/// On the `install` phase the files in `installs` are created below the
/// `PREFIX` the build environment points at, standing in for `make install`.
/// Files in `contents` are written too, with `@PREFIX@` replaced.
#[derive(Default)]
pub struct FakeRunner {
    pub calls: RefCell<Vec<CommandSpec>>,
    pub fail_phase: Option<String>,
    pub installs: Vec<String>,
    pub contents: Vec<(String, String)>,
}

impl FakeRunner {
    pub fn installing(files: &[&str]) -> Self {
        Self {
            installs: files.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, rel: &str, content: &str) -> Self {
        self.contents.push((rel.to_string(), content.to_string()));
        self
    }

    pub fn failing(phase: &str) -> Self {
        Self {
            fail_phase: Some(phase.to_string()),
            ..Default::default()
        }
    }

    pub fn phases(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.phase.clone()).collect()
    }

    pub fn call(&self, phase: &str) -> Option<CommandSpec> {
        self.calls.borrow().iter().find(|c| c.phase == phase).cloned()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(spec.clone());

        if self.fail_phase.as_deref() == Some(spec.phase.as_str()) {
            return Err(Error::BuildError {
                phase: spec.phase.clone(),
                code: Some(1),
                stdout: String::new(),
                stderr: "configure: error: simulated failure".to_string(),
            });
        }

        if spec.phase == "install" {
            if let Some(prefix) = spec.env.get("PREFIX") {
                for rel in &self.installs {
                    let path = Path::new(prefix).join(rel);
                    fs::create_dir_all(path.parent().unwrap()).unwrap();
                    fs::write(&path, b"").unwrap();
                }
                for (rel, content) in &self.contents {
                    let path = Path::new(prefix).join(rel);
                    fs::create_dir_all(path.parent().unwrap()).unwrap();
                    fs::write(&path, content.replace("@PREFIX@", prefix)).unwrap();
                }
            }
        }

        Ok(CommandOutput {
            stdout: format!("ran {}", spec.program),
            stderr: String::new(),
        })
    }

    fn locate(&self, _program: &str) -> Option<PathBuf> {
        None
    }
}

/// A shared [`FakeRunner`] that can be handed to a kitchen and inspected later
pub struct SharedRunner(pub std::rc::Rc<FakeRunner>);

impl CommandRunner for SharedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.0.run(spec)
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.0.locate(program)
    }
}

/// Write `<dir>/<name>.tar.gz` with every file below a `<name>/` root
///
/// Returns the archive's `file://` URL and its sha256.
pub fn make_tarball(dir: &Path, name: &str, files: &[(&str, &str)]) -> (String, String) {
    let path = dir.join(format!("{}.tar.gz", name));
    let file = File::create(&path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    for (rel, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{}/{}", name, rel), content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();

    let sha = sha256_file(&path).unwrap();
    (format!("file://{}", path.display()), sha)
}

pub fn linux() -> Settings {
    Settings {
        os: Os::Linux,
        arch: "x86_64".to_string(),
        build_type: Default::default(),
    }
}

/// Root of the demo recipes shipped with the repository
pub fn recipes_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("recipes")
}
