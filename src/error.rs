// src/error.rs

//! Error types for recipe evaluation
//!
//! Every failure maps to one of the four evaluation phases so operators can
//! tell "did not configure" from "did not compile" from "compiled but did not
//! produce the expected output".

use strum_macros::Display;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while evaluating a recipe
#[derive(Error, Debug)]
pub enum Error {
    /// Fetching, verifying, unpacking or patching sources failed
    #[error("Source error: {0}")]
    SourceError(String),

    /// A downloaded or cached file did not match its pinned checksum
    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    /// Option or dependency resolution failed before any build started
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The native build tool exited unsuccessfully
    #[error("{phase} phase failed with exit code {}\n{stderr}", describe_code(.code))]
    BuildError {
        phase: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The build succeeded but the install tree is not what the recipe exports
    #[error("Packaging error: {0}")]
    PackageError(String),

    /// Recipe or metadata could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A file, package or recipe was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Filesystem or process I/O failure
    #[error("I/O error: {0}")]
    IoError(String),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "none (terminated by signal or failed to spawn)".to_string(),
    }
}

/// Evaluation phase an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Source,
    Configure,
    Build,
    Package,
    Other,
}

impl Error {
    /// The phase that produced this error
    pub fn phase(&self) -> Phase {
        match self {
            Self::SourceError(_) | Self::ChecksumMismatch { .. } => Phase::Source,
            Self::ConfigError(_) | Self::ParseError(_) => Phase::Configure,
            Self::BuildError { .. } => Phase::Build,
            Self::PackageError(_) => Phase::Package,
            Self::NotFound(_) | Self::IoError(_) => Phase::Other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ParseError(e.to_string())
    }
}
