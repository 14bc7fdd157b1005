// src/settings.rs

//! Platform settings a recipe is evaluated for
//!
//! Settings are not options: recipes cannot declare them, but conditions
//! can test them (`os=Linux|FreeBSD`) and they take part in the package id.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// Target operating system
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Os {
    Linux,
    FreeBSD,
    Macos,
    Windows,
}

impl Os {
    /// The operating system this binary was compiled for
    pub fn host() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::Macos
        } else if cfg!(target_os = "freebsd") {
            Self::FreeBSD
        } else {
            Self::Linux
        }
    }
}

/// CMake-style build type
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum BuildType {
    #[default]
    Release,
    Debug,
    RelWithDebInfo,
    MinSizeRel,
}

impl BuildType {
    /// Compiler flags autotools-style builds get for this build type
    pub fn cflags(&self) -> &'static str {
        match self {
            Self::Release => "-O3",
            Self::Debug => "-g -O0",
            Self::RelWithDebInfo => "-O2 -g",
            Self::MinSizeRel => "-Os",
        }
    }
}

/// The (os, arch, build_type) tuple a recipe is evaluated for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Settings {
    pub os: Os,
    pub arch: String,
    #[serde(default)]
    pub build_type: BuildType,
}

/// Setting keys usable in conditions; options may not reuse them
pub const SETTING_KEYS: [&str; 3] = ["os", "arch", "build_type"];

impl Settings {
    /// Settings describing the machine we are running on
    pub fn host() -> Self {
        Self {
            os: Os::host(),
            arch: std::env::consts::ARCH.to_string(),
            build_type: BuildType::Release,
        }
    }

    /// Look up a setting by key, rendered as a string
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "os" => Some(self.os.to_string()),
            "arch" => Some(self.arch.clone()),
            "build_type" => Some(self.build_type.to_string()),
            _ => None,
        }
    }

    /// Apply a `key=value` override
    pub fn apply(&mut self, assignment: &str) -> Result<()> {
        let (key, value) = assignment.split_once('=').ok_or_else(|| {
            Error::ConfigError(format!(
                "Invalid setting '{}': expected key=value",
                assignment
            ))
        })?;
        let value = value.trim();

        match key.trim() {
            "os" => {
                self.os = Os::from_str(value)
                    .map_err(|_| Error::ConfigError(format!("Unknown os: {}", value)))?;
            }
            "arch" => {
                if value.is_empty() {
                    return Err(Error::ConfigError("arch cannot be empty".to_string()));
                }
                self.arch = value.to_string();
            }
            "build_type" => {
                self.build_type = BuildType::from_str(value)
                    .map_err(|_| Error::ConfigError(format!("Unknown build_type: {}", value)))?;
            }
            other => {
                return Err(Error::ConfigError(format!(
                    "Unknown setting '{}' (expected one of: {})",
                    other,
                    SETTING_KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.os, self.arch, self.build_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_settings() {
        let mut settings = Settings::host();
        settings.apply("os=windows").unwrap();
        settings.apply("arch=aarch64").unwrap();
        settings.apply("build_type=Debug").unwrap();

        assert_eq!(settings.os, Os::Windows);
        assert_eq!(settings.get("os").as_deref(), Some("Windows"));
        assert_eq!(settings.get("arch").as_deref(), Some("aarch64"));
        assert_eq!(settings.build_type, BuildType::Debug);
        assert_eq!(settings.get("compiler"), None);
    }

    #[test]
    fn test_apply_rejects_bad_input() {
        let mut settings = Settings::host();
        assert!(settings.apply("os").is_err());
        assert!(settings.apply("os=Plan9").is_err());
        assert!(settings.apply("compiler=gcc").is_err());
        assert!(settings.apply("arch=").is_err());
    }

    #[test]
    fn test_os_names() {
        assert_eq!(Os::FreeBSD.to_string(), "FreeBSD");
        assert_eq!(Os::from_str("freebsd").unwrap(), Os::FreeBSD);
        assert_eq!(BuildType::Release.cflags(), "-O3");
    }
}
