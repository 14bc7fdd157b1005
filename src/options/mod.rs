// src/options/mod.rs

//! Option schema and resolution
//!
//! A recipe declares a closed set of options, each with a finite domain and
//! a default. Resolution applies user overrides, then removes options that
//! do not apply to the target platform (`fPIC` on Windows, or any option
//! whose `remove_when` condition holds). Removed options are absent from
//! the assignment; they are never set to a sentinel value.

mod condition;

pub use condition::{CapabilityLookup, Condition, EvalContext};

use crate::error::{Error, Result};
use crate::settings::{Os, SETTING_KEYS, Settings};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Name of the position-independent-code option, removed on Windows
pub const FPIC: &str = "fPIC";

/// A single option value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Str(String),
}

impl OptionValue {
    /// Truthiness used by flag conditions
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Str(s) => !matches!(
                s.to_ascii_lowercase().as_str(),
                "" | "false" | "no" | "off" | "0"
            ),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Str(_) => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// The finite set of values an option may take
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionDomain {
    /// Boolean option; a subset such as `[true]` pins it
    Bool(Vec<bool>),
    /// Closed string enumeration
    Enum(Vec<String>),
}

impl OptionDomain {
    pub fn contains(&self, value: &OptionValue) -> bool {
        match (self, value) {
            (Self::Bool(allowed), OptionValue::Bool(b)) => allowed.contains(b),
            (Self::Enum(allowed), OptionValue::Str(s)) => allowed.contains(s),
            _ => false,
        }
    }

    /// Parse a command-line value against this domain
    pub fn parse_value(&self, raw: &str) -> Option<OptionValue> {
        let value = match self {
            Self::Bool(_) => OptionValue::Bool(parse_bool(raw)?),
            Self::Enum(_) => OptionValue::Str(raw.trim().to_string()),
        };
        self.contains(&value).then_some(value)
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Bool(allowed) => format!("{:?}", allowed),
            Self::Enum(allowed) => format!("{:?}", allowed),
        }
    }
}

/// Option declaration as written in a recipe
///
/// ```toml
/// [options]
/// shared = { values = [true, false], default = false }
/// fPIC = { values = [true, false], default = true, remove_when = "shared" }
/// pmi-version = { values = ["x", "1", "2"], default = "x" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionDecl {
    pub values: Vec<OptionValue>,
    pub default: OptionValue,
    #[serde(default)]
    pub remove_when: Option<Condition>,
}

/// A validated option
#[derive(Debug, Clone)]
pub struct OptionEntry {
    pub domain: OptionDomain,
    pub default: OptionValue,
    pub remove_when: Option<Condition>,
}

/// All options a recipe declares
#[derive(Debug, Clone, Default)]
pub struct OptionSchema {
    entries: BTreeMap<String, OptionEntry>,
}

impl OptionSchema {
    /// Build a schema from recipe declarations, checking domains and defaults
    pub fn from_decls(decls: &BTreeMap<String, OptionDecl>) -> Result<Self> {
        let mut entries = BTreeMap::new();

        for (name, decl) in decls {
            if SETTING_KEYS.contains(&name.as_str()) || name.starts_with("cap:") {
                return Err(Error::ConfigError(format!(
                    "Option name '{}' is reserved",
                    name
                )));
            }
            if decl.values.is_empty() {
                return Err(Error::ConfigError(format!(
                    "Option '{}' declares no values",
                    name
                )));
            }

            let domain = if decl.values.iter().all(|v| matches!(v, OptionValue::Bool(_))) {
                OptionDomain::Bool(decl.values.iter().filter_map(OptionValue::as_bool).collect())
            } else if decl.values.iter().all(|v| matches!(v, OptionValue::Str(_))) {
                OptionDomain::Enum(decl.values.iter().map(|v| v.to_string()).collect())
            } else {
                return Err(Error::ConfigError(format!(
                    "Option '{}' mixes boolean and string values",
                    name
                )));
            };

            if !domain.contains(&decl.default) {
                return Err(Error::ConfigError(format!(
                    "Default '{}' of option '{}' is not in {}",
                    decl.default,
                    name,
                    domain.describe()
                )));
            }

            entries.insert(
                name.clone(),
                OptionEntry {
                    domain,
                    default: decl.default.clone(),
                    remove_when: decl.remove_when.clone(),
                },
            );
        }

        Ok(Self { entries })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&OptionEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reduce defaults plus overrides into a platform-valid assignment
    pub fn resolve(
        &self,
        overrides: &[OptionOverride],
        settings: &Settings,
    ) -> Result<OptionAssignment> {
        let mut values: BTreeMap<String, OptionValue> = self
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.default.clone()))
            .collect();
        let mut overridden = BTreeSet::new();

        for ov in overrides {
            let entry = self.entries.get(&ov.name).ok_or_else(|| {
                Error::ConfigError(format!(
                    "Unknown option '{}' (declared: {})",
                    ov.name,
                    self.entries.keys().cloned().collect::<Vec<_>>().join(", ")
                ))
            })?;
            let value = entry.domain.parse_value(&ov.value).ok_or_else(|| {
                Error::ConfigError(format!(
                    "Invalid value '{}' for option '{}' (allowed: {})",
                    ov.value,
                    ov.name,
                    entry.domain.describe()
                ))
            })?;
            debug!("Option override {}={}", ov.name, value);
            values.insert(ov.name.clone(), value);
            overridden.insert(ov.name.clone());
        }

        // Removal conditions see the assignment before anything is removed
        let before = OptionAssignment::from_values(values.clone());
        let ctx = EvalContext {
            options: &before,
            settings,
            capabilities: None,
        };

        let mut removed = BTreeSet::new();
        for (name, entry) in &self.entries {
            let platform = name == FPIC && settings.os == Os::Windows;
            let conditional = match &entry.remove_when {
                Some(cond) => cond.eval(&ctx)?,
                None => false,
            };
            if platform || conditional {
                if overridden.contains(name) {
                    warn!(
                        "Option '{}' does not apply to this configuration; override ignored",
                        name
                    );
                }
                debug!("Removing option '{}'", name);
                removed.insert(name.clone());
            }
        }

        for name in &removed {
            values.remove(name);
        }

        Ok(OptionAssignment { values, removed })
    }
}

/// A total assignment over the schema minus removed options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionAssignment {
    values: BTreeMap<String, OptionValue>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    removed: BTreeSet<String>,
}

impl OptionAssignment {
    pub fn from_values(values: BTreeMap<String, OptionValue>) -> Self {
        Self {
            values,
            removed: BTreeSet::new(),
        }
    }

    pub fn mark_removed(&mut self, name: &str) {
        self.values.remove(name);
        self.removed.insert(name.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    /// Truthiness of an option; removed or missing options are false
    pub fn get_bool(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(OptionValue::is_truthy)
    }

    pub fn is_removed(&self, name: &str) -> bool {
        self.removed.contains(name)
    }

    pub fn values(&self) -> &BTreeMap<String, OptionValue> {
        &self.values
    }

    pub fn removed(&self) -> impl Iterator<Item = &str> {
        self.removed.iter().map(String::as_str)
    }
}

impl fmt::Display for OptionAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// A list entry that applies only when its condition holds
///
/// ```toml
/// libs = ["ucp", { value = "ucm_cuda", when = "cuda" }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CondItem<T> {
    Plain(T),
    When { value: T, when: Condition },
}

impl<T> CondItem<T> {
    pub fn value(&self) -> &T {
        match self {
            Self::Plain(v) | Self::When { value: v, .. } => v,
        }
    }

    pub fn condition(&self) -> Option<&Condition> {
        match self {
            Self::Plain(_) => None,
            Self::When { when, .. } => Some(when),
        }
    }

    pub fn applies(&self, ctx: &EvalContext<'_>) -> Result<bool> {
        match self.condition() {
            Some(cond) => cond.eval(ctx),
            None => Ok(true),
        }
    }
}

/// Keep the values of the entries whose conditions hold, in order
pub fn select<T: Clone>(items: &[CondItem<T>], ctx: &EvalContext<'_>) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if item.applies(ctx)? {
            out.push(item.value().clone());
        }
    }
    Ok(out)
}

/// A user override from the command line (`-o name=value`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionOverride {
    pub name: String,
    pub value: String,
}

impl FromStr for OptionOverride {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, value) = s.split_once('=').ok_or_else(|| {
            Error::ConfigError(format!("Invalid option override '{}': expected name=value", s))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::ConfigError(format!(
                "Invalid option override '{}': empty name",
                s
            )));
        }
        Ok(Self {
            name: name.to_string(),
            value: value.trim().to_string(),
        })
    }
}
