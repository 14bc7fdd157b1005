// src/options/condition.rs

//! Conditions gating requirements, capabilities and exports
//!
//! Syntax is a comma-separated conjunction of terms:
//!
//! - `rdma` / `!rdma`: boolean option is on / off (removed options are off)
//! - `pmi-version=1|2` / `pmi-version!=x`: option or setting comparison
//! - `os=Linux|FreeBSD`: setting comparison (`os`, `arch`, `build_type`)
//! - `cap:cuda` / `!cap:cuda`: capability state after translation

use crate::error::{Error, Result};
use crate::options::OptionAssignment;
use crate::settings::{SETTING_KEYS, Settings};
use std::fmt;
use std::str::FromStr;

/// Lookup of resolved capability states
pub trait CapabilityLookup {
    /// `Some(enabled)` for a declared capability, `None` if unknown
    fn capability_enabled(&self, name: &str) -> Option<bool>;
}

/// Everything a condition can be evaluated against
pub struct EvalContext<'a> {
    pub options: &'a OptionAssignment,
    pub settings: &'a Settings,
    /// Only available once capabilities are translated
    pub capabilities: Option<&'a dyn CapabilityLookup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Flag {
        name: String,
        negated: bool,
    },
    Compare {
        key: String,
        values: Vec<String>,
        negated: bool,
    },
    Capability {
        name: String,
        negated: bool,
    },
}

fn check_name(name: &str, source: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(Error::ParseError(format!(
            "Invalid name '{}' in condition '{}'",
            name, source
        )));
    }
    Ok(())
}

impl Term {
    fn parse(raw: &str, source: &str) -> Result<Self> {
        let compare = raw
            .split_once("!=")
            .map(|(k, v)| (k, v, true))
            .or_else(|| raw.split_once('=').map(|(k, v)| (k, v, false)));

        if let Some((key, values, negated)) = compare {
            let key = key.trim();
            check_name(key, source)?;
            if key.starts_with("cap:") || key.starts_with('!') {
                return Err(Error::ParseError(format!(
                    "Comparison key '{}' is not an option or setting in condition '{}'",
                    key, source
                )));
            }
            let values: Vec<String> = values.split('|').map(|v| v.trim().to_string()).collect();
            if values.iter().any(|v| v.is_empty()) {
                return Err(Error::ParseError(format!(
                    "Empty value in condition '{}'",
                    source
                )));
            }
            return Ok(Term::Compare {
                key: key.to_string(),
                values,
                negated,
            });
        }

        let (negated, rest) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, raw),
        };

        if let Some(cap) = rest.strip_prefix("cap:") {
            check_name(cap, source)?;
            return Ok(Term::Capability {
                name: cap.to_string(),
                negated,
            });
        }

        check_name(rest, source)?;
        if SETTING_KEYS.contains(&rest) {
            return Err(Error::ParseError(format!(
                "Setting '{}' must be compared with '=' in condition '{}'",
                rest, source
            )));
        }
        Ok(Term::Flag {
            name: rest.to_string(),
            negated,
        })
    }

    fn eval(&self, ctx: &EvalContext<'_>) -> Result<bool> {
        match self {
            Term::Flag { name, negated } => Ok(ctx.options.get_bool(name) != *negated),
            Term::Compare {
                key,
                values,
                negated,
            } => {
                let actual = if SETTING_KEYS.contains(&key.as_str()) {
                    ctx.settings.get(key)
                } else {
                    ctx.options.get(key).map(|v| v.to_string())
                };
                let matched = actual
                    .is_some_and(|a| values.iter().any(|v| v.eq_ignore_ascii_case(&a)));
                Ok(matched != *negated)
            }
            Term::Capability { name, negated } => {
                let lookup = ctx.capabilities.ok_or_else(|| {
                    Error::ConfigError(format!(
                        "Capability '{}' referenced before capabilities are resolved",
                        name
                    ))
                })?;
                let enabled = lookup.capability_enabled(name).ok_or_else(|| {
                    Error::ConfigError(format!("Unknown capability '{}' in condition", name))
                })?;
                Ok(enabled != *negated)
            }
        }
    }
}

/// A parsed condition; serialized as its source text
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    source: String,
    terms: Vec<Term>,
}

impl Condition {
    /// Evaluate the conjunction of all terms
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<bool> {
        for term in &self.terms {
            if !term.eval(ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Option names this condition reads (settings excluded)
    pub fn referenced_options(&self) -> Vec<&str> {
        self.terms
            .iter()
            .filter_map(|t| match t {
                Term::Flag { name, .. } => Some(name.as_str()),
                Term::Compare { key, .. } if !SETTING_KEYS.contains(&key.as_str()) => {
                    Some(key.as_str())
                }
                _ => None,
            })
            .collect()
    }

    /// Capability names this condition reads
    pub fn referenced_capabilities(&self) -> Vec<&str> {
        self.terms
            .iter()
            .filter_map(|t| match t {
                Term::Capability { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for Condition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let source = s.trim();
        if source.is_empty() {
            return Err(Error::ParseError("Empty condition".to_string()));
        }

        let mut terms = Vec::new();
        for raw in source.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(Error::ParseError(format!(
                    "Empty term in condition '{}'",
                    source
                )));
            }
            terms.push(Term::parse(raw, source)?);
        }

        Ok(Self {
            source: source.to_string(),
            terms,
        })
    }
}

impl TryFrom<String> for Condition {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Condition> for String {
    fn from(c: Condition) -> String {
        c.source
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
