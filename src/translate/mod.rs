// src/translate/mod.rs

//! Dependency-to-flag translation
//!
//! Native configure scripts probe the system and silently enable whatever
//! they find. Every capability a recipe declares is therefore forced to a
//! known state: an enabled capability renders a positive flag (pointing at
//! a dependency folder, a discovered toolkit or a literal), a disabled one
//! renders the explicit negative flag. Nothing is left to auto-detection.
//!
//! ```toml
//! [configure]
//! disable = ["libfabric", "ofi", "knem", "xpmem"]
//!
//! [[configure.capability]]
//! name = "verbs"
//! when = "rdma"
//! value = { dependency = "rdma-core" }
//!
//! [[configure.capability]]
//! name = "rc"
//! when = "rdma"
//! gated_by = ["verbs"]
//!
//! [[configure.capability]]
//! name = "cuda"
//! when = "cuda"
//! value = { env = ["CUDA_HOME", "CUDA_PATH", "CUDA_ROOT"] }
//! ```

mod env;

pub use env::{Environment, ProcessEnvironment};

use crate::deps::DependencyMap;
use crate::error::{Error, Result};
use crate::options::{
    CapabilityLookup, CondItem, Condition, EvalContext, OptionAssignment, OptionSchema, OptionValue,
};
use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use strum_macros::{Display, EnumString};
use tracing::debug;

/// How a capability is spelled on the configure command line
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
    Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FlagStyle {
    /// `--with-X=...` / `--with-X=no`
    #[default]
    With,
    /// `--enable-X[=...]` / `--disable-X`
    Enable,
    /// `-DX=ON|OFF|value`
    Cmake,
}

/// What an enabled capability points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnabledValue {
    /// `yes` renders a bare positive flag; anything else is passed through
    Literal(String),
    /// Install folder of a resolved dependency
    Dependency {
        dependency: String,
        #[serde(default)]
        subdir: Option<String>,
    },
    /// First set variable in the list names a toolkit folder
    Env { env: Vec<String> },
    /// Current value of an option
    Option { option: String },
}

impl Default for EnabledValue {
    fn default() -> Self {
        Self::Literal("yes".to_string())
    }
}

/// A capability as written in a recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDecl {
    pub name: String,
    #[serde(default)]
    pub style: Option<FlagStyle>,
    /// Enabled when this holds; always enabled without it
    #[serde(default)]
    pub when: Option<Condition>,
    /// Capabilities that must be enabled for this one to be
    #[serde(default)]
    pub gated_by: Vec<String>,
    #[serde(default)]
    pub value: EnabledValue,
}

/// Extra argument filled from the environment when set
///
/// ```toml
/// [[configure.passthrough]]
/// flag = "--with-nvcc-gencode"
/// env = "NVCC_GENCODE"
/// when = "cuda"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassthroughDecl {
    pub flag: String,
    pub env: String,
    #[serde(default)]
    pub when: Option<Condition>,
}

/// The `[configure]` section of a recipe
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigureSection {
    /// Default style for capabilities that do not name one
    #[serde(default)]
    pub style: FlagStyle,
    #[serde(default, rename = "capability")]
    pub capabilities: Vec<CapabilityDecl>,
    /// Always-enabled shorthand; entries may carry a `style:` prefix
    #[serde(default)]
    pub enable: Vec<String>,
    /// Always-disabled shorthand; entries may carry a `style:` prefix
    #[serde(default)]
    pub disable: Vec<String>,
    #[serde(default)]
    pub passthrough: Vec<PassthroughDecl>,
    /// Static arguments appended after capability flags
    #[serde(default)]
    pub args: Vec<CondItem<String>>,
}

/// When a normalized capability is enabled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Always,
    Never,
    When(Condition),
}

/// A capability after shorthand expansion and validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub name: String,
    pub style: FlagStyle,
    pub activation: Activation,
    pub gated_by: Vec<String>,
    pub value: EnabledValue,
}

impl Capability {
    fn key(&self) -> FlagKey {
        FlagKey {
            style: self.style,
            name: self.name.clone(),
        }
    }
}

/// Identity of a flag for collision checks, e.g. `with:verbs`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct FlagKey {
    style: FlagStyle,
    name: String,
}

impl fmt::Display for FlagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.style, self.name)
    }
}

/// Which capability flag a literal argument would set, if any
fn flag_key(arg: &str) -> Option<FlagKey> {
    let name_of = |rest: &str| rest.split('=').next().unwrap_or(rest).to_string();

    let (style, rest) = if let Some(rest) = arg.strip_prefix("--with-") {
        (FlagStyle::With, rest)
    } else if let Some(rest) = arg.strip_prefix("--without-") {
        (FlagStyle::With, rest)
    } else if let Some(rest) = arg.strip_prefix("--enable-") {
        (FlagStyle::Enable, rest)
    } else if let Some(rest) = arg.strip_prefix("--disable-") {
        (FlagStyle::Enable, rest)
    } else if let Some(rest) = arg.strip_prefix("-D") {
        let name = name_of(rest);
        let name = name.split(':').next().unwrap_or(&name).to_string();
        return Some(FlagKey {
            style: FlagStyle::Cmake,
            name,
        });
    } else {
        return None;
    };

    Some(FlagKey {
        style,
        name: name_of(rest),
    })
}

fn shorthand(entry: &str, default: FlagStyle) -> Result<(FlagStyle, String)> {
    let (style, name) = match entry.split_once(':') {
        Some((prefix, name)) => {
            let style = prefix.parse::<FlagStyle>().map_err(|_| {
                Error::ConfigError(format!("Unknown flag style '{}' in '{}'", prefix, entry))
            })?;
            (style, name.trim())
        }
        None => (default, entry.trim()),
    };
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(Error::ConfigError(format!(
            "Invalid capability name '{}'",
            entry
        )));
    }
    Ok((style, name.to_string()))
}

impl ConfigureSection {
    /// Expand shorthand lists and check the declarations against the schema
    ///
    /// Capability names are unique, gates must be declared before the
    /// capability they gate, every option referenced exists, and no static
    /// argument or passthrough flag may set a capability's flag.
    pub fn capabilities(&self, schema: &OptionSchema) -> Result<Vec<Capability>> {
        let mut caps = Vec::new();

        for decl in &self.capabilities {
            caps.push(Capability {
                name: decl.name.clone(),
                style: decl.style.unwrap_or(self.style),
                activation: match &decl.when {
                    Some(cond) => Activation::When(cond.clone()),
                    None => Activation::Always,
                },
                gated_by: decl.gated_by.clone(),
                value: decl.value.clone(),
            });
        }
        for (list, activation) in [(&self.enable, Activation::Always), (&self.disable, Activation::Never)] {
            for entry in list {
                let (style, name) = shorthand(entry, self.style)?;
                caps.push(Capability {
                    name,
                    style,
                    activation: activation.clone(),
                    gated_by: Vec::new(),
                    value: EnabledValue::default(),
                });
            }
        }

        let mut names = BTreeSet::new();
        let mut keys = BTreeSet::new();
        for cap in &caps {
            if cap.name.is_empty() || cap.name.contains(char::is_whitespace) {
                return Err(Error::ConfigError(format!(
                    "Invalid capability name '{}'",
                    cap.name
                )));
            }
            for gate in &cap.gated_by {
                if !names.contains(gate.as_str()) {
                    return Err(Error::ConfigError(format!(
                        "Capability '{}' is gated by '{}', which must be declared before it",
                        cap.name, gate
                    )));
                }
            }
            if !names.insert(cap.name.as_str()) {
                return Err(Error::ConfigError(format!(
                    "Capability '{}' is declared more than once",
                    cap.name
                )));
            }
            keys.insert(cap.key());

            if let Activation::When(cond) = &cap.activation {
                check_condition(cond, schema, &format!("capability '{}'", cap.name))?;
            }
            if let EnabledValue::Option { option } = &cap.value {
                if !schema.contains(option) {
                    return Err(Error::ConfigError(format!(
                        "Capability '{}' takes its value from undeclared option '{}'",
                        cap.name, option
                    )));
                }
            }
            if let EnabledValue::Env { env } = &cap.value {
                if env.is_empty() {
                    return Err(Error::ConfigError(format!(
                        "Capability '{}' lists no environment variables",
                        cap.name
                    )));
                }
            }
        }

        let statics = self
            .args
            .iter()
            .map(|a| (a.value().as_str(), a.condition()))
            .chain(self.passthrough.iter().map(|p| (p.flag.as_str(), p.when.as_ref())));
        for (arg, cond) in statics {
            if let Some(key) = flag_key(arg) {
                if keys.contains(&key) || names.contains(key.name.as_str()) {
                    return Err(Error::ConfigError(format!(
                        "Argument '{}' collides with capability flag {}",
                        arg, key
                    )));
                }
            }
            if let Some(cond) = cond {
                check_condition(cond, schema, &format!("argument '{}'", arg))?;
            }
        }

        Ok(caps)
    }

    /// Resolve every capability and derive the configure argument list
    pub fn translate(&self, schema: &OptionSchema, ctx: &TranslateContext<'_>) -> Result<Translation> {
        let caps = self.capabilities(schema)?;
        let eval = ctx.eval_context();

        let mut resolved: Vec<ResolvedCapability> = Vec::with_capacity(caps.len());
        for cap in &caps {
            let own = match &cap.activation {
                Activation::Always => true,
                Activation::Never => false,
                Activation::When(cond) => cond.eval(&eval)?,
            };
            let gates_open = cap.gated_by.iter().all(|gate| {
                resolved
                    .iter()
                    .find(|r| &r.name == gate)
                    .is_some_and(|r| r.state.is_enabled())
            });
            if own && !gates_open {
                debug!("Capability '{}' disabled by its gates", cap.name);
            }

            let state = if own && gates_open {
                resolve_value(cap, ctx)?
            } else {
                CapabilityState::Disabled
            };

            resolved.push(ResolvedCapability {
                name: cap.name.clone(),
                style: cap.style,
                state,
            });
        }

        let mut args: Vec<String> = resolved.iter().map(ResolvedCapability::flag).collect();

        for pt in &self.passthrough {
            if let Some(cond) = &pt.when {
                if !cond.eval(&eval)? {
                    continue;
                }
            }
            match ctx.env.var(&pt.env).filter(|v| !v.is_empty()) {
                Some(value) => args.push(format!("{}={}", pt.flag, value)),
                None => debug!("Passthrough {} skipped, {} unset", pt.flag, pt.env),
            }
        }

        for arg in &self.args {
            if arg.applies(&eval)? {
                args.push(arg.value().clone());
            }
        }

        Ok(Translation {
            capabilities: CapabilitySet::from_resolved(resolved),
            args,
        })
    }
}

fn check_condition(cond: &Condition, schema: &OptionSchema, what: &str) -> Result<()> {
    for opt in cond.referenced_options() {
        if !schema.contains(opt) {
            return Err(Error::ConfigError(format!(
                "Condition '{}' of {} references undeclared option '{}'",
                cond, what, opt
            )));
        }
    }
    if let Some(cap) = cond.referenced_capabilities().first() {
        return Err(Error::ConfigError(format!(
            "Condition '{}' of {} references capability '{}' before translation",
            cond, what, cap
        )));
    }
    Ok(())
}

fn resolve_value(cap: &Capability, ctx: &TranslateContext<'_>) -> Result<CapabilityState> {
    let state = match &cap.value {
        EnabledValue::Literal(v) if v.eq_ignore_ascii_case("yes") => CapabilityState::Enabled,
        EnabledValue::Literal(v) => CapabilityState::Value(v.clone()),
        EnabledValue::Dependency { dependency, subdir } => {
            let dep = ctx.deps.get(dependency).ok_or_else(|| {
                Error::ConfigError(format!(
                    "Capability '{}' is enabled but dependency '{}' is not resolved",
                    cap.name, dependency
                ))
            })?;
            let path = match subdir {
                Some(s) => dep.folder.join(s),
                None => dep.folder.clone(),
            };
            CapabilityState::Path(path)
        }
        EnabledValue::Env { env } => {
            // Every variable is consulted; a later one overrides an earlier one
            let found = env
                .iter()
                .filter_map(|var| ctx.env.var(var).filter(|v| !v.is_empty()).map(|v| (var, v)))
                .last();
            match found {
                Some((var, value)) => {
                    debug!("Capability '{}' located via {}={}", cap.name, var, value);
                    CapabilityState::Path(PathBuf::from(value))
                }
                None => {
                    return Err(Error::ConfigError(format!(
                        "Capability '{}' is enabled but none of {} is set",
                        cap.name,
                        env.join(", ")
                    )));
                }
            }
        }
        EnabledValue::Option { option } => match ctx.options.get(option) {
            Some(OptionValue::Bool(true)) => CapabilityState::Enabled,
            Some(OptionValue::Bool(false)) => CapabilityState::Disabled,
            Some(OptionValue::Str(s)) => CapabilityState::Value(s.clone()),
            None => {
                return Err(Error::ConfigError(format!(
                    "Capability '{}' is enabled but option '{}' was removed",
                    cap.name, option
                )));
            }
        },
    };
    Ok(state)
}

/// Inputs to translation
pub struct TranslateContext<'a> {
    pub options: &'a OptionAssignment,
    pub settings: &'a Settings,
    pub deps: &'a DependencyMap,
    pub env: &'a dyn Environment,
}

impl<'a> TranslateContext<'a> {
    /// Conditions evaluated during translation cannot see capabilities yet
    fn eval_context(&self) -> EvalContext<'a> {
        EvalContext {
            options: self.options,
            settings: self.settings,
            capabilities: None,
        }
    }
}

/// Resolved state of one capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityState {
    Disabled,
    Enabled,
    Path(PathBuf),
    Value(String),
}

impl CapabilityState {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// A capability with its final state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCapability {
    pub name: String,
    pub style: FlagStyle,
    pub state: CapabilityState,
}

impl ResolvedCapability {
    /// The single flag this capability contributes
    pub fn flag(&self) -> String {
        let name = &self.name;
        match (self.style, &self.state) {
            (FlagStyle::With, CapabilityState::Disabled) => format!("--with-{}=no", name),
            (FlagStyle::With, CapabilityState::Enabled) => format!("--with-{}=yes", name),
            (FlagStyle::With, CapabilityState::Path(p)) => format!("--with-{}={}", name, p.display()),
            (FlagStyle::With, CapabilityState::Value(v)) => format!("--with-{}={}", name, v),
            (FlagStyle::Enable, CapabilityState::Disabled) => format!("--disable-{}", name),
            (FlagStyle::Enable, CapabilityState::Enabled) => format!("--enable-{}", name),
            (FlagStyle::Enable, CapabilityState::Path(p)) => {
                format!("--enable-{}={}", name, p.display())
            }
            (FlagStyle::Enable, CapabilityState::Value(v)) => format!("--enable-{}={}", name, v),
            (FlagStyle::Cmake, CapabilityState::Disabled) => format!("-D{}=OFF", name),
            (FlagStyle::Cmake, CapabilityState::Enabled) => format!("-D{}=ON", name),
            (FlagStyle::Cmake, CapabilityState::Path(p)) => format!("-D{}={}", name, p.display()),
            (FlagStyle::Cmake, CapabilityState::Value(v)) => format!("-D{}={}", name, v),
        }
    }
}

/// All resolved capabilities in declaration order
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    caps: Vec<ResolvedCapability>,
    index: BTreeMap<String, usize>,
}

impl CapabilitySet {
    pub fn from_resolved(caps: Vec<ResolvedCapability>) -> Self {
        let index = caps
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self { caps, index }
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedCapability> {
        self.index.get(name).map(|&i| &self.caps[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedCapability> {
        self.caps.iter()
    }

    pub fn len(&self) -> usize {
        self.caps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }
}

impl CapabilityLookup for CapabilitySet {
    fn capability_enabled(&self, name: &str) -> Option<bool> {
        self.get(name).map(|c| c.state.is_enabled())
    }
}

/// Result of translation
#[derive(Debug, Clone)]
pub struct Translation {
    pub capabilities: CapabilitySet,
    /// Capability flags, then passthrough and static arguments
    pub args: Vec<String>,
}
