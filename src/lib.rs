// src/lib.rs

//! Larder: recipe-driven builds of third-party native libraries
//!
//! A recipe declares pinned sources, a closed option schema, dependency
//! requirements and capabilities. Evaluating it for a version, an option
//! set and a platform yields one immutable package folder plus the
//! metadata downstream recipes consume.
//!
//! # Architecture
//!
//! - `options`: option schema, platform removal and conditions
//! - `deps`: requirement edges, dependency providers, pkg-config files
//! - `translate`: capabilities to configure/CMake flags
//! - `source`: pinned archives and git checkouts, patches
//! - `build`: native build invocation through a command runner
//! - `export`: install tree normalization and the package contract
//! - `recipe`: recipe format and the kitchen that cooks it

pub mod build;
pub mod deps;
mod error;
pub mod export;
pub mod hash;
pub mod options;
pub mod recipe;
pub mod settings;
pub mod source;
pub mod translate;

pub use error::{Error, Phase, Result};
pub use recipe::{CookRequest, CookResult, Kitchen, KitchenConfig, Recipe};
pub use settings::Settings;
