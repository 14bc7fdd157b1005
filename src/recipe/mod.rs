// src/recipe/mod.rs

//! Recipe system for building native libraries from source
//!
//! Recipes define how to build a library, including:
//! - Pinned sources per version and the patches each version needs
//! - The option schema and the dependency requirements it drives
//! - Capabilities translated into configure or CMake flags
//! - Build instructions and the exported package contract
//!
//! # Culinary Terminology
//!
//! - **Recipe**: The build specification (like a recipe card)
//! - **Cook**: Build a package from a recipe
//! - **Kitchen**: Where cooks happen; owns the store and source cache
//! - **Prep**: Fetch and unpack sources
//! - **Simmer**: The actual build process
//! - **Plate**: Normalize the install tree and export metadata
//!
//! # Example Recipe
//!
//! ```toml
//! requires = [{ ref = "rdma-core/[>=50]", when = "rdma" }]
//!
//! [package]
//! name = "openucx"
//!
//! [options]
//! shared = { values = [true, false], default = false }
//! fPIC = { values = [true, false], default = true, remove_when = "shared" }
//! rdma = { values = [true, false], default = true }
//!
//! [sources."1.17.0"]
//! url = "https://github.com/openucx/ucx/releases/download/v1.17.0/ucx-1.17.0.tar.gz"
//! sha256 = "34658e282f99f89ce7a991c542e9727552734ac6ad408c52f22b4c2653b04276"
//!
//! [[configure.capability]]
//! name = "verbs"
//! when = "rdma"
//! value = { dependency = "rdma-core" }
//!
//! [build]
//! system = "autotools"
//!
//! [export]
//! libs = ["ucp", "uct", "ucs", "ucm"]
//! ```

mod format;
mod kitchen;
pub mod parser;

pub use format::{PackageSection, Recipe};
pub use kitchen::{
    BuildPlan, CONFIG_ENV, CONFIG_FILE, Cook, CookRequest, CookResult, Kitchen, KitchenConfig,
    package_id,
};
pub use parser::{parse_recipe, parse_recipe_file, validate_recipe};
