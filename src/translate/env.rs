// src/translate/env.rs

//! Environment lookup used by capability discovery

use std::collections::{BTreeMap, HashMap};

/// Source of environment variables
///
/// Translation only reads variables of enabled capabilities, so this is
/// also the seam tests use to prove a disabled capability never looks.
pub trait Environment {
    fn var(&self, name: &str) -> Option<String>;
}

/// The process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl Environment for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl Environment for BTreeMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}
