//! Sandbox configuration

use crate::exports::ExportValue;
use crate::permissions::{Capability, PermissionSet};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// What the caller hands to each run.
///
/// Read fresh by every `run`; mutate it between runs freely.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfiguration {
    /// Names defined in the container's global scope before the script runs
    pub exports: BTreeMap<String, ExportValue>,
    /// Script URLs loaded, in order, ahead of the main script
    pub dependencies: Vec<String>,
    /// Extra capabilities on top of `allow-scripts`
    pub permissions: PermissionSet,
}

impl SandboxConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration document
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Load a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text).map_err(std::io::Error::from)
    }

    pub fn with_export(mut self, name: impl Into<String>, value: impl Into<ExportValue>) -> Self {
        self.exports.insert(name.into(), value.into());
        self
    }

    pub fn with_dependency(mut self, url: impl Into<String>) -> Self {
        self.dependencies.push(url.into());
        self
    }

    pub fn with_permission(mut self, cap: impl Into<Capability>) -> Self {
        self.permissions.grant(cap);
        self
    }
}

/// Controller-level policy switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SandboxOptions {
    /// Refuse exports that would overwrite an existing global instead of
    /// warning about them
    pub safe_mode: bool,
}
