//! Capability flags granted to the isolation container
//!
//! Scripts always run, same-origin access never happens.
//! A container that can reach its parent's origin can read the host
//! document and cookies, so `allow-same-origin` is stripped no matter
//! who asked for it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named permission understood by the host container primitive
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Capability {
    /// Run scripts inside the container
    AllowScripts,
    /// Share the embedding page's origin (never granted)
    AllowSameOrigin,
    /// Show modal dialogs (`alert`, `confirm`, `prompt`)
    AllowModals,
    /// Open pop-up windows
    AllowPopups,
    /// Submit forms
    AllowForms,
    /// Any other flag, passed through verbatim
    Other(String),
}

impl Capability {
    pub fn as_str(&self) -> &str {
        match self {
            Capability::AllowScripts => "allow-scripts",
            Capability::AllowSameOrigin => "allow-same-origin",
            Capability::AllowModals => "allow-modals",
            Capability::AllowPopups => "allow-popups",
            Capability::AllowForms => "allow-forms",
            Capability::Other(flag) => flag,
        }
    }
}

impl From<&str> for Capability {
    /// Known flags match ignoring ASCII case, as the host does
    fn from(flag: &str) -> Self {
        let flag = flag.trim();
        match flag.to_ascii_lowercase().as_str() {
            "allow-scripts" => Capability::AllowScripts,
            "allow-same-origin" => Capability::AllowSameOrigin,
            "allow-modals" => Capability::AllowModals,
            "allow-popups" => Capability::AllowPopups,
            "allow-forms" => Capability::AllowForms,
            _ => Capability::Other(flag.to_string()),
        }
    }
}

impl From<String> for Capability {
    fn from(flag: String) -> Self {
        Capability::from(flag.as_str())
    }
}

impl From<Capability> for String {
    fn from(cap: Capability) -> Self {
        cap.as_str().to_string()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-declared capabilities, kept in the order they were granted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    capabilities: Vec<Capability>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a capability
    pub fn grant(&mut self, cap: impl Into<Capability>) -> &mut Self {
        let cap = cap.into();
        if !self.capabilities.contains(&cap) {
            self.capabilities.push(cap);
        }
        self
    }

    /// Take a capability back
    pub fn revoke(&mut self, cap: &Capability) -> &mut Self {
        self.capabilities.retain(|c| c != cap);
        self
    }

    pub fn has(&self, cap: &Capability) -> bool {
        self.capabilities.contains(cap)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl<C: Into<Capability>> FromIterator<C> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        let mut set = PermissionSet::new();
        for cap in iter {
            set.grant(cap);
        }
        set
    }
}

/// Builder for permission sets with a fluent API
impl PermissionSet {
    pub fn with(mut self, cap: impl Into<Capability>) -> Self {
        self.grant(cap);
        self
    }

    pub fn with_modals(self) -> Self {
        self.with(Capability::AllowModals)
    }

    pub fn with_popups(self) -> Self {
        self.with(Capability::AllowPopups)
    }

    pub fn with_forms(self) -> Self {
        self.with(Capability::AllowForms)
    }
}

/// Compute the effective capability list for one run.
///
/// `allow-scripts` always comes first, `allow-same-origin` is always
/// dropped, everything else follows in declaration order. A declared flag
/// holding several whitespace-separated tokens is split first, since the
/// host reads the joined list token by token.
pub fn compute_permissions(declared: &PermissionSet) -> Vec<String> {
    let mut effective = vec![Capability::AllowScripts.as_str().to_string()];

    let tokens = declared
        .iter()
        .flat_map(|cap| cap.as_str().split_ascii_whitespace())
        .map(Capability::from);

    for cap in tokens {
        match cap {
            Capability::AllowScripts => continue,
            Capability::AllowSameOrigin => {
                tracing::warn!(flag = %cap, "refusing to grant same-origin access");
            }
            _ => {
                let flag = cap.as_str();
                if !effective.iter().any(|existing| existing == flag) {
                    effective.push(flag.to_string());
                }
            }
        }
    }

    effective
}
