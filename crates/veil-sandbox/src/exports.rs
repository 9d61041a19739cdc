//! Exports - host values copied into the isolated global scope
//!
//! Plain data crosses the boundary. Host nodes never do: any node handle
//! leads back to its owner document, which is exactly what the container
//! exists to keep out of reach.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Globals the wrapper and the isolated scope rely on.
///
/// Overwriting one of these is always reported, whether or not the host
/// lists it as present.
pub const RESERVED_GLOBALS: &[&str] = &[
    "postMessage",
    "parent",
    "top",
    "window",
    "self",
    "globalThis",
    "frames",
    "opener",
    "Promise",
    "JSON",
    "Object",
    "Function",
    "Error",
    "String",
    "document",
    "location",
];

/// Handle to a node living in the host document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef {
    pub id: u64,
    /// Whether the node is currently attached to a document
    pub connected: bool,
}

/// A value declared for export into the container
#[derive(Debug, Clone, PartialEq)]
pub enum ExportValue {
    /// Structured data, copied across
    Data(Value),
    /// A host node; always refused
    Node(NodeRef),
}

impl From<Value> for ExportValue {
    fn from(value: Value) -> Self {
        ExportValue::Data(value)
    }
}

impl From<NodeRef> for ExportValue {
    fn from(node: NodeRef) -> Self {
        ExportValue::Node(node)
    }
}

// Configuration files can only describe data; nodes are programmatic.
impl<'de> Deserialize<'de> for ExportValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(ExportValue::Data)
    }
}

/// What a global scope already holds under a name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKind {
    /// Provided by the isolated environment itself
    Intrinsic,
    /// Put there by an earlier injection
    Export,
}

/// The container's global object, as the host exposes it during init
pub trait GlobalScope {
    fn lookup(&self, name: &str) -> Option<GlobalKind>;
    fn define(&mut self, name: &str, value: &ExportValue);
}

/// Why an export was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// A host node was declared; not injected
    HostNode,
    /// An intrinsic global was replaced
    OverwroteGlobal,
    /// An intrinsic global would have been replaced; refused in safe mode
    RefusedOverwrite,
}

/// Non-fatal diagnostic from injection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionWarning {
    pub name: String,
    pub kind: WarningKind,
}

impl fmt::Display for InjectionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            WarningKind::HostNode => write!(f, "export `{}` is a host node and was not injected", self.name),
            WarningKind::OverwroteGlobal => write!(f, "export `{}` overwrote an existing global", self.name),
            WarningKind::RefusedOverwrite => {
                write!(f, "export `{}` would overwrite an existing global; refused in safe mode", self.name)
            }
        }
    }
}

fn is_intrinsic(global: &dyn GlobalScope, name: &str) -> bool {
    RESERVED_GLOBALS.contains(&name) || global.lookup(name) == Some(GlobalKind::Intrinsic)
}

/// Copy `exports` into `global`.
///
/// Host nodes are skipped. Intrinsic globals are overwritten with a
/// warning, or left alone with a warning when `safe_mode` is set.
/// Replacing a previous run's export is silent.
pub fn inject(
    global: &mut dyn GlobalScope,
    exports: &BTreeMap<String, ExportValue>,
    safe_mode: bool,
) -> Vec<InjectionWarning> {
    let mut warnings = Vec::new();

    for (name, value) in exports {
        if let ExportValue::Node(node) = value {
            tracing::warn!(name = %name, node = node.id, connected = node.connected, "refusing to export host node");
            warnings.push(InjectionWarning {
                name: name.clone(),
                kind: WarningKind::HostNode,
            });
            continue;
        }

        if is_intrinsic(&*global, name) {
            let kind = if safe_mode {
                WarningKind::RefusedOverwrite
            } else {
                WarningKind::OverwroteGlobal
            };
            let warning = InjectionWarning {
                name: name.clone(),
                kind,
            };
            tracing::warn!(name = %name, safe_mode, "{}", warning);
            warnings.push(warning);
            if safe_mode {
                continue;
            }
        } else if global.lookup(name) == Some(GlobalKind::Export) {
            tracing::debug!(name = %name, "replacing export from a previous run");
        }

        global.define(name, value);
    }

    warnings
}
