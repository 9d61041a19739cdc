//! Container construction
//!
//! A container is created detached, invisible, and with an empty
//! capability list. Attaching it is the lifecycle controller's job.

use crate::host::ContainerId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Hands out container ids.
///
/// One registry per host process: created on first use by
/// [`IdentityRegistry::global`], never reset. Ids are unique for the life
/// of the process, so a stale id can never alias a newer container.
#[derive(Debug)]
pub struct IdentityRegistry {
    next: AtomicU64,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// The process-wide registry
    pub fn global() -> &'static IdentityRegistry {
        static REGISTRY: OnceLock<IdentityRegistry> = OnceLock::new();
        REGISTRY.get_or_init(IdentityRegistry::new)
    }

    pub fn next_container_id(&self) -> ContainerId {
        ContainerId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Inline styling that keeps the container out of the host's layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStyle {
    pub width: &'static str,
    pub height: &'static str,
    pub border: &'static str,
    pub position: &'static str,
    pub visibility: &'static str,
}

impl ContainerStyle {
    /// Zero-sized, borderless, absolutely positioned, hidden
    pub fn invisible() -> Self {
        Self {
            width: "0",
            height: "0",
            border: "0",
            position: "absolute",
            visibility: "hidden",
        }
    }

    /// Render as a `style` attribute value
    pub fn to_css(&self) -> String {
        format!(
            "width:{};height:{};border:{};position:{};visibility:{}",
            self.width, self.height, self.border, self.position, self.visibility
        )
    }
}

/// A container element as veil configures it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: ContainerId,
    pub style: ContainerStyle,
    /// Capability list, in the host primitive's token form
    pub capabilities: Vec<String>,
}

impl ContainerHandle {
    /// The capability list as a sandbox attribute value
    pub fn sandbox_attribute(&self) -> String {
        self.capabilities.join(" ")
    }
}

/// Builds fresh containers with ids from a registry
#[derive(Debug, Clone, Copy)]
pub struct ContainerFactory {
    registry: &'static IdentityRegistry,
}

impl ContainerFactory {
    pub fn new(registry: &'static IdentityRegistry) -> Self {
        Self { registry }
    }

    /// Create a detached, invisible container with no capabilities.
    ///
    /// No side effects beyond drawing an id.
    pub fn create_container(&self) -> ContainerHandle {
        let handle = ContainerHandle {
            id: self.registry.next_container_id(),
            style: ContainerStyle::invisible(),
            capabilities: Vec::new(),
        };
        tracing::debug!(container = %handle.id, "created container");
        handle
    }
}

impl Default for ContainerFactory {
    fn default() -> Self {
        Self::new(IdentityRegistry::global())
    }
}
