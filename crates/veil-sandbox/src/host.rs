//! The seam to the hosting environment's container primitive
//!
//! veil never renders anything itself. The page (or whatever plays its
//! role) supplies an isolation container that can be attached, navigated,
//! restricted and listened to. Everything here is what the protocol needs
//! from it, nothing more.

use crate::container::ContainerHandle;
use crate::exports::GlobalScope;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::broadcast;

/// Origin reported for messages from a context without an origin of its own
pub const OPAQUE_ORIGIN: &str = "null";

/// Identity of one container element, stable across the runs that reuse it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(pub u64);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container-{}", self.0)
    }
}

/// Identity of one document loaded into a container.
///
/// Every load produces a new context, so a reused container never shares
/// a context between two runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context-{}", self.0)
    }
}

/// A message event as seen on the host page's shared message stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMessage {
    /// The content context that posted the message
    pub source: ContextId,
    /// Origin of the sender; `"null"` for opaque contexts
    pub origin: String,
    /// Structured-cloned payload
    pub data: Value,
}

impl HostMessage {
    pub fn from_opaque(source: ContextId, data: Value) -> Self {
        Self {
            source,
            origin: OPAQUE_ORIGIN.to_string(),
            data,
        }
    }
}

/// Failures reported by the host primitive
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Container {0} is not attached")]
    NotAttached(ContainerId),

    #[error("Container {0} is already attached")]
    AlreadyAttached(ContainerId),

    #[error("Failed to load document into {container}: {reason}")]
    LoadFailed { container: ContainerId, reason: String },
}

/// The hosting environment's isolation primitive.
///
/// Implementations own the actual elements; veil only keeps their ids.
pub trait Host {
    /// Whether containers honour a capability list at all.
    ///
    /// Hosts that answer `false` are never given a container to attach.
    fn supports_capability_restriction(&self) -> bool;

    /// Insert a configured container into the host document
    fn attach(&mut self, container: &ContainerHandle) -> Result<(), HostError>;

    /// Replace the capability list of an attached container.
    ///
    /// Takes effect on the next [`Host::load_document`].
    fn set_capabilities(&mut self, container: ContainerId, capabilities: &[String]) -> Result<(), HostError>;

    /// Navigate the container to `document`.
    ///
    /// `init` must be called with the container's global scope after the
    /// new context exists and before any script of `document` executes.
    fn load_document(
        &mut self,
        container: ContainerId,
        document: &str,
        init: &mut dyn FnMut(&mut dyn GlobalScope),
    ) -> Result<ContextId, HostError>;

    /// Navigate to an empty document, leaving the container attached
    fn blank(&mut self, container: ContainerId) -> Result<(), HostError>;

    /// Remove the container from the host document
    fn detach(&mut self, container: ContainerId) -> Result<(), HostError>;

    /// Subscribe to the page-wide message stream.
    ///
    /// Shared by every sandbox on the page; listeners filter by source.
    /// Size the buffer for the page's traffic: a listener that falls
    /// behind gives up its run with [`crate::SandboxError::Lagged`].
    fn subscribe(&self) -> broadcast::Receiver<HostMessage>;
}
