//! Veil Sandbox - untrusted script in an isolated container
//!
//! A run hands source text to a fresh (or reused) container that can run
//! scripts but has no origin of its own. The script cannot see the host
//! document; the host gets back exactly one outcome message.
//!
//! The container itself is supplied by the hosting environment through
//! the [`Host`] trait.

mod channel;
mod config;
mod container;
mod exports;
mod host;
mod lifecycle;
mod permissions;
mod wrapper;

#[cfg(test)]
mod testing;

pub use channel::{parse_outcome, ChannelState, DisarmHandle, ProtocolError, ResultChannel, RunOutcome, ScriptError};
pub use config::{SandboxConfiguration, SandboxOptions};
pub use container::{ContainerFactory, ContainerHandle, ContainerStyle, IdentityRegistry};
pub use exports::{inject, ExportValue, GlobalKind, GlobalScope, InjectionWarning, NodeRef, WarningKind, RESERVED_GLOBALS};
pub use host::{ContainerId, ContextId, Host, HostError, HostMessage, OPAQUE_ORIGIN};
pub use lifecycle::{RunHandle, Sandbox};
pub use permissions::{compute_permissions, Capability, PermissionSet};
pub use wrapper::{build, sanitize, CHANNEL_TAG};

/// Errors from sandbox operations
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Host cannot restrict container capabilities: {0}")]
    Configuration(String),

    #[error("Script failed: {0}")]
    Script(#[from] ScriptError),

    #[error("Run was abandoned before an outcome arrived")]
    Disarmed,

    #[error("Host message stream closed")]
    ChannelClosed,

    #[error("Host message stream dropped {0} messages; the outcome may be lost")]
    Lagged(u64),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
