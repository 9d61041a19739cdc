//! Lifecycle controller - run, stop, unmount
//!
//! One [`Sandbox`] owns at most one container and at most one pending run.
//!
//! Containers are reused across runs. Whatever a run leaves in the
//! container's global scope (its exports included) is still there for the
//! next run, until [`Sandbox::unmount`] throws the container away. That
//! carry-over is part of the contract, not an accident: callers that want
//! a clean slate unmount first.

use crate::channel::{DisarmHandle, ResultChannel, RunOutcome};
use crate::config::{SandboxConfiguration, SandboxOptions};
use crate::container::ContainerFactory;
use crate::exports::{inject, GlobalScope, InjectionWarning};
use crate::host::{ContainerId, ContextId, Host, HostError};
use crate::permissions::compute_permissions;
use crate::wrapper;
use crate::{Result, SandboxError};
use serde_json::Value;
use uuid::Uuid;

/// The controller's relation to its container.
///
/// Only the id: once attached, the element belongs to the host document.
#[derive(Debug, Clone, Copy)]
struct SandboxInstance {
    container: ContainerId,
}

/// The controller's side of an outstanding run
#[derive(Debug)]
struct PendingRun {
    run_id: Uuid,
    bound_to: ContextId,
    disarm: DisarmHandle,
}

/// The caller's side of a started run
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    container: ContainerId,
    channel: ResultChannel,
    warnings: Vec<InjectionWarning>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn container(&self) -> ContainerId {
        self.container
    }

    /// The content context this run's outcome must come from
    pub fn context(&self) -> ContextId {
        self.channel.bound_to()
    }

    /// Exports that were refused or overwrote a global
    pub fn warnings(&self) -> &[InjectionWarning] {
        &self.warnings
    }

    /// Wait for the run to settle.
    ///
    /// `Ok(None)` means the script finished without a value.
    pub async fn outcome(mut self) -> Result<Option<Value>> {
        let outcome = self.channel.await_one_result().await;
        match outcome {
            Ok(RunOutcome::Success(value)) => {
                tracing::info!(run_id = %self.run_id, has_value = value.is_some(), "run succeeded");
                Ok(value)
            }
            Ok(RunOutcome::Failure(error)) => {
                tracing::info!(run_id = %self.run_id, error = %error, "run failed");
                Err(SandboxError::Script(error))
            }
            Err(error) => {
                tracing::debug!(run_id = %self.run_id, %error, "run did not settle");
                Err(error)
            }
        }
    }
}

/// Runs untrusted scripts in one reusable container
pub struct Sandbox<H: Host> {
    host: H,
    config: SandboxConfiguration,
    options: SandboxOptions,
    factory: ContainerFactory,
    instance: Option<SandboxInstance>,
    pending: Option<PendingRun>,
}

impl<H: Host> Sandbox<H> {
    pub fn new(host: H) -> Self {
        Self::with_config(host, SandboxConfiguration::default())
    }

    pub fn with_config(host: H, config: SandboxConfiguration) -> Self {
        Self {
            host,
            config,
            options: SandboxOptions::default(),
            factory: ContainerFactory::default(),
            instance: None,
            pending: None,
        }
    }

    pub fn with_options(mut self, options: SandboxOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &SandboxConfiguration {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SandboxConfiguration {
        &mut self.config
    }

    pub fn options(&self) -> SandboxOptions {
        self.options
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn is_mounted(&self) -> bool {
        self.instance.is_some()
    }

    pub fn container_id(&self) -> Option<ContainerId> {
        self.instance.map(|instance| instance.container)
    }

    /// The document a run of `script` would load, with the current
    /// dependencies. No side effects.
    pub fn build(&self, script: &str) -> String {
        wrapper::build(script, &self.config.dependencies)
    }

    /// Start a run.
    ///
    /// Fails immediately, before touching the host document, if the host
    /// cannot restrict capabilities. Any run still pending is disarmed
    /// first, so its late reply can never settle this one.
    pub fn run(&mut self, script: &str) -> Result<RunHandle> {
        if !self.host.supports_capability_restriction() {
            return Err(SandboxError::Configuration(
                "container primitive ignores capability lists; refusing to run unsandboxed".to_string(),
            ));
        }

        self.disarm_pending("superseded by a new run");

        let run_id = Uuid::new_v4();
        let capabilities = compute_permissions(&self.config.permissions);
        let container = self.ensure_container(capabilities)?;
        let document = self.build(script);

        // Subscribe before loading so an immediate reply is buffered
        let messages = self.host.subscribe();

        let exports = &self.config.exports;
        let safe_mode = self.options.safe_mode;
        let mut warnings = Vec::new();
        let context = self.host.load_document(container, &document, &mut |global: &mut dyn GlobalScope| {
            warnings.extend(inject(global, exports, safe_mode));
        })?;

        let (channel, disarm) = ResultChannel::arm(context, messages);
        self.pending = Some(PendingRun {
            run_id,
            bound_to: context,
            disarm,
        });

        tracing::info!(
            %run_id,
            container = %container,
            context = %context,
            warnings = warnings.len(),
            "run started"
        );

        Ok(RunHandle {
            run_id,
            container,
            channel,
            warnings,
        })
    }

    /// Run `script` and wait for its outcome
    pub async fn eval(&mut self, script: &str) -> Result<Option<Value>> {
        self.run(script)?.outcome().await
    }

    /// Blank the container and abandon any pending run.
    ///
    /// The container stays attached and is reused by the next run.
    pub fn stop(&mut self) {
        self.disarm_pending("stopped");

        if let Some(instance) = self.instance {
            if let Err(error) = self.host.blank(instance.container) {
                tracing::warn!(container = %instance.container, %error, "failed to blank container");
            }
        }
    }

    /// Remove the container from the host document.
    ///
    /// The next run starts from a brand-new container.
    pub fn unmount(&mut self) {
        self.disarm_pending("unmounted");

        if let Some(instance) = self.instance.take() {
            match self.host.detach(instance.container) {
                Ok(()) => tracing::info!(container = %instance.container, "unmounted"),
                Err(error) => tracing::warn!(container = %instance.container, %error, "failed to detach container"),
            }
        }
    }

    fn disarm_pending(&mut self, reason: &'static str) {
        if let Some(mut pending) = self.pending.take() {
            if pending.disarm.disarm() {
                tracing::warn!(
                    run_id = %pending.run_id,
                    context = %pending.bound_to,
                    reason,
                    "disarmed pending run"
                );
            }
        }
    }

    fn ensure_container(&mut self, capabilities: Vec<String>) -> Result<ContainerId> {
        if let Some(instance) = self.instance {
            match self.host.set_capabilities(instance.container, &capabilities) {
                Ok(()) => {
                    tracing::debug!(container = %instance.container, "reusing container");
                    return Ok(instance.container);
                }
                Err(HostError::NotAttached(_)) => {
                    // Removed behind our back; mount a fresh one
                    tracing::warn!(container = %instance.container, "container no longer attached, replacing");
                    self.instance = None;
                }
                Err(error) => return Err(error.into()),
            }
        }

        let mut handle = self.factory.create_container();
        handle.capabilities = capabilities;
        self.host.attach(&handle)?;
        self.instance = Some(SandboxInstance { container: handle.id });
        Ok(handle.id)
    }
}
