//! In-memory host for tests
//!
//! Plays the part of the page and its container primitive: keeps a list
//! of attached containers, gives every load a fresh context, keeps one
//! global scope per container across loads, and only shows dialogs when
//! the container was granted `allow-modals`. Script evaluation is scripted
//! by the test through [`FakeHost::respond_with`].

use crate::container::ContainerHandle;
use crate::exports::{ExportValue, GlobalKind, GlobalScope};
use crate::host::{ContainerId, ContextId, Host, HostError, HostMessage};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::sync::broadcast;

type Responder = Box<dyn FnMut(&str, &FakeGlobals) -> Option<Value>>;

pub fn success(value: Value) -> Value {
    json!({ "channel": "veil", "status": "success", "value": value })
}

pub fn no_value() -> Value {
    json!({ "channel": "veil", "status": "success" })
}

pub fn failure(name: &str, message: &str) -> Value {
    json!({ "channel": "veil", "status": "failure", "error": { "name": name, "message": message } })
}

#[derive(Debug)]
pub struct FakeGlobals {
    values: BTreeMap<String, (GlobalKind, ExportValue)>,
}

impl FakeGlobals {
    fn new() -> Self {
        let values = ["fetch", "alert", "console", "setTimeout"]
            .into_iter()
            .map(|name| (name.to_string(), (GlobalKind::Intrinsic, ExportValue::Data(Value::Null))))
            .collect();
        Self { values }
    }

    /// An injected value, ignoring intrinsics
    pub fn get(&self, name: &str) -> Option<&ExportValue> {
        match self.values.get(name) {
            Some((GlobalKind::Export, value)) => Some(value),
            _ => None,
        }
    }
}

impl GlobalScope for FakeGlobals {
    fn lookup(&self, name: &str) -> Option<GlobalKind> {
        self.values.get(name).map(|(kind, _)| *kind)
    }

    fn define(&mut self, name: &str, value: &ExportValue) {
        self.values
            .insert(name.to_string(), (GlobalKind::Export, value.clone()));
    }
}

#[derive(Debug)]
pub struct FakeContainer {
    pub style: String,
    pub capabilities: Vec<String>,
    /// Currently loaded document and its context
    pub loaded: Option<(ContextId, String)>,
    pub globals: FakeGlobals,
}

pub struct FakeHost {
    pub restricts_capabilities: bool,
    /// Containers attached to the host document, in order
    pub document: Vec<ContainerId>,
    pub containers: BTreeMap<ContainerId, FakeContainer>,
    /// Dialogs the containers managed to open
    pub dialogs: Vec<ContextId>,
    bus: broadcast::Sender<HostMessage>,
    next_context: u64,
    responder: Responder,
}

impl FakeHost {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(64);
        Self {
            restricts_capabilities: true,
            document: Vec::new(),
            containers: BTreeMap::new(),
            dialogs: Vec::new(),
            bus,
            next_context: 1,
            responder: Box::new(|_, _| None),
        }
    }

    /// Decide what a loaded document posts back, if anything
    pub fn respond_with<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&str, &FakeGlobals) -> Option<Value> + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    /// Post a message as if `source` sent it
    pub fn post(&self, source: ContextId, data: Value) {
        let _ = self.bus.send(HostMessage::from_opaque(source, data));
    }

    fn attached(&mut self, id: ContainerId) -> Result<&mut FakeContainer, HostError> {
        if !self.document.contains(&id) {
            return Err(HostError::NotAttached(id));
        }
        self.containers.get_mut(&id).ok_or(HostError::NotAttached(id))
    }
}

impl Host for FakeHost {
    fn supports_capability_restriction(&self) -> bool {
        self.restricts_capabilities
    }

    fn attach(&mut self, container: &ContainerHandle) -> Result<(), HostError> {
        if self.document.contains(&container.id) {
            return Err(HostError::AlreadyAttached(container.id));
        }
        self.document.push(container.id);
        self.containers.insert(
            container.id,
            FakeContainer {
                style: container.style.to_css(),
                capabilities: container.capabilities.clone(),
                loaded: None,
                globals: FakeGlobals::new(),
            },
        );
        Ok(())
    }

    fn set_capabilities(&mut self, container: ContainerId, capabilities: &[String]) -> Result<(), HostError> {
        self.attached(container)?.capabilities = capabilities.to_vec();
        Ok(())
    }

    fn load_document(
        &mut self,
        container: ContainerId,
        document: &str,
        init: &mut dyn FnMut(&mut dyn GlobalScope),
    ) -> Result<ContextId, HostError> {
        let context = ContextId(self.next_context);
        self.next_context += 1;

        let slot = self.attached(container)?;
        slot.loaded = Some((context, document.to_string()));
        init(&mut slot.globals);

        let modal = slot.capabilities.iter().any(|c| c == "allow-modals");
        if modal && document.contains("alert(") {
            self.dialogs.push(context);
        }

        let globals = &self.containers[&container].globals;
        if let Some(reply) = (self.responder)(document, globals) {
            self.post(context, reply);
        }
        Ok(context)
    }

    fn blank(&mut self, container: ContainerId) -> Result<(), HostError> {
        self.attached(container)?.loaded = None;
        Ok(())
    }

    fn detach(&mut self, container: ContainerId) -> Result<(), HostError> {
        if !self.document.contains(&container) {
            return Err(HostError::NotAttached(container));
        }
        self.document.retain(|id| *id != container);
        self.containers.remove(&container);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<HostMessage> {
        self.bus.subscribe()
    }
}
