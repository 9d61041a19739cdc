//! One-shot result channel
//!
//! Listens on the page-wide message stream for the single outcome of one
//! run. Only a message from the bound context, with an opaque origin and a
//! well-formed outcome shape, settles it. Everything else is ignored.
//!
//! `Armed -> Fired` when the outcome is delivered, `Armed -> Disarmed`
//! when the run is superseded, torn down, or loses its place in the
//! stream first. Either way the listener is detached on leaving `Armed`
//! and nothing can settle the channel again.

use crate::host::{ContextId, HostMessage, OPAQUE_ORIGIN};
use crate::wrapper::CHANNEL_TAG;
use crate::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, oneshot};

/// Error reported by the untrusted script.
///
/// Carried opaquely: it was produced on the untrusted side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{name}: {message}")]
pub struct ScriptError {
    pub name: String,
    pub message: String,
}

/// The single result of one run
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// `None` when the script produced no value
    Success(Option<Value>),
    Failure(ScriptError),
}

impl RunOutcome {
    pub fn into_result(self) -> std::result::Result<Option<Value>, ScriptError> {
        match self {
            RunOutcome::Success(value) => Ok(value),
            RunOutcome::Failure(error) => Err(error),
        }
    }
}

/// Why an inbound message was not accepted
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("message from {actual}, expected {expected}")]
    UnexpectedSource { expected: ContextId, actual: ContextId },

    #[error("message from non-opaque origin {0:?}")]
    UnexpectedOrigin(String),

    #[error("payload is not an outcome message")]
    NotAnOutcome,

    #[error("unknown outcome status {0:?}")]
    UnknownStatus(String),

    #[error("unexpected field {0:?} in outcome")]
    UnexpectedField(String),

    #[error("malformed outcome: {0}")]
    Malformed(&'static str),
}

fn reject_extra_fields(map: &Map<String, Value>, allowed: &[&str]) -> std::result::Result<(), ProtocolError> {
    match map.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(extra) => Err(ProtocolError::UnexpectedField(extra.clone())),
        None => Ok(()),
    }
}

/// Validate the shape of an outcome payload.
///
/// The status literal alone is not trusted: each status has a fixed set
/// of fields and the failure payload must carry string `name`/`message`.
pub fn parse_outcome(data: &Value) -> std::result::Result<RunOutcome, ProtocolError> {
    let Value::Object(map) = data else {
        return Err(ProtocolError::NotAnOutcome);
    };
    if map.get("channel").and_then(Value::as_str) != Some(CHANNEL_TAG) {
        return Err(ProtocolError::NotAnOutcome);
    }

    match map.get("status").and_then(Value::as_str) {
        Some("success") => {
            reject_extra_fields(map, &["channel", "status", "value"])?;
            Ok(RunOutcome::Success(map.get("value").cloned()))
        }
        Some("failure") => {
            reject_extra_fields(map, &["channel", "status", "error"])?;
            let error = map
                .get("error")
                .and_then(Value::as_object)
                .ok_or(ProtocolError::Malformed("failure without an error object"))?;
            reject_extra_fields(error, &["name", "message"])?;

            let name = error
                .get("name")
                .and_then(Value::as_str)
                .ok_or(ProtocolError::Malformed("error name must be a string"))?;
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .ok_or(ProtocolError::Malformed("error message must be a string"))?;

            Ok(RunOutcome::Failure(ScriptError {
                name: name.to_string(),
                message: message.to_string(),
            }))
        }
        Some(other) => Err(ProtocolError::UnknownStatus(other.to_string())),
        None => Err(ProtocolError::Malformed("missing status")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Armed,
    /// Delivered its outcome; listener detached
    Fired,
    /// Abandoned without an outcome; listener detached
    Disarmed,
}

/// Lets the lifecycle controller neutralise a channel it no longer owns
#[derive(Debug)]
pub struct DisarmHandle {
    signal: Option<oneshot::Sender<()>>,
}

impl DisarmHandle {
    /// Disarm the paired channel. Safe to call repeatedly.
    ///
    /// Returns `true` if the channel was still waiting.
    pub fn disarm(&mut self) -> bool {
        match self.signal.take() {
            Some(signal) => signal.send(()).is_ok(),
            None => false,
        }
    }
}

/// Listener for exactly one outcome from one content context
#[derive(Debug)]
pub struct ResultChannel {
    bound_to: ContextId,
    state: ChannelState,
    messages: Option<broadcast::Receiver<HostMessage>>,
    disarm: Option<oneshot::Receiver<()>>,
}

impl ResultChannel {
    /// Arm a channel bound to `bound_to`.
    ///
    /// `messages` should be subscribed before the document is loaded so
    /// an early reply is buffered rather than missed.
    pub fn arm(bound_to: ContextId, messages: broadcast::Receiver<HostMessage>) -> (Self, DisarmHandle) {
        let (signal, disarm) = oneshot::channel();
        let channel = Self {
            bound_to,
            state: ChannelState::Armed,
            messages: Some(messages),
            disarm: Some(disarm),
        };
        (channel, DisarmHandle { signal: Some(signal) })
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn bound_to(&self) -> ContextId {
        self.bound_to
    }

    fn check(&self, message: &HostMessage) -> std::result::Result<RunOutcome, ProtocolError> {
        if message.source != self.bound_to {
            return Err(ProtocolError::UnexpectedSource {
                expected: self.bound_to,
                actual: message.source,
            });
        }
        if message.origin != OPAQUE_ORIGIN {
            return Err(ProtocolError::UnexpectedOrigin(message.origin.clone()));
        }
        parse_outcome(&message.data)
    }

    fn detach(&mut self, state: ChannelState) {
        self.messages = None;
        self.disarm = None;
        self.state = state;
    }

    /// Offer one inbound message.
    ///
    /// Returns the outcome if the message settles the channel. Rejected
    /// messages leave it armed.
    pub fn offer(&mut self, message: &HostMessage) -> Option<RunOutcome> {
        if self.state != ChannelState::Armed {
            return None;
        }

        match self.check(message) {
            Ok(outcome) => {
                tracing::debug!(context = %self.bound_to, "result channel fired");
                self.detach(ChannelState::Fired);
                Some(outcome)
            }
            Err(ProtocolError::UnexpectedSource { .. }) => {
                // Another sandbox's traffic on the shared stream.
                None
            }
            Err(error) => {
                tracing::debug!(context = %self.bound_to, %error, "ignoring inbound message");
                None
            }
        }
    }

    /// Wait for the outcome.
    ///
    /// Fails with [`SandboxError::Disarmed`] if the paired [`DisarmHandle`]
    /// fires or is dropped first, and with [`SandboxError::Lagged`] if the
    /// shared stream overflowed this listener.
    pub async fn await_one_result(&mut self) -> Result<RunOutcome> {
        loop {
            let (Some(messages), Some(disarm)) = (self.messages.as_mut(), self.disarm.as_mut()) else {
                return Err(SandboxError::Disarmed);
            };

            let received = tokio::select! {
                biased;
                _ = disarm => None,
                received = messages.recv() => Some(received),
            };

            match received {
                None => {
                    tracing::debug!(context = %self.bound_to, "result channel disarmed");
                    self.detach(ChannelState::Disarmed);
                    return Err(SandboxError::Disarmed);
                }
                Some(Ok(message)) => {
                    if let Some(outcome) = self.offer(&message) {
                        return Ok(outcome);
                    }
                }
                Some(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    // The outcome may be among the skipped messages; waiting on
                    // would leave the run pending forever.
                    tracing::warn!(context = %self.bound_to, skipped, "message stream lagged, abandoning run");
                    self.detach(ChannelState::Disarmed);
                    return Err(SandboxError::Lagged(skipped));
                }
                Some(Err(broadcast::error::RecvError::Closed)) => {
                    self.detach(ChannelState::Disarmed);
                    return Err(SandboxError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success(value: Value) -> Value {
        json!({ "channel": "veil", "status": "success", "value": value })
    }

    fn failure(name: &str, message: &str) -> Value {
        json!({ "channel": "veil", "status": "failure", "error": { "name": name, "message": message } })
    }

    #[test]
    fn test_parse_success_and_failure() {
        assert_eq!(parse_outcome(&success(json!(2))).unwrap(), RunOutcome::Success(Some(json!(2))));
        assert_eq!(
            parse_outcome(&success(Value::Null)).unwrap(),
            RunOutcome::Success(Some(Value::Null))
        );
        assert_eq!(
            parse_outcome(&json!({ "channel": "veil", "status": "success" })).unwrap(),
            RunOutcome::Success(None)
        );
        assert_eq!(
            parse_outcome(&failure("Error", "x")).unwrap(),
            RunOutcome::Failure(ScriptError {
                name: "Error".into(),
                message: "x".into()
            })
        );
    }

    #[test]
    fn test_parse_rejects_forged_shapes() {
        let forged = [
            json!(2),
            json!("success"),
            json!({ "status": "success", "value": 1 }),
            json!({ "channel": "other", "status": "success" }),
            json!({ "channel": "veil", "status": "done" }),
            json!({ "channel": "veil" }),
            json!({ "channel": "veil", "status": "success", "value": 1, "error": {} }),
            json!({ "channel": "veil", "status": "failure" }),
            json!({ "channel": "veil", "status": "failure", "error": "x" }),
            json!({ "channel": "veil", "status": "failure", "error": { "message": "x" } }),
            json!({ "channel": "veil", "status": "failure", "error": { "name": 1, "message": "x" } }),
            json!({ "channel": "veil", "status": "failure", "error": { "name": "E", "message": "x", "stack": "" } }),
        ];
        for payload in forged {
            assert!(parse_outcome(&payload).is_err(), "accepted {payload}");
        }
    }

    #[test]
    fn test_offer_filters_source_and_origin() {
        let (tx, rx) = broadcast::channel(8);
        let (mut channel, _disarm) = ResultChannel::arm(ContextId(1), rx);
        drop(tx);

        let stranger = HostMessage::from_opaque(ContextId(2), success(json!(1)));
        assert!(channel.offer(&stranger).is_none());

        let mut same_origin = HostMessage::from_opaque(ContextId(1), success(json!(1)));
        same_origin.origin = "https://host.example".into();
        assert!(channel.offer(&same_origin).is_none());

        let garbage = HostMessage::from_opaque(ContextId(1), json!({ "status": "success" }));
        assert!(channel.offer(&garbage).is_none());
        assert_eq!(channel.state(), ChannelState::Armed);

        let real = HostMessage::from_opaque(ContextId(1), success(json!(1)));
        assert_eq!(channel.offer(&real), Some(RunOutcome::Success(Some(json!(1)))));
        assert_eq!(channel.state(), ChannelState::Fired);

        // Replays can't settle twice
        assert!(channel.offer(&real).is_none());
    }

    #[tokio::test]
    async fn test_await_skips_noise_then_settles_once() {
        let (tx, rx) = broadcast::channel(8);
        let (mut channel, _disarm) = ResultChannel::arm(ContextId(5), rx);

        tx.send(HostMessage::from_opaque(ContextId(4), failure("Error", "stale"))).unwrap();
        tx.send(HostMessage::from_opaque(ContextId(5), json!("not an outcome"))).unwrap();
        tx.send(HostMessage::from_opaque(ContextId(5), failure("TypeError", "boom"))).unwrap();
        tx.send(HostMessage::from_opaque(ContextId(5), success(json!(3)))).unwrap();

        let outcome = channel.await_one_result().await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Failure(ScriptError {
                name: "TypeError".into(),
                message: "boom".into()
            })
        );
        assert_eq!(channel.state(), ChannelState::Fired);
        assert!(matches!(channel.await_one_result().await, Err(SandboxError::Disarmed)));
        assert_eq!(channel.state(), ChannelState::Fired);
    }

    #[tokio::test]
    async fn test_lagged_stream_abandons_run() {
        let (tx, rx) = broadcast::channel(2);
        let (mut channel, _disarm) = ResultChannel::arm(ContextId(7), rx);

        // The real outcome is pushed out by later traffic before the wait starts
        tx.send(HostMessage::from_opaque(ContextId(7), success(json!(1)))).unwrap();
        tx.send(HostMessage::from_opaque(ContextId(8), success(json!(2)))).unwrap();
        tx.send(HostMessage::from_opaque(ContextId(9), success(json!(3)))).unwrap();

        assert!(matches!(channel.await_one_result().await, Err(SandboxError::Lagged(1))));
        assert_eq!(channel.state(), ChannelState::Disarmed);
    }

    #[tokio::test]
    async fn test_disarm_settles_pending_wait() {
        let (tx, rx) = broadcast::channel(8);
        let (mut channel, mut disarm) = ResultChannel::arm(ContextId(9), rx);

        assert!(disarm.disarm());
        assert!(!disarm.disarm());

        // Even a buffered valid message loses to the disarm
        tx.send(HostMessage::from_opaque(ContextId(9), success(json!(1)))).unwrap();
        assert!(matches!(channel.await_one_result().await, Err(SandboxError::Disarmed)));
        assert_eq!(channel.state(), ChannelState::Disarmed);
    }

    #[tokio::test]
    async fn test_dropped_handle_disarms() {
        let (_tx, rx) = broadcast::channel(8);
        let (mut channel, disarm) = ResultChannel::arm(ContextId(3), rx);
        drop(disarm);
        assert!(matches!(channel.await_one_result().await, Err(SandboxError::Disarmed)));
    }

    #[tokio::test]
    async fn test_closed_stream_is_reported() {
        let (tx, rx) = broadcast::channel(8);
        let (mut channel, _disarm) = ResultChannel::arm(ContextId(3), rx);
        drop(tx);
        assert!(matches!(channel.await_one_result().await, Err(SandboxError::ChannelClosed)));
    }
}
