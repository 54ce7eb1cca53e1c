//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name           | Description                                              | Key Methods        |
// |----------------|----------------------------------------------------------|--------------------|
// | RemoteResult   | A result as it travels between processes                 |                    |
// | RemoteMessage  | Serializable image of a Message                          | from_local         |
// | MessageWrap    | Envelope: correlation id + remote message                | encode, decode     |
//--------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::notice::error::BridgeError;
use crate::notice::message::{EventId, Message, Payload};
use crate::notice::result::{CallbackResult, ResultKind, ResultSlot, SyncResult};

/// A named result carried by an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteResult {
    /// Still waiting for the remote handler
    Pending,
    /// Value written by a remote handler
    Value { value: Payload },
    /// Value a remote handler returned through the callback
    Callback { handler: String, value: Payload },
}

/// Serializable image of a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub what: EventId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Payload>,
    #[serde(default)]
    pub results: BTreeMap<String, RemoteResult>,
}

impl RemoteMessage {
    /// Captures `msg` for sending. Immediate results cannot cross the boundary and are rejected.
    pub fn from_local(msg: &Message) -> Result<Self, BridgeError> {
        let mut results = BTreeMap::new();
        for (name, slot) in msg.results() {
            let remote = match slot.kind() {
                ResultKind::Immediate => return Err(BridgeError::UnsupportedResult(name)),
                ResultKind::Latch | ResultKind::RemoteLatch => RemoteResult::Pending,
                ResultKind::Callback => match slot.as_callback() {
                    Some(callback) => RemoteResult::Callback {
                        handler: callback.handler().to_owned(),
                        value: callback.value(),
                    },
                    None => RemoteResult::Pending,
                },
            };
            results.insert(name, remote);
        }
        Ok(Self {
            what: msg.what().clone(),
            body: msg.body().cloned(),
            results,
        })
    }

    /// Rebuilds a local message to dispatch on the receiving side.
    ///
    /// Pending results become capture slots that handlers fill in like any other result.
    pub fn to_local(&self) -> Message {
        let mut msg = Message::new(self.what.clone());
        if let Some(body) = &self.body {
            msg = msg.with_body(body.clone());
        }
        for (name, result) in &self.results {
            match result {
                RemoteResult::Pending => msg.set_result(name.clone(), Arc::new(SyncResult::new())),
                RemoteResult::Value { value } => {
                    let slot = Arc::new(SyncResult::new());
                    slot.set(value.clone());
                    msg.set_result(name.clone(), slot);
                }
                RemoteResult::Callback { handler, value } => {
                    msg.set_result(name.clone(), Arc::new(CallbackResult::new(handler.clone(), value.clone())))
                }
            }
        }
        msg
    }

    /// Copies every result of a dispatched local message back into this image.
    pub fn collect_results(&mut self, msg: &Message) {
        for (name, slot) in msg.results() {
            let remote = match slot.as_callback() {
                Some(callback) => RemoteResult::Callback {
                    handler: callback.handler().to_owned(),
                    value: callback.value(),
                },
                None => match slot.peek() {
                    Some(value) => RemoteResult::Value { value },
                    None => RemoteResult::Pending,
                },
            };
            self.results.insert(name, remote);
        }
    }
}

/// Envelope exchanged on the before and after topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageWrap {
    pub correlation_id: String,
    pub message: RemoteMessage,
}

impl MessageWrap {
    pub fn new(correlation_id: impl Into<String>, message: RemoteMessage) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            message,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BridgeError> {
        serde_json::to_vec(self).map_err(|e| BridgeError::Decode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BridgeError> {
        serde_json::from_slice(bytes).map_err(|e| BridgeError::Decode(e.to_string()))
    }

    pub fn to_payload(&self) -> Result<Payload, BridgeError> {
        serde_json::to_value(self).map_err(|e| BridgeError::Decode(e.to_string()))
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, BridgeError> {
        Self::deserialize(payload).map_err(|e| BridgeError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::result::AsyncResult;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_latch_results_travel_as_pending() {
        let msg = Message::new("order")
            .with_body(json!({"id": 9}))
            .with_result("total", Arc::new(AsyncResult::new()));

        let remote = RemoteMessage::from_local(&msg).unwrap();
        assert_eq!(remote.results.get("total"), Some(&RemoteResult::Pending));
        assert_eq!(remote.body, Some(json!({"id": 9})));
    }

    #[test]
    fn test_immediate_results_are_rejected() {
        let msg = Message::new("order").with_result("now", Arc::new(SyncResult::new()));
        let err = RemoteMessage::from_local(&msg).unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedResult(name) if name == "now"));
    }

    #[test]
    fn test_collect_results_after_local_dispatch() {
        let mut remote = RemoteMessage {
            what: EventId::from(3),
            body: None,
            results: BTreeMap::from([
                ("answered".to_owned(), RemoteResult::Pending),
                ("silent".to_owned(), RemoteResult::Pending),
            ]),
        };
        let local = remote.to_local();
        local.result("answered").unwrap().set(json!(42));
        local.set_callback_result("Handler", json!("cb"));

        remote.collect_results(&local);
        assert_eq!(remote.results["answered"], RemoteResult::Value { value: json!(42) });
        assert_eq!(remote.results["silent"], RemoteResult::Pending);
        assert_eq!(
            remote.results["Handler"],
            RemoteResult::Callback {
                handler: "Handler".into(),
                value: json!("cb")
            }
        );
    }

    #[test]
    fn test_envelope_wire_shape() {
        let wrap = MessageWrap::new(
            "abc",
            RemoteMessage {
                what: EventId::from("login"),
                body: Some(json!(1)),
                results: BTreeMap::from([("r".to_owned(), RemoteResult::Value { value: json!(true) })]),
            },
        );
        let value = wrap.to_payload().unwrap();
        assert_eq!(
            value,
            json!({
                "correlation_id": "abc",
                "message": {"what": "login", "body": 1, "results": {"r": {"kind": "value", "value": true}}}
            })
        );
        assert_eq!(MessageWrap::decode(&wrap.encode().unwrap()).unwrap(), wrap);
        assert!(MessageWrap::decode(b"not json").is_err());
    }
}
