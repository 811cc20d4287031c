use crate::connection::ConnectionId;
use crate::error::Error;
use events::ReadyState;
use serde::{Deserialize, Serialize};

/// Trait for getting the protocol name of a worker message
pub trait MessageKind {
    fn kind(&self) -> &'static str;
}

/// Frames exchanged between a client context and a worker context.
///
/// Every frame carries the correlation id of the logical connection it belongs
/// to; that id is the only thing that lets many connections share one channel.
/// There is no version field, so both ends must be built from this definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    // Client -> Worker
    #[serde(rename_all = "camelCase")]
    Connect {
        id: ConnectionId,
        address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<bool>,
        /// Names of the named events to relay. Callbacks never cross the
        /// boundary, only the names do.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        named_events: Option<Vec<String>>,
    },
    Disconnect {
        id: ConnectionId,
    },

    // Worker -> Client
    Open {
        id: ConnectionId,
    },
    #[serde(rename_all = "camelCase")]
    Message {
        id: ConnectionId,
        data: String,
        event_type: String,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        id: ConnectionId,
        ready_state: ReadyState,
    },
}

impl WorkerMessage {
    /// Correlation id of the connection this frame belongs to.
    pub fn id(&self) -> &ConnectionId {
        match self {
            WorkerMessage::Connect { id, .. }
            | WorkerMessage::Disconnect { id }
            | WorkerMessage::Open { id }
            | WorkerMessage::Message { id, .. }
            | WorkerMessage::Error { id, .. } => id,
        }
    }

    pub fn encode(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(frame: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(frame)?)
    }
}

impl MessageKind for WorkerMessage {
    fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::Connect { .. } => "connect",
            WorkerMessage::Disconnect { .. } => "disconnect",
            WorkerMessage::Open { .. } => "open",
            WorkerMessage::Message { .. } => "message",
            WorkerMessage::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn id(value: &str) -> ConnectionId {
        ConnectionId::from(value)
    }

    #[test]
    fn connect_uses_camel_case_fields() {
        let message = WorkerMessage::Connect {
            id: id("c1"),
            address: "http://localhost/events".to_string(),
            credentials: Some(true),
            named_events: Some(vec!["tick".to_string()]),
        };

        let value: Value = serde_json::from_str(&message.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "connect",
                "id": "c1",
                "address": "http://localhost/events",
                "credentials": true,
                "namedEvents": ["tick"],
            })
        );
    }

    #[test]
    fn optional_connect_fields_may_be_absent() {
        let message =
            WorkerMessage::decode(r#"{"type":"connect","id":"c1","address":"http://x"}"#).unwrap();
        assert_eq!(
            message,
            WorkerMessage::Connect {
                id: id("c1"),
                address: "http://x".to_string(),
                credentials: None,
                named_events: None,
            }
        );
    }

    #[test]
    fn error_carries_numeric_ready_state() {
        let message =
            WorkerMessage::decode(r#"{"type":"error","id":"c2","readyState":2}"#).unwrap();
        assert_eq!(message.id(), &id("c2"));
        assert_eq!(message.kind(), "error");
        assert!(matches!(
            message,
            WorkerMessage::Error {
                ready_state: ReadyState::Closed,
                ..
            }
        ));
    }

    #[test]
    fn message_frames_name_their_event_type() {
        let message = WorkerMessage::Message {
            id: id("c3"),
            data: "42".to_string(),
            event_type: "tick".to_string(),
        };
        let value: Value = serde_json::from_str(&message.encode().unwrap()).unwrap();
        assert_eq!(value["eventType"], "tick");
        assert_eq!(value["type"], "message");
    }

    #[test]
    fn unknown_frames_fail_to_decode() {
        assert!(WorkerMessage::decode(r#"{"type":"subscribe","id":"c4"}"#).is_err());
        assert!(WorkerMessage::decode("not json").is_err());
    }
}
