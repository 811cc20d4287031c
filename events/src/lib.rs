//! Shared event vocabulary for the reactive SSE client.
//!
//! This crate provides the types every transport speaks, so that a direct
//! connection and a worker-tunneled connection look the same to their caller.
//!
//! # Types
//!
//! - **ReadyState**: CONNECTING / OPEN / CLOSED, serialized as `0 | 1 | 2`
//! - **MessageEvent** / **ErrorEvent**: what a transport raises
//! - **SourceOptions**: the callbacks and flags handed to a transport when a
//!   connection is opened
//!
//! This crate has no dependencies on internal crates (sse, transform, etc.),
//! avoiding circular dependencies.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Event type used by the server when an event carries no `event:` field.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Connection state of a push connection.
///
/// Serialized as its numeric value so it can travel inside worker protocol
/// frames unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ReadyState {
    pub fn is_closed(&self) -> bool {
        matches!(self, ReadyState::Closed)
    }
}

impl From<ReadyState> for u8 {
    fn from(state: ReadyState) -> Self {
        state as u8
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ReadyStateParseError(pub u8);

impl fmt::Display for ReadyStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid ready state {}, expected 0, 1 or 2", self.0)
    }
}

impl std::error::Error for ReadyStateParseError {}

impl TryFrom<u8> for ReadyState {
    type Error = ReadyStateParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ReadyState::Connecting),
            1 => Ok(ReadyState::Open),
            2 => Ok(ReadyState::Closed),
            other => Err(ReadyStateParseError(other)),
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadyState::Connecting => write!(f, "CONNECTING"),
            ReadyState::Open => write!(f, "OPEN"),
            ReadyState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A payload delivered by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// The `event:` name, `"message"` when the server sent none.
    pub event_type: String,
    pub data: String,
}

impl MessageEvent {
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        let event_type = event_type.into();
        Self {
            event_type: if event_type.is_empty() {
                DEFAULT_EVENT_TYPE.to_string()
            } else {
                event_type
            },
            data: data.into(),
        }
    }

    /// Returns true for unnamed events, which go to the `on_message` callback.
    pub fn is_default(&self) -> bool {
        self.event_type == DEFAULT_EVENT_TYPE
    }
}

/// An error raised by a transport.
///
/// `ready_state` is the transport's own state at the time of the error:
/// `Connecting` means the transport is retrying by itself, `Closed` means it
/// gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub ready_state: ReadyState,
    pub reason: Option<String>,
}

impl ErrorEvent {
    pub fn new(ready_state: ReadyState) -> Self {
        Self {
            ready_state,
            reason: None,
        }
    }

    pub fn with_reason(ready_state: ReadyState, reason: impl Into<String>) -> Self {
        Self {
            ready_state,
            reason: Some(reason.into()),
        }
    }

    /// The transport gave up; no transport-level retry will follow.
    pub fn is_terminal(&self) -> bool {
        self.ready_state.is_closed()
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "connection error ({}): {}", self.ready_state, reason),
            None => write!(f, "connection error ({})", self.ready_state),
        }
    }
}

pub type OpenCallback = Arc<dyn Fn() + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&MessageEvent) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&ErrorEvent) + Send + Sync>;

/// Flags and callbacks attached to one connection when it is opened.
#[derive(Clone, Default)]
pub struct SourceOptions {
    /// Send credentials (cookies, authorization) with the request.
    pub with_credentials: bool,
    pub on_open: Option<OpenCallback>,
    pub on_message: Option<MessageCallback>,
    pub on_error: Option<ErrorCallback>,
    /// Callbacks for named events, keyed by event type.
    pub events: HashMap<String, MessageCallback>,
}

impl SourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = with_credentials;
        self
    }

    pub fn on_open(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(callback));
        self
    }

    pub fn on_message(mut self, callback: impl Fn(&MessageEvent) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&ErrorEvent) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_event(
        mut self,
        event_type: impl Into<String>,
        callback: impl Fn(&MessageEvent) + Send + Sync + 'static,
    ) -> Self {
        self.events.insert(event_type.into(), Arc::new(callback));
        self
    }

    /// Names of the named events with a registered callback, sorted.
    pub fn named_events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.events.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn dispatch_open(&self) {
        if let Some(on_open) = &self.on_open {
            on_open();
        }
    }

    /// Routes a message to `on_message` or to the named-event callback for its
    /// type. Named events without a callback are dropped.
    pub fn dispatch_message(&self, event: &MessageEvent) {
        if event.is_default() {
            if let Some(on_message) = &self.on_message {
                on_message(event);
            }
        } else if let Some(callback) = self.events.get(&event.event_type) {
            callback(event);
        }
    }

    pub fn dispatch_error(&self, event: &ErrorEvent) {
        if let Some(on_error) = &self.on_error {
            on_error(event);
        }
    }
}

impl fmt::Debug for SourceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceOptions")
            .field("with_credentials", &self.with_credentials)
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("events", &self.named_events())
            .finish()
    }
}
