//! Error types for the `sse` crate.
//!
//! Follows the same pattern as the other workspace crates: a root Error struct
//! holding an error kind and an optional source for chaining.
//!
//! Steady-state connection loss is never reported through this type; it is
//! observable through a source's ready state and error value instead.

use eventsource_client as es;
use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the sse crate.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the sse crate.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Transport(TransportErrorKind),
    Protocol(ProtocolErrorKind),
    Worker(WorkerErrorKind),
}

/// Errors raised while opening a connection.
#[derive(Debug, PartialEq)]
pub enum TransportErrorKind {
    /// The address or a header could not be used to build a request.
    InvalidParameter,
    /// The HTTP client could not be set up.
    Client,
    Stream,
}

/// Errors encoding or decoding worker protocol frames.
#[derive(Debug, PartialEq)]
pub enum ProtocolErrorKind {
    Encode,
    Decode,
}

/// Errors talking to the worker execution context.
#[derive(Debug, PartialEq)]
pub enum WorkerErrorKind {
    /// The worker has shut down and no longer accepts messages.
    Disconnected,
    /// The worker thread or its runtime could not be started.
    Spawn,
}

impl Error {
    pub fn new(error_kind: ErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }

    pub fn with_source(mut self, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn worker_disconnected() -> Self {
        Self::new(ErrorKind::Worker(WorkerErrorKind::Disconnected))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Transport(kind) => write!(f, "Transport error: {:?}", kind)?,
            ErrorKind::Protocol(kind) => write!(f, "Worker protocol error: {:?}", kind)?,
            ErrorKind::Worker(kind) => write!(f, "Worker error: {:?}", kind)?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({})", source)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<es::Error> for Error {
    fn from(err: es::Error) -> Self {
        let error_kind = match err {
            es::Error::InvalidParameter(_) => {
                ErrorKind::Transport(TransportErrorKind::InvalidParameter)
            }
            _ => ErrorKind::Transport(TransportErrorKind::Stream),
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        let error_kind = match err.classify() {
            serde_json::error::Category::Io => ErrorKind::Protocol(ProtocolErrorKind::Encode),
            _ => ErrorKind::Protocol(ProtocolErrorKind::Decode),
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}
