//! Reactive Server-Sent Events (SSE) client.
//!
//! This crate opens long-lived SSE connections and exposes them as observable
//! values: the latest transformed payload, the latest error and the ready
//! state, each backed by a `tokio::sync::watch` channel.
//!
//! # Architecture
//!
//! - **Pluggable transports**: the manager drives any [`Transport`]. The
//!   direct one ([`RawTransport`]) opens the HTTP stream itself; the tunneled
//!   one ([`WorkerTransport`]) asks a [`Worker`] in another execution context
//!   to do it and relays the events back.
//! - **Correlated frames**: many logical connections share one worker channel.
//!   Every [`WorkerMessage`] carries the correlation id of its connection, and
//!   frames for unknown ids are dropped on both sides.
//! - **Two layers of reconnection**: the transport retries transient failures
//!   on its own. Only when it gives up does the manager apply its
//!   [`ReconnectPolicy`].
//! - **Scoped lifetime**: dropping an [`EventSource`] releases its connection
//!   and cancels any pending reconnect.
//!
//! # Connection states
//!
//! ```text
//! CONNECTING ──open──► OPEN
//!     │                  │
//!     └──terminal error──┴──► CLOSED ──(budget left, after delay)──► CONNECTING
//! ```
//!
//! Transient errors are recorded but never change the state.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::Value;
//! use sse::{EventSource, RawTransport, ReconnectPolicy, SseConfig};
//!
//! let config = SseConfig::new("http://localhost:4000/events")
//!     .reconnect(ReconnectPolicy::Default)
//!     .with_transform(Value::Null, transform::safe_or(transform::json, Value::Null));
//!
//! let source = EventSource::new(config, RawTransport::new())?;
//! let mut data = source.subscribe_data();
//! while data.changed().await.is_ok() {
//!     println!("{}", *data.borrow());
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod message;
pub mod proxy;
pub mod raw;
pub mod transport;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Address, ReconnectPolicy, SseConfig};
pub use connection::ConnectionId;
pub use error::Error;
pub use manager::EventSource;
pub use message::WorkerMessage;
pub use proxy::WorkerTransport;
pub use raw::{RawTransport, RawTransportConfig};
pub use transport::{Connection, SourceHandle, Transport};
pub use worker::{Worker, WorkerPort};
