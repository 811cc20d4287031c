//! The transport strategy interface.
//!
//! A transport opens one push connection for an address and hands back a
//! [`Connection`]: the handle the caller may inspect, plus the release that
//! tears it down. The direct connection ([`crate::raw::RawTransport`]) and the
//! worker-tunneled one ([`crate::proxy::WorkerTransport`]) both satisfy it, so
//! the manager never knows which one it is driving.

use crate::error::Error;
use events::{ReadyState, SourceOptions};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Read side of an open connection.
pub trait SourceHandle: Send + Sync {
    /// The address this connection was opened for.
    fn url(&self) -> &str;

    fn ready_state(&self) -> ReadyState;

    /// Closes the connection and detaches its callbacks. Idempotent.
    fn close(&self);
}

/// Opens push connections.
///
/// Implementations must open the connection before returning and must never
/// invoke the callbacks in `options` from within `connect` itself; events are
/// delivered later, from another task.
pub trait Transport: Send + Sync {
    fn connect(&self, address: &str, options: SourceOptions) -> Result<Connection, Error>;
}

impl<F> Transport for F
where
    F: Fn(&str, SourceOptions) -> Result<Connection, Error> + Send + Sync,
{
    fn connect(&self, address: &str, options: SourceOptions) -> Result<Connection, Error> {
        self(address, options)
    }
}

/// Tears a connection down. Runs at most once: either explicitly through
/// [`Release::release`] or when dropped.
pub struct Release(Option<Box<dyn FnOnce() + Send>>);

impl Release {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(release)))
    }

    pub fn release(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Release")
            .field(&if self.0.is_some() { "pending" } else { "done" })
            .finish()
    }
}

/// A handle together with its release.
pub struct Connection {
    handle: Arc<dyn SourceHandle>,
    release: Release,
}

impl Connection {
    pub fn new(handle: Arc<dyn SourceHandle>, release: Release) -> Self {
        Self { handle, release }
    }

    /// Builds a connection whose release simply closes the handle.
    pub fn closing(handle: Arc<dyn SourceHandle>) -> Self {
        let closer = Arc::clone(&handle);
        Self::new(handle, Release::new(move || closer.close()))
    }

    pub fn handle(&self) -> &Arc<dyn SourceHandle> {
        &self.handle
    }

    pub fn ready_state(&self) -> ReadyState {
        self.handle.ready_state()
    }

    pub fn release(self) {
        self.release.release();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.handle.url())
            .field("ready_state", &self.handle.ready_state())
            .finish()
    }
}

/// A [`ReadyState`] that can be shared between a handle and the task feeding it.
#[derive(Debug)]
pub struct AtomicReadyState(AtomicU8);

impl AtomicReadyState {
    pub fn new(state: ReadyState) -> Self {
        Self(AtomicU8::new(state.into()))
    }

    pub fn load(&self) -> ReadyState {
        ReadyState::try_from(self.0.load(Ordering::Acquire)).unwrap_or(ReadyState::Closed)
    }

    pub fn store(&self, state: ReadyState) {
        self.0.store(state.into(), Ordering::Release);
    }

    /// Stores `new` only if the current state is `current`.
    pub fn transition(&self, current: ReadyState, new: ReadyState) -> bool {
        self.0
            .compare_exchange(current.into(), new.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Stores `state` unless the current state is already closed.
    pub fn store_unless_closed(&self, state: ReadyState) -> bool {
        let closed: u8 = ReadyState::Closed.into();
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != closed).then_some(state.into())
            })
            .is_ok()
    }
}

impl Default for AtomicReadyState {
    fn default() -> Self {
        Self::new(ReadyState::Connecting)
    }
}
