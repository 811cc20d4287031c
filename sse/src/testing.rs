//! A deterministic in-memory transport for tests.
//!
//! Every connection it opens is recorded; tests drive it by raising open,
//! message and error events by hand. Events are delivered even after release,
//! so the consumer's own stale-event guards are what gets exercised.

use crate::error::Error;
use crate::transport::{AtomicReadyState, Connection, Release, SourceHandle, Transport};
use events::{ErrorEvent, MessageEvent, ReadyState, SourceOptions};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct FakeTransport {
    sources: Arc<Mutex<Vec<Arc<FakeSource>>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections opened so far.
    pub fn opened(&self) -> usize {
        self.sources.lock().len()
    }

    pub fn source(&self, index: usize) -> Arc<FakeSource> {
        Arc::clone(&self.sources.lock()[index])
    }

    pub fn last(&self) -> Arc<FakeSource> {
        let sources = self.sources.lock();
        Arc::clone(sources.last().expect("no connection opened"))
    }

    pub fn sources(&self) -> Vec<Arc<FakeSource>> {
        self.sources.lock().clone()
    }
}

impl Transport for FakeTransport {
    fn connect(&self, address: &str, options: SourceOptions) -> Result<Connection, Error> {
        let source = Arc::new(FakeSource {
            url: address.to_string(),
            options,
            state: AtomicReadyState::default(),
            released: AtomicBool::new(false),
        });
        self.sources.lock().push(Arc::clone(&source));

        let released = Arc::clone(&source);
        Ok(Connection::new(
            source,
            Release::new(move || released.close()),
        ))
    }
}

pub struct FakeSource {
    url: String,
    options: SourceOptions,
    state: AtomicReadyState,
    released: AtomicBool,
}

impl FakeSource {
    pub fn options(&self) -> &SourceOptions {
        &self.options
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state.load()
    }

    pub fn open(&self) {
        self.state.store(ReadyState::Open);
        self.options.dispatch_open();
    }

    pub fn message(&self, data: &str) {
        self.event("message", data);
    }

    pub fn event(&self, event_type: &str, data: &str) {
        self.options
            .dispatch_message(&MessageEvent::new(event_type, data));
    }

    /// The transport is retrying by itself.
    pub fn transient_error(&self) {
        self.state.store(ReadyState::Connecting);
        self.options
            .dispatch_error(&ErrorEvent::new(ReadyState::Connecting));
    }

    /// The transport gave up.
    pub fn terminal_error(&self) {
        self.state.store(ReadyState::Closed);
        self.options
            .dispatch_error(&ErrorEvent::new(ReadyState::Closed));
    }
}

impl SourceHandle for FakeSource {
    fn url(&self) -> &str {
        &self.url
    }

    fn ready_state(&self) -> ReadyState {
        self.state.load()
    }

    fn close(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.state.store(ReadyState::Closed);
    }
}
