//! Client side of the tunneled transport.
//!
//! [`WorkerTransport`] makes a connection that lives inside a [`Worker`]
//! look like a local one: each call creates a [`WorkerEventProxy`] with a fresh
//! correlation id, asks the worker to open the real connection, and replays
//! the worker's frames for that id as ordinary open/message/error callbacks.
//!
//! [`Worker`]: crate::worker::Worker

use crate::connection::ConnectionId;
use crate::error::Error;
use crate::message::{MessageKind, WorkerMessage};
use crate::transport::{AtomicReadyState, Connection, SourceHandle, Transport};
use crate::worker::WorkerPort;
use events::{ErrorEvent, MessageEvent, ReadyState, SourceOptions};
use log::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Opens connections through a worker.
#[derive(Clone)]
pub struct WorkerTransport {
    port: WorkerPort,
}

impl WorkerTransport {
    pub fn new(port: WorkerPort) -> Self {
        Self { port }
    }
}

impl Transport for WorkerTransport {
    fn connect(&self, address: &str, options: SourceOptions) -> Result<Connection, Error> {
        let proxy = Arc::new(WorkerEventProxy::new(address, self.port.clone(), options));
        proxy.start()?;
        Ok(Connection::closing(proxy))
    }
}

/// State a proxy shares with its relay task.
struct ProxyState {
    id: ConnectionId,
    ready_state: AtomicReadyState,
    handlers: Mutex<Option<Arc<SourceOptions>>>,
}

impl ProxyState {
    /// Apply one frame from the worker. Frames for other connections are
    /// ignored; returns whether this one was ours.
    ///
    /// A closed proxy stays closed, even when a frame races with [`detach`].
    ///
    /// [`detach`]: ProxyState::detach
    fn apply(&self, message: WorkerMessage) -> bool {
        if message.id() != &self.id {
            return false;
        }

        let Some(handlers) = self.handlers.lock().clone() else {
            trace!("Dropping '{}' frame for closed proxy {}", message.kind(), self.id);
            return true;
        };

        match message {
            WorkerMessage::Open { .. } => {
                if self
                    .ready_state
                    .transition(ReadyState::Connecting, ReadyState::Open)
                {
                    handlers.dispatch_open();
                }
            }
            WorkerMessage::Message {
                data, event_type, ..
            } => {
                handlers.dispatch_message(&MessageEvent::new(event_type, data));
            }
            WorkerMessage::Error { ready_state, .. } => {
                if self.ready_state.store_unless_closed(ready_state) {
                    handlers.dispatch_error(&ErrorEvent::with_reason(
                        ready_state,
                        "relayed from worker",
                    ));
                }
            }
            other => {
                trace!("Ignoring '{}' frame addressed to a proxy", other.kind());
            }
        }
        true
    }

    fn detach(&self) {
        self.handlers.lock().take();
        self.ready_state.store(ReadyState::Closed);
    }
}

/// Client-side stand-in for a connection living in a worker.
pub struct WorkerEventProxy {
    url: String,
    port: WorkerPort,
    state: Arc<ProxyState>,
    relay: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WorkerEventProxy {
    fn new(url: &str, port: WorkerPort, options: SourceOptions) -> Self {
        Self {
            url: url.to_string(),
            port,
            state: Arc::new(ProxyState {
                id: ConnectionId::new(),
                ready_state: AtomicReadyState::default(),
                handlers: Mutex::new(Some(Arc::new(options))),
            }),
            relay: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.state.id
    }

    /// Route the worker's frames for this id, then ask it to connect. Routing
    /// first means no frame for this id can be missed.
    fn start(&self) -> Result<(), Error> {
        let rx = self.port.route(&self.state.id);
        let relay = tokio::spawn(relay_frames(rx, Arc::clone(&self.state)));
        *self.relay.lock() = Some(relay);

        let handlers = self.state.handlers.lock().clone();
        let (credentials, named_events) = match handlers {
            Some(options) => (options.with_credentials, options.named_events()),
            None => (false, Vec::new()),
        };

        let connect = WorkerMessage::Connect {
            id: self.state.id.clone(),
            address: self.url.clone(),
            credentials: Some(credentials),
            named_events: Some(named_events),
        };

        if let Err(e) = self.port.post(&connect) {
            self.detach();
            return Err(e);
        }

        debug!("Opened worker connection {} to {}", self.state.id, self.url);
        Ok(())
    }

    fn detach(&self) {
        self.state.detach();
        self.port.unroute(&self.state.id);
        if let Some(relay) = self.relay.lock().take() {
            relay.abort();
        }
    }
}

async fn relay_frames(mut rx: mpsc::UnboundedReceiver<WorkerMessage>, state: Arc<ProxyState>) {
    while let Some(message) = rx.recv().await {
        state.apply(message);
    }
    debug!("Worker channel closed for proxy {}", state.id);
}

impl SourceHandle for WorkerEventProxy {
    fn url(&self) -> &str {
        &self.url
    }

    fn ready_state(&self) -> ReadyState {
        self.state.ready_state.load()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.detach();
        let disconnect = WorkerMessage::Disconnect {
            id: self.state.id.clone(),
        };
        if let Err(e) = self.port.post(&disconnect) {
            // The worker is gone, and with it the real connection.
            debug!("Could not send disconnect for {}: {}", self.state.id, e);
        }
    }
}

impl Drop for WorkerEventProxy {
    fn drop(&mut self) {
        self.close();
    }
}
