//! The worker side of the tunneled transport.
//!
//! A [`Worker`] lives in its own execution context and owns the real
//! connections. Clients talk to it only through a [`WorkerPort`]: JSON frames
//! go in over one mpsc channel and come back over another. Each port reads the
//! worker's frames in a single place and routes them by correlation id to the
//! proxy that asked for them. Every queue is unbounded, so no frame is dropped
//! while its proxy is still listening.
//!
//! ```text
//! WorkerTransport ──► WorkerPort ── mpsc<String> ──► Worker::run
//!        ▲                                               │
//!   mpsc per id ◄── demultiplex ◄── mpsc<String> ◄───────┘
//! ```

use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::error::{Error, ErrorKind, WorkerErrorKind};
use crate::message::{MessageKind, WorkerMessage};
use crate::transport::Transport;
use events::{ReadyState, SourceOptions};
use log::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;

type Route = mpsc::UnboundedSender<WorkerMessage>;

/// Fans the worker's frames out to the proxies that are waiting for them.
struct Router {
    routes: Mutex<HashMap<ConnectionId, Route>>,
    /// Taken by the demultiplexing task once the first route is added.
    frames: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

/// Client end of the channel to a worker. Cheap to clone; every proxy on the
/// same worker shares it.
#[derive(Clone)]
pub struct WorkerPort {
    outbound: mpsc::UnboundedSender<String>,
    router: Arc<Router>,
}

impl WorkerPort {
    /// Send a frame to the worker.
    pub fn post(&self, message: &WorkerMessage) -> Result<(), Error> {
        let frame = message.encode()?;
        self.outbound
            .send(frame)
            .map_err(|_| Error::worker_disconnected())
    }

    /// Receive, in order, every frame the worker emits for `id` from now on.
    /// Must be called from within a tokio runtime.
    pub fn route(&self, id: &ConnectionId) -> mpsc::UnboundedReceiver<WorkerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.router.routes.lock().insert(id.clone(), tx);

        if let Some(frames) = self.router.frames.lock().take() {
            tokio::spawn(demultiplex(frames, Arc::clone(&self.router)));
        }
        rx
    }

    /// Stop receiving frames for `id`; frames still in flight are dropped.
    pub fn unroute(&self, id: &ConnectionId) {
        self.router.routes.lock().remove(id);
    }
}

async fn demultiplex(mut frames: mpsc::UnboundedReceiver<String>, router: Arc<Router>) {
    while let Some(frame) = frames.recv().await {
        let message = match WorkerMessage::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping undecodable frame from worker: {e}");
                continue;
            }
        };

        let route = router.routes.lock().get(message.id()).cloned();
        match route {
            Some(route) => {
                if let Err(unsent) = route.send(message) {
                    trace!("Proxy {} stopped listening", unsent.0.id());
                }
            }
            None => trace!(
                "Dropping '{}' frame for unknown connection {}",
                message.kind(),
                message.id()
            ),
        }
    }

    debug!("Worker channel closed");
    router.routes.lock().clear();
}

/// Worker end of the channel.
pub struct WorkerEndpoint {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Create a connected port/endpoint pair.
pub fn channel() -> (WorkerPort, WorkerEndpoint) {
    let (to_worker, from_clients) = mpsc::unbounded_channel();
    let (to_clients, from_worker) = mpsc::unbounded_channel();

    let port = WorkerPort {
        outbound: to_worker,
        router: Arc::new(Router {
            routes: Mutex::new(HashMap::new()),
            frames: Mutex::new(Some(from_worker)),
        }),
    };
    let endpoint = WorkerEndpoint {
        inbound: from_clients,
        outbound: to_clients,
    };
    (port, endpoint)
}

/// Owns the real connections opened on behalf of clients, keyed by
/// correlation id, and relays their events back.
pub struct Worker<T: Transport> {
    transport: T,
    registry: ConnectionRegistry,
    endpoint: WorkerEndpoint,
}

impl<T: Transport + 'static> Worker<T> {
    pub fn new(transport: T, endpoint: WorkerEndpoint) -> Self {
        Self {
            transport,
            registry: ConnectionRegistry::new(),
            endpoint,
        }
    }

    /// Run a worker as a task on the current tokio runtime.
    pub fn spawn(transport: T) -> WorkerPort {
        let (port, endpoint) = channel();
        tokio::spawn(Worker::new(transport, endpoint).run());
        port
    }

    /// Run a worker on a dedicated thread with its own single-threaded
    /// runtime, sharing nothing with the caller but the channel.
    pub fn spawn_dedicated(transport: T) -> Result<(WorkerPort, thread::JoinHandle<()>), Error>
    where
        T: Send,
    {
        let (port, endpoint) = channel();

        let handle = thread::Builder::new()
            .name("sse-worker".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to start SSE worker runtime: {e}");
                        return;
                    }
                };
                runtime.block_on(Worker::new(transport, endpoint).run());
            })
            .map_err(|e| Error::new(ErrorKind::Worker(WorkerErrorKind::Spawn)).with_source(e))?;

        Ok((port, handle))
    }

    /// Process frames until every [`WorkerPort`] has been dropped, then release
    /// all remaining connections.
    pub async fn run(mut self) {
        info!("SSE worker started");

        while let Some(frame) = self.endpoint.inbound.recv().await {
            match WorkerMessage::decode(&frame) {
                Ok(message) => self.handle(message),
                Err(e) => warn!("Dropping undecodable worker frame: {e}"),
            }
        }

        info!(
            "SSE worker stopping, releasing {} connection(s)",
            self.registry.len()
        );
        self.registry.clear();
    }

    fn handle(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Connect {
                id,
                address,
                credentials,
                named_events,
            } => {
                debug!("Worker opening connection {} to {}", id, address);
                let options = self.relay_options(
                    &id,
                    credentials.unwrap_or(false),
                    named_events.unwrap_or_default(),
                );

                match self.transport.connect(&address, options) {
                    Ok(connection) => self.registry.register(id, connection),
                    Err(e) => {
                        warn!("Worker failed to open connection {}: {}", id, e);
                        relay(
                            &self.endpoint.outbound,
                            WorkerMessage::Error {
                                id,
                                ready_state: ReadyState::Closed,
                            },
                        );
                    }
                }
            }
            WorkerMessage::Disconnect { id } => {
                if self.registry.unregister(&id) {
                    debug!("Worker released connection {}", id);
                } else {
                    trace!("Ignoring disconnect for unknown connection {}", id);
                }
            }
            other => {
                trace!(
                    "Ignoring '{}' frame sent to the worker for {}",
                    other.kind(),
                    other.id()
                );
            }
        }
    }

    /// Callbacks that turn the real connection's events into frames for `id`.
    fn relay_options(
        &self,
        id: &ConnectionId,
        with_credentials: bool,
        named_events: Vec<String>,
    ) -> SourceOptions {
        let open_tx = self.endpoint.outbound.clone();
        let open_id = id.clone();
        let message_tx = self.endpoint.outbound.clone();
        let message_id = id.clone();
        let error_tx = self.endpoint.outbound.clone();
        let error_id = id.clone();

        let mut options = SourceOptions::new()
            .with_credentials(with_credentials)
            .on_open(move || {
                relay(&open_tx, WorkerMessage::Open { id: open_id.clone() });
            })
            .on_message(move |event| {
                relay(
                    &message_tx,
                    WorkerMessage::Message {
                        id: message_id.clone(),
                        data: event.data.clone(),
                        event_type: event.event_type.clone(),
                    },
                );
            })
            .on_error(move |event| {
                relay(
                    &error_tx,
                    WorkerMessage::Error {
                        id: error_id.clone(),
                        ready_state: event.ready_state,
                    },
                );
            });

        for name in named_events {
            let tx = self.endpoint.outbound.clone();
            let id = id.clone();
            options = options.on_event(name, move |event| {
                relay(
                    &tx,
                    WorkerMessage::Message {
                        id: id.clone(),
                        data: event.data.clone(),
                        event_type: event.event_type.clone(),
                    },
                );
            });
        }

        options
    }
}

fn relay(outbound: &mpsc::UnboundedSender<String>, message: WorkerMessage) {
    match message.encode() {
        Ok(frame) => {
            // Every port is gone; the worker is about to stop.
            if outbound.send(frame).is_err() {
                trace!("No client listening for '{}' frame", message.kind());
            }
        }
        Err(e) => error!("Failed to encode '{}' frame: {e}", message.kind()),
    }
}
