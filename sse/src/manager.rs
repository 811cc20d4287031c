//! The reactive connection manager.
//!
//! [`EventSource`] owns one logical connection: it opens it through a
//! [`Transport`], exposes the latest transformed payload, the latest error and
//! the ready state as `watch` values, and reconnects after terminal errors
//! according to its [`ReconnectPolicy`].
//!
//! Every connection it opens belongs to a generation. Callbacks carry the
//! generation they were created for, and anything arriving for an older one is
//! dropped, so a released connection can never touch the current state.

use crate::config::{Address, ReconnectPolicy, SseConfig, Transformer};
use crate::error::Error;
use crate::transport::{Connection, SourceHandle, Transport};
use events::{ErrorEvent, MessageEvent, ReadyState, SourceOptions};
use log::*;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use transform::TransformError;

struct State {
    address: String,
    generation: u64,
    connection: Option<Connection>,
    /// `None` is an unbounded budget.
    retries_remaining: Option<u32>,
    reconnect_timer: Option<JoinHandle<()>>,
    disposed: bool,
}

impl State {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.disposed && self.generation == generation
    }

    /// Release the current connection, if any, and stop accepting its events.
    fn release_connection(&mut self) {
        self.generation += 1;
        if let Some(connection) = self.connection.take() {
            connection.release();
        }
    }
}

struct Inner<T> {
    /// `None` for an inert source.
    runtime: Option<Handle>,
    transport: Option<Arc<dyn Transport>>,
    transform: Transformer<T>,
    user: SourceOptions,
    policy: ReconnectPolicy,
    state: Mutex<State>,
    data: watch::Sender<T>,
    error: watch::Sender<Option<ErrorEvent>>,
    ready_state: watch::Sender<ReadyState>,
}

impl<T> Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new(
        runtime: Option<Handle>,
        transport: Option<Arc<dyn Transport>>,
        config: SseConfig<T>,
        address: String,
        ready_state: ReadyState,
    ) -> Self {
        let SseConfig {
            initial,
            transform,
            options,
            reconnect,
            ..
        } = config;

        Self {
            runtime,
            transport,
            transform,
            user: options,
            policy: reconnect,
            state: Mutex::new(State {
                address,
                generation: 0,
                connection: None,
                retries_remaining: Some(0),
                reconnect_timer: None,
                disposed: false,
            }),
            data: watch::Sender::new(initial),
            error: watch::Sender::new(None),
            ready_state: watch::Sender::new(ready_state),
        }
    }

    /// Callbacks handed to the transport for one generation.
    fn source_options(self: &Arc<Self>, generation: u64) -> SourceOptions {
        let weak = Arc::downgrade(self);

        let on_open = weak.clone();
        let on_message = weak.clone();
        let on_error = weak.clone();

        let mut options = SourceOptions::new()
            .with_credentials(self.user.with_credentials)
            .on_open(move || {
                if let Some(inner) = on_open.upgrade() {
                    inner.handle_open(generation);
                }
            })
            .on_message(move |event| {
                if let Some(inner) = on_message.upgrade() {
                    inner.deliver_message(generation, event);
                }
            })
            .on_error(move |event| {
                if let Some(inner) = on_error.upgrade() {
                    inner.handle_error(generation, event);
                }
            });

        for name in self.user.named_events() {
            let weak = weak.clone();
            options = options.on_event(name, move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.deliver_message(generation, event);
                }
            });
        }

        options
    }

    /// Replace the current connection with a new one to `address`.
    fn open_locked(self: &Arc<Self>, state: &mut State, address: &str) -> Result<(), Error> {
        state.release_connection();
        state.address = address.to_string();
        self.ready_state.send_replace(ReadyState::Connecting);

        let Some(transport) = &self.transport else {
            self.ready_state.send_replace(ReadyState::Closed);
            return Ok(());
        };

        // Transports spawn their connection tasks, and callers may not be on
        // the runtime thread.
        let _runtime = self.runtime.as_ref().map(Handle::enter);

        let options = self.source_options(state.generation);
        match transport.connect(address, options) {
            Ok(connection) => {
                debug!(
                    "Connecting to {} (generation {})",
                    address, state.generation
                );
                state.connection = Some(connection);
                Ok(())
            }
            Err(e) => {
                self.ready_state.send_replace(ReadyState::Closed);
                Err(e)
            }
        }
    }

    /// A caller-initiated connect: cancels any pending reconnect and reseeds
    /// the retry budget.
    fn fresh_connect_locked(
        self: &Arc<Self>,
        state: &mut State,
        address: &str,
    ) -> Result<(), Error> {
        state.cancel_timer();
        state.retries_remaining = self.policy.initial_budget();
        self.open_locked(state, address)
    }

    fn connect(self: &Arc<Self>, address: &str) -> Result<(), Error> {
        if self.is_inert() {
            return Ok(());
        }

        let mut state = self.state.lock();
        if state.disposed {
            return Ok(());
        }

        let result = self.fresh_connect_locked(&mut state, address);
        if let Err(e) = &result {
            warn!("Failed to connect to {}: {}", address, e);
            self.error.send_replace(Some(ErrorEvent::with_reason(
                ReadyState::Closed,
                e.to_string(),
            )));
        }
        result
    }

    fn update_address(self: &Arc<Self>, address: &str) -> Result<(), Error> {
        if self.state.lock().address == address {
            trace!("Address unchanged, keeping connection to {}", address);
            return Ok(());
        }

        info!("Address changed, connecting to {}", address);
        self.connect(address)
    }

    fn reconnect(self: &Arc<Self>) -> Result<(), Error> {
        if self.is_inert() {
            return Ok(());
        }

        self.close();
        let address = self.state.lock().address.clone();
        self.connect(&address)
    }

    fn handle_open(&self, generation: u64) {
        {
            let state = self.state.lock();
            if !state.is_current(generation) {
                trace!("Ignoring open from released generation {}", generation);
                return;
            }
            if self.ready_state.borrow().is_closed() {
                return;
            }

            info!("Connection to {} is open", state.address);
            self.ready_state.send_replace(ReadyState::Open);
            self.error.send_replace(None);
        }

        self.user.dispatch_open();
    }

    fn deliver_message(&self, generation: u64, event: &MessageEvent) {
        if let Err(e) = self.handle_message(generation, event) {
            error!(
                "Unhandled failure transforming '{}' event: {}",
                event.event_type, e
            );
        }
    }

    fn handle_message(
        &self,
        generation: u64,
        event: &MessageEvent,
    ) -> Result<(), TransformError> {
        {
            let state = self.state.lock();
            if !state.is_current(generation) {
                trace!("Ignoring message from released generation {}", generation);
                return Ok(());
            }

            let value = (self.transform)(&event.data)?;
            self.data.send_replace(value);
        }

        self.user.dispatch_message(event);
        Ok(())
    }

    fn handle_error(self: &Arc<Self>, generation: u64, event: &ErrorEvent) {
        {
            let mut state = self.state.lock();
            if !state.is_current(generation) {
                trace!("Ignoring error from released generation {}", generation);
                return;
            }

            self.error.send_replace(Some(event.clone()));

            if event.is_terminal() {
                warn!("Connection to {} closed: {}", state.address, event);
                self.ready_state.send_replace(ReadyState::Closed);
                self.schedule_reconnect_locked(&mut state);
            } else {
                debug!("Transient error on {}: {}", state.address, event);
            }
        }

        self.user.dispatch_error(event);
    }

    /// Spend one retry, if any is left, on a reconnect after the policy delay.
    fn schedule_reconnect_locked(self: &Arc<Self>, state: &mut State) {
        if state.reconnect_timer.is_some() {
            return;
        }

        match state.retries_remaining {
            Some(0) => {
                debug!("No reconnect attempts left for {}", state.address);
                return;
            }
            Some(n) => state.retries_remaining = Some(n - 1),
            None => {}
        }

        let Some(runtime) = &self.runtime else {
            return;
        };

        let delay = self.policy.delay();
        let generation = state.generation;
        let weak = Arc::downgrade(self);

        debug!("Reconnecting to {} in {:?}", state.address, delay);
        state.reconnect_timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire_reconnect(generation);
            }
        }));
    }

    /// Reopen the same address without reseeding the retry budget.
    fn fire_reconnect(self: &Arc<Self>, generation: u64) {
        let failure = {
            let mut state = self.state.lock();
            if !state.is_current(generation) {
                return;
            }
            state.reconnect_timer = None;

            let address = state.address.clone();
            info!("Reconnecting to {}", address);

            match self.open_locked(&mut state, &address) {
                Ok(()) => return,
                Err(e) => {
                    warn!("Reconnect to {} failed: {}", address, e);
                    let event = ErrorEvent::with_reason(ReadyState::Closed, e.to_string());
                    self.error.send_replace(Some(event.clone()));
                    self.schedule_reconnect_locked(&mut state);
                    event
                }
            }
        };

        self.user.dispatch_error(&failure);
    }
}

impl<T> Inner<T> {
    fn is_inert(&self) -> bool {
        self.transport.is_none()
    }

    fn close(&self) {
        if self.is_inert() {
            return;
        }

        let mut state = self.state.lock();
        state.cancel_timer();
        state.retries_remaining = Some(0);
        state.release_connection();
        self.ready_state.send_replace(ReadyState::Closed);
        debug!("Closed connection to {}", state.address);
    }

    fn dispose(&self) {
        let mut state = self.state.lock();
        state.disposed = true;
        state.cancel_timer();
        state.release_connection();
    }
}

/// Reconnect whenever the watched address changes.
async fn watch_address<T>(mut rx: watch::Receiver<String>, inner: Weak<Inner<T>>)
where
    T: Clone + Send + Sync + 'static,
{
    while rx.changed().await.is_ok() {
        let address = rx.borrow_and_update().clone();
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Err(e) = inner.update_address(&address) {
            warn!("Failed to follow address change to {}: {}", address, e);
        }
    }
}

/// A reactive server-sent events connection.
///
/// The connection is opened before the constructor returns. Dropping the
/// source releases it, cancels any pending reconnect and stops following the
/// address; nothing is observable afterwards.
pub struct EventSource<T> {
    inner: Arc<Inner<T>>,
    watcher: Option<JoinHandle<()>>,
}

impl<T> EventSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Connect with `transport`. Outside a tokio runtime there is nothing to
    /// run the connection on, and an inert source is returned instead.
    pub fn new(config: SseConfig<T>, transport: impl Transport + 'static) -> Result<Self, Error> {
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(
        config: SseConfig<T>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, Error> {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No tokio runtime available, event source will stay closed");
            return Ok(Self::inert(config));
        };

        let (address, address_rx) = match &config.address {
            Address::Fixed(address) => (address.clone(), None),
            Address::Watch(rx) => {
                let mut rx = rx.clone();
                let address = rx.borrow_and_update().clone();
                (address, Some(rx))
            }
        };

        let inner = Arc::new(Inner::new(
            Some(runtime.clone()),
            Some(transport),
            config,
            address.clone(),
            ReadyState::Connecting,
        ));

        {
            let mut state = inner.state.lock();
            inner.fresh_connect_locked(&mut state, &address)?;
        }

        let watcher =
            address_rx.map(|rx| runtime.spawn(watch_address(rx, Arc::downgrade(&inner))));

        Ok(Self { inner, watcher })
    }

    /// A source that never connects: closed, holding its initial value, with
    /// `close` and `reconnect` doing nothing.
    pub fn inert(config: SseConfig<T>) -> Self {
        let address = config.address.current();
        Self {
            inner: Arc::new(Inner::new(None, None, config, address, ReadyState::Closed)),
            watcher: None,
        }
    }

    pub fn is_inert(&self) -> bool {
        self.inner.is_inert()
    }

    /// Handle of the current connection, if one is open.
    pub fn source(&self) -> Option<Arc<dyn SourceHandle>> {
        let state = self.inner.state.lock();
        state
            .connection
            .as_ref()
            .map(|connection| Arc::clone(connection.handle()))
    }

    /// The latest transformed payload, or the initial value.
    pub fn data(&self) -> T {
        self.inner.data.borrow().clone()
    }

    pub fn error(&self) -> Option<ErrorEvent> {
        self.inner.error.borrow().clone()
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.inner.ready_state.borrow()
    }

    /// The address of the current (or last) connection.
    pub fn address(&self) -> String {
        self.inner.state.lock().address.clone()
    }

    pub fn subscribe_data(&self) -> watch::Receiver<T> {
        self.inner.data.subscribe()
    }

    pub fn subscribe_error(&self) -> watch::Receiver<Option<ErrorEvent>> {
        self.inner.error.subscribe()
    }

    pub fn subscribe_ready_state(&self) -> watch::Receiver<ReadyState> {
        self.inner.ready_state.subscribe()
    }

    /// Connect to `address`, replacing the current connection and reseeding
    /// the retry budget.
    pub fn connect(&self, address: impl AsRef<str>) -> Result<(), Error> {
        self.inner.connect(address.as_ref())
    }

    /// Like [`connect`](Self::connect), but a no-op when `address` is the
    /// current address.
    pub fn update_address(&self, address: impl AsRef<str>) -> Result<(), Error> {
        self.inner.update_address(address.as_ref())
    }

    /// Close the connection and give up any pending or future reconnects.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Close, then connect again to the current address with a fresh budget.
    pub fn reconnect(&self) -> Result<(), Error> {
        self.inner.reconnect()
    }
}

impl<T> Drop for EventSource<T> {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        self.inner.dispose();
    }
}
