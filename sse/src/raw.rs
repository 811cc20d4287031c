//! Direct push connections backed by `eventsource-client`.
//!
//! [`RawTransport`] opens one connection per call and wires the caller's
//! callbacks to it. It carries no application policy: the only retrying done
//! here is the client library's own best-effort reconnection, during which the
//! connection reports [`ReadyState::Connecting`]. A connection is open as soon
//! as the server accepts the request, before any event arrives.

use crate::error::{Error, ErrorKind, TransportErrorKind};
use crate::transport::{AtomicReadyState, Connection, SourceHandle, Transport};
use eventsource_client::{self as es, Client};
use events::{ErrorEvent, MessageEvent, ReadyState, SourceOptions};
use futures_util::stream::StreamExt;
use launchdarkly_sdk_transport::{HttpTransport, HyperTransport};
use log::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Settings shared by every connection a [`RawTransport`] opens.
#[derive(Debug, Clone)]
pub struct RawTransportConfig {
    /// Headers sent only when a connection is opened with credentials,
    /// e.g. `Cookie` or `Authorization`.
    pub credential_headers: Vec<(String, String)>,
    /// Initial delay of the client's own reconnection.
    pub retry_delay: Duration,
    pub backoff_factor: u32,
    pub max_retry_delay: Duration,
    pub connect_timeout: Option<Duration>,
    /// Honour `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY`.
    pub use_env_proxy: bool,
}

impl Default for RawTransportConfig {
    fn default() -> Self {
        Self {
            credential_headers: Vec::new(),
            retry_delay: Duration::from_secs(1),
            backoff_factor: 2,
            max_retry_delay: Duration::from_secs(60),
            connect_timeout: Some(Duration::from_secs(10)),
            use_env_proxy: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawTransport {
    config: RawTransportConfig,
}

impl RawTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RawTransportConfig) -> Self {
        Self { config }
    }

    pub fn with_credential_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.config
            .credential_headers
            .push((name.into(), value.into()));
        self
    }

    pub fn config(&self) -> &RawTransportConfig {
        &self.config
    }

    fn http_transport(&self) -> Result<impl HttpTransport, Error> {
        let mut builder = HyperTransport::builder();
        if let Some(timeout) = self.config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if !self.config.use_env_proxy {
            builder = builder.disable_proxy();
        }

        builder.build_https().map_err(|e| {
            Error::new(ErrorKind::Transport(TransportErrorKind::Client)).with_source(e)
        })
    }
}

impl Transport for RawTransport {
    fn connect(&self, address: &str, options: SourceOptions) -> Result<Connection, Error> {
        let mut builder = es::ClientBuilder::for_url(address)?;
        if options.with_credentials {
            for (name, value) in &self.config.credential_headers {
                builder = builder.header(name, value)?;
            }
        }

        let client = builder
            .reconnect(
                es::ReconnectOptions::reconnect(true)
                    .retry_initial(false)
                    .delay(self.config.retry_delay)
                    .backoff_factor(self.config.backoff_factor)
                    .delay_max(self.config.max_retry_delay)
                    .build(),
            )
            .build_with_transport(self.http_transport()?);

        let source = Arc::new(RawSource::new(address, options));
        let state = Arc::clone(&source.state);
        let handlers = Arc::clone(&source.handlers);
        let url = address.to_string();

        debug!("Opening SSE connection to {}", url);

        let task = tokio::spawn(async move {
            let mut stream = client.stream();
            let mut opened = false;

            while let Some(item) = stream.next().await {
                match item {
                    Ok(es::SSE::Connected(details)) => {
                        opened = true;
                        if state.transition(ReadyState::Connecting, ReadyState::Open) {
                            let status = details.response().status();
                            debug!("SSE connection to {} is open ({})", url, status);
                            dispatch(&handlers, |h| h.dispatch_open());
                        }
                    }
                    Ok(es::SSE::Event(event)) => {
                        let event = MessageEvent::new(event.event_type, event.data);
                        trace!("SSE event '{}' from {}", event.event_type, url);
                        dispatch(&handlers, |h| h.dispatch_message(&event));
                    }
                    // Comments only keep the connection alive.
                    Ok(es::SSE::Comment(_)) => {}
                    Err(err) => {
                        let ready_state = if is_terminal(&err, opened) {
                            ReadyState::Closed
                        } else {
                            ReadyState::Connecting
                        };
                        if !state.store_unless_closed(ready_state) {
                            return;
                        }
                        warn!("SSE error for {} ({}): {}", url, ready_state, err);

                        let event = ErrorEvent::with_reason(ready_state, err.to_string());
                        dispatch(&handlers, |h| h.dispatch_error(&event));

                        if ready_state.is_closed() {
                            return;
                        }
                    }
                }
            }

            if !state.load().is_closed() {
                state.store(ReadyState::Closed);
                debug!("SSE stream ended for {}", url);
                let event = ErrorEvent::with_reason(ReadyState::Closed, "stream ended");
                dispatch(&handlers, |h| h.dispatch_error(&event));
            }
        });

        *source.task.lock() = Some(task);

        Ok(Connection::closing(source))
    }
}

/// Failures the client library does not recover from by itself. The first
/// request is never retried.
fn is_terminal(err: &es::Error, opened: bool) -> bool {
    !opened
        || matches!(
            err,
            es::Error::UnexpectedResponse(..)
                | es::Error::InvalidParameter(..)
                | es::Error::MalformedLocationHeader(..)
                | es::Error::MaxRedirectLimitReached(..)
        )
}

/// Calls `f` with the attached callbacks, unless they have been detached.
fn dispatch(handlers: &Mutex<Option<Arc<SourceOptions>>>, f: impl FnOnce(&SourceOptions)) {
    let attached = handlers.lock().clone();
    if let Some(options) = attached {
        f(&options);
    }
}

/// A direct connection opened by [`RawTransport`].
pub struct RawSource {
    url: String,
    state: Arc<AtomicReadyState>,
    handlers: Arc<Mutex<Option<Arc<SourceOptions>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RawSource {
    fn new(url: &str, options: SourceOptions) -> Self {
        Self {
            url: url.to_string(),
            state: Arc::new(AtomicReadyState::default()),
            handlers: Arc::new(Mutex::new(Some(Arc::new(options)))),
            task: Mutex::new(None),
        }
    }
}

impl SourceHandle for RawSource {
    fn url(&self) -> &str {
        &self.url
    }

    fn ready_state(&self) -> ReadyState {
        self.state.load()
    }

    fn close(&self) {
        self.state.store(ReadyState::Closed);
        self.handlers.lock().take();
        if let Some(task) = self.task.lock().take() {
            debug!("Closing SSE connection to {}", self.url);
            task.abort();
        }
    }
}

impl Drop for RawSource {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_address_fails_to_connect() {
        let err = RawTransport::new()
            .connect("not a url", SourceOptions::new())
            .unwrap_err();
        assert_eq!(
            err.error_kind,
            ErrorKind::Transport(TransportErrorKind::InvalidParameter)
        );
    }

    #[tokio::test]
    async fn release_before_open_detaches_callbacks() {
        let options = SourceOptions::new().on_open(|| panic!("released connection opened"));
        let connection = RawTransport::new()
            .connect("http://127.0.0.1:9/events", options)
            .unwrap();

        assert_eq!(connection.ready_state(), ReadyState::Connecting);
        let handle = Arc::clone(connection.handle());
        connection.release();

        assert_eq!(handle.ready_state(), ReadyState::Closed);
        tokio::task::yield_now().await;
    }

    #[test]
    fn every_failure_before_the_first_open_is_terminal() {
        assert!(is_terminal(&es::Error::TimedOut, false));
        assert!(!is_terminal(&es::Error::TimedOut, true));
        assert!(!is_terminal(&es::Error::Eof, true));
        assert!(is_terminal(&es::Error::MaxRedirectLimitReached(16), true));
    }

    #[test]
    fn credential_headers_accumulate() {
        let transport = RawTransport::new()
            .with_credential_header("Cookie", "id=abc")
            .with_credential_header("Authorization", "Bearer t");
        assert_eq!(transport.config().credential_headers.len(), 2);
    }
}
