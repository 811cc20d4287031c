use events::{ErrorEvent, MessageEvent, SourceOptions};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use transform::TransformResult;

/// Delay used by [`ReconnectPolicy::Default`].
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Application-level reconnection after the transport gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Stay closed after a terminal error.
    #[default]
    Disabled,
    /// Retry forever, waiting [`DEFAULT_RECONNECT_DELAY`] between attempts.
    Default,
    Explicit { retries: u32, delay: Duration },
}

impl ReconnectPolicy {
    /// Budget to seed on a fresh connect. `None` means unbounded.
    pub fn initial_budget(&self) -> Option<u32> {
        match self {
            ReconnectPolicy::Disabled => Some(0),
            ReconnectPolicy::Default => None,
            ReconnectPolicy::Explicit { retries, .. } => Some(*retries),
        }
    }

    pub fn delay(&self) -> Duration {
        match self {
            ReconnectPolicy::Disabled | ReconnectPolicy::Default => DEFAULT_RECONNECT_DELAY,
            ReconnectPolicy::Explicit { delay, .. } => *delay,
        }
    }
}

/// Where to connect: a constant, or a value that may change over time.
pub enum Address {
    Fixed(String),
    Watch(watch::Receiver<String>),
}

impl Address {
    /// The address to connect to right now.
    pub fn current(&self) -> String {
        match self {
            Address::Fixed(address) => address.clone(),
            Address::Watch(rx) => rx.borrow().clone(),
        }
    }
}

impl From<&str> for Address {
    fn from(address: &str) -> Self {
        Address::Fixed(address.to_string())
    }
}

impl From<String> for Address {
    fn from(address: String) -> Self {
        Address::Fixed(address)
    }
}

impl From<watch::Receiver<String>> for Address {
    fn from(rx: watch::Receiver<String>) -> Self {
        Address::Watch(rx)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Fixed(address) => f.debug_tuple("Fixed").field(address).finish(),
            Address::Watch(rx) => f.debug_tuple("Watch").field(&*rx.borrow()).finish(),
        }
    }
}

/// Turns a raw payload into the value observers see.
pub type Transformer<T> = Arc<dyn Fn(&str) -> TransformResult<T> + Send + Sync>;

/// Everything an [`EventSource`](crate::manager::EventSource) is built from.
pub struct SseConfig<T> {
    pub(crate) address: Address,
    pub(crate) initial: T,
    pub(crate) transform: Transformer<T>,
    pub(crate) options: SourceOptions,
    pub(crate) reconnect: ReconnectPolicy,
}

impl SseConfig<String> {
    /// Text payloads, starting from an empty string.
    pub fn new(address: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
            initial: String::new(),
            transform: Arc::new(transform::text),
            options: SourceOptions::new(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl<T> SseConfig<T> {
    /// Replace the payload transform, and with it the value type.
    ///
    /// A transform that fails does not close the connection. The failure is
    /// logged as unhandled, `data` keeps its previous value and the message
    /// callbacks are skipped for that event. Wrap the transform in
    /// [`transform::safe`] or [`transform::safe_or`] to fall back to a value
    /// instead.
    pub fn with_transform<U>(
        self,
        initial: U,
        transform: impl Fn(&str) -> TransformResult<U> + Send + Sync + 'static,
    ) -> SseConfig<U> {
        SseConfig {
            address: self.address,
            initial,
            transform: Arc::new(transform),
            options: self.options,
            reconnect: self.reconnect,
        }
    }

    pub fn initial_value(mut self, initial: T) -> Self {
        self.initial = initial;
        self
    }

    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.options = self.options.with_credentials(with_credentials);
        self
    }

    pub fn on_open(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.options = self.options.on_open(callback);
        self
    }

    pub fn on_message(mut self, callback: impl Fn(&MessageEvent) + Send + Sync + 'static) -> Self {
        self.options = self.options.on_message(callback);
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&ErrorEvent) + Send + Sync + 'static) -> Self {
        self.options = self.options.on_error(callback);
        self
    }

    /// Subscribe to a named event. The subscription is kept across reconnects.
    pub fn on_event(
        mut self,
        event_type: impl Into<String>,
        callback: impl Fn(&MessageEvent) + Send + Sync + 'static,
    ) -> Self {
        self.options = self.options.on_event(event_type, callback);
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

impl<T: fmt::Debug> fmt::Debug for SseConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseConfig")
            .field("address", &self.address)
            .field("initial", &self.initial)
            .field("options", &self.options)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_budgets() {
        assert_eq!(ReconnectPolicy::Disabled.initial_budget(), Some(0));
        assert_eq!(ReconnectPolicy::Default.initial_budget(), None);
        assert_eq!(ReconnectPolicy::Default.delay(), Duration::from_millis(3000));

        let explicit = ReconnectPolicy::Explicit {
            retries: 2,
            delay: Duration::from_millis(100),
        };
        assert_eq!(explicit.initial_budget(), Some(2));
        assert_eq!(explicit.delay(), Duration::from_millis(100));
    }

    #[test]
    fn watched_address_reads_the_latest_value() {
        let (tx, rx) = watch::channel("http://localhost/a".to_string());
        let address = Address::from(rx);
        assert_eq!(address.current(), "http://localhost/a");

        tx.send("http://localhost/b".to_string()).unwrap();
        assert_eq!(address.current(), "http://localhost/b");
    }

    #[test]
    fn with_transform_keeps_callbacks_and_policy() {
        let config = SseConfig::new("http://localhost/events")
            .with_credentials(true)
            .on_event("tick", |_| {})
            .reconnect(ReconnectPolicy::Default)
            .with_transform(0.0, transform::number);

        assert!(config.options.with_credentials);
        assert_eq!(config.options.named_events(), vec!["tick"]);
        assert_eq!(config.reconnect, ReconnectPolicy::Default);
        assert_eq!((config.transform)("42").unwrap(), 42.0);
    }
}
