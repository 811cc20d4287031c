use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Delay between application-level reconnects when none is configured.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

/// How incoming payloads are decoded before being displayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadFormat {
    Text,
    Json,
    Ndjson,
    Lines,
    Number,
}

#[derive(Debug, PartialEq, Eq)]
pub struct PayloadFormatParseError;

impl FromStr for PayloadFormat {
    type Err = PayloadFormatParseError;
    fn from_str(format: &str) -> Result<PayloadFormat, Self::Err> {
        match format.to_lowercase().as_str() {
            "text" => Ok(PayloadFormat::Text),
            "json" => Ok(PayloadFormat::Json),
            "ndjson" => Ok(PayloadFormat::Ndjson),
            "lines" => Ok(PayloadFormat::Lines),
            "number" => Ok(PayloadFormat::Number),
            _ => Err(PayloadFormatParseError),
        }
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PayloadFormat::Text => write!(f, "text"),
            PayloadFormat::Json => write!(f, "json"),
            PayloadFormat::Ndjson => write!(f, "ndjson"),
            PayloadFormat::Lines => write!(f, "lines"),
            PayloadFormat::Number => write!(f, "number"),
        }
    }
}

/// What the client should do after the server connection is lost for good.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectSetting {
    Disabled,
    /// Retry forever.
    Unbounded { delay: Duration },
    Limited { retries: u32, delay: Duration },
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// The URL of the server-sent events stream to follow
    #[arg(short, long, env = "SSE_URL", default_value = "http://localhost:4000/sse")]
    url: Option<String>,

    /// Send credential headers (cookie, authorization) with the request
    #[arg(long, env)]
    pub with_credentials: bool,

    /// Cookie header to send when credentials are enabled
    #[arg(long, env = "SSE_COOKIE")]
    cookie: Option<String>,

    /// Authorization header to send when credentials are enabled
    #[arg(long, env = "SSE_AUTHORIZATION")]
    authorization: Option<String>,

    /// Named event types to subscribe to, in addition to plain messages
    #[arg(
        short,
        long,
        env = "SSE_EVENTS",
        value_delimiter = ',',
        use_value_delimiter = true
    )]
    pub events: Vec<String>,

    /// How to decode each payload
    #[arg(
        short,
        long,
        env = "SSE_TRANSFORM",
        default_value_t = PayloadFormat::Text,
        value_parser = clap::builder::PossibleValuesParser::new(["text", "json", "ndjson", "lines", "number"])
            .map(|s| s.parse::<PayloadFormat>().unwrap()),
        )]
    pub transform: PayloadFormat,

    /// Number of reconnect attempts after the connection is closed. Unbounded when unset
    #[arg(short, long, env = "SSE_RETRIES")]
    pub retries: Option<u32>,

    /// Milliseconds to wait before each reconnect attempt
    #[arg(long, env = "SSE_RECONNECT_DELAY_MS", default_value_t = DEFAULT_RECONNECT_DELAY_MS)]
    pub reconnect_delay_ms: u64,

    /// Stay closed once the server connection is lost
    #[arg(long, env = "SSE_NO_RECONNECT")]
    pub no_reconnect: bool,

    /// Run the connection on a dedicated worker thread
    #[arg(short = 'w', long, env = "SSE_USE_WORKER")]
    pub use_worker: bool,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn set_url(mut self, url: String) -> Self {
        self.url = Some(url);
        self
    }

    pub fn url(&self) -> &str {
        self.url.as_deref().unwrap_or_default()
    }

    pub fn cookie(&self) -> Option<String> {
        self.cookie.clone()
    }

    pub fn authorization(&self) -> Option<String> {
        self.authorization.clone()
    }

    /// Header name/value pairs sent when credentials are enabled.
    pub fn credential_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if let Some(cookie) = self.cookie() {
            headers.push(("Cookie".to_string(), cookie));
        }
        if let Some(authorization) = self.authorization() {
            headers.push(("Authorization".to_string(), authorization));
        }
        headers
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect(&self) -> ReconnectSetting {
        if self.no_reconnect {
            return ReconnectSetting::Disabled;
        }

        match self.retries {
            Some(retries) => ReconnectSetting::Limited {
                retries,
                delay: self.reconnect_delay(),
            },
            None => ReconnectSetting::Unbounded {
                delay: self.reconnect_delay(),
            },
        }
    }
}
