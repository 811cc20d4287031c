use crate::config::Config;
use log::{LevelFilter, SetLoggerError};
use simplelog::{self, ConfigBuilder};

/// The HTTP stack under `eventsource-client` logs every poll, header and
/// reconnect at debug level. Those lines are only shown at Trace.
const FILTERED_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "hyper_rustls",
    "hyper_http_proxy",
    "hyper_timeout",
    "launchdarkly_sdk_transport",
    "eventsource_client",
    "rustls",
    "mio",
    "tokio",
];

pub struct Logger {}

impl Logger {
    /// Install the terminal logger for the client at the configured level.
    ///
    /// Stream events and state changes of this crate are logged at every
    /// level; the HTTP client's own chatter only at Trace.
    pub fn init_logger(config: &Config) -> Result<(), SetLoggerError> {
        let apply_filters = Self::should_filter_dependencies(config.log_level_filter);

        simplelog::TermLogger::init(
            Self::convert_level_filter(config.log_level_filter),
            Self::build_log_config(apply_filters),
            simplelog::TerminalMode::Mixed,
            simplelog::ColorChoice::Auto,
        )
    }

    fn convert_level_filter(level: LevelFilter) -> simplelog::LevelFilter {
        match level {
            LevelFilter::Off => simplelog::LevelFilter::Off,
            LevelFilter::Error => simplelog::LevelFilter::Error,
            LevelFilter::Warn => simplelog::LevelFilter::Warn,
            LevelFilter::Info => simplelog::LevelFilter::Info,
            LevelFilter::Debug => simplelog::LevelFilter::Debug,
            LevelFilter::Trace => simplelog::LevelFilter::Trace,
        }
    }

    fn should_filter_dependencies(level: LevelFilter) -> bool {
        level != LevelFilter::Trace
    }

    /// Timestamps are RFC 3339 so output from the worker thread and the main
    /// task can be interleaved by time.
    fn build_log_config(apply_filters: bool) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();

        if apply_filters {
            for module in FILTERED_MODULES {
                builder.add_filter_ignore_str(module);
            }
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_stack_is_filtered() {
        for module in [
            "hyper",
            "launchdarkly_sdk_transport",
            "eventsource_client",
            "rustls",
        ] {
            assert!(
                FILTERED_MODULES.contains(&module),
                "{module} should be filtered"
            );
        }
    }

    #[test]
    fn test_own_crates_are_never_filtered() {
        for module in ["sse", "transform", "events", "reactive_sse"] {
            assert!(
                !FILTERED_MODULES.iter().any(|m| module.starts_with(m)),
                "{module} should not be filtered"
            );
        }
    }

    #[test]
    fn test_only_trace_shows_dependency_logs() {
        assert!(!Logger::should_filter_dependencies(LevelFilter::Trace));
        for level in [
            LevelFilter::Off,
            LevelFilter::Error,
            LevelFilter::Warn,
            LevelFilter::Info,
            LevelFilter::Debug,
        ] {
            assert!(
                Logger::should_filter_dependencies(level),
                "{level} should filter dependencies"
            );
        }
    }

    #[test]
    fn test_build_log_config_with_and_without_filters() {
        let _filtered = Logger::build_log_config(true);
        let _unfiltered = Logger::build_log_config(false);
    }

    #[test]
    fn test_convert_level_filter_keeps_the_level() {
        for level in LevelFilter::iter() {
            assert_eq!(
                Logger::convert_level_filter(level) as usize,
                level as usize,
                "{level} converted to a different level"
            );
        }
    }
}
