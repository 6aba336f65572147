//! Logging setup for hosts embedding the agent.
//!
//! The agent crates only emit `tracing` events; the host decides where they
//! go. By default the `echo_*` crates log at the configured level while
//! transport and storage dependencies (reqwest, hyper, rusqlite) stay at
//! `warn`.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::Registry,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Crates whose events follow [`LogConfig::level`].
pub const AGENT_TARGETS: [&str; 5] = [
    "echo_common",
    "echo_net",
    "echo_cache",
    "echo_outbox",
    "echo_agent",
];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event, for log collectors.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for the agent crates.
    pub level: Level,
    pub format: LogFormat,
    /// Include source file and line.
    pub include_location: bool,
    /// Emit span enter/close events.
    pub include_span_events: bool,
    /// Extra filter directives such as `echo_cache=trace`, applied after the
    /// defaults. Invalid directives are skipped.
    pub directives: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            include_location: false,
            include_span_events: false,
            directives: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Verbose output for local development: routing decisions and cache
    /// hits become visible.
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            include_location: true,
            include_span_events: true,
            ..Default::default()
        }
    }

    /// JSON output at `info`: lifecycle transitions, drains and degraded
    /// store operations.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Filter string built from the level and extra directives.
    pub fn filter_string(&self) -> String {
        let level = self.level.to_string().to_ascii_lowercase();
        let mut parts = vec!["warn".to_string()];
        parts.extend(AGENT_TARGETS.iter().map(|t| format!("{}={}", t, level)));
        parts.extend(self.directives.iter().cloned());
        parts.join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        // RUST_LOG wins when set.
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }

        let mut filter = EnvFilter::new("warn");
        for directive in self.filter_string().split(',') {
            if let Ok(parsed) = directive.parse() {
                filter = filter.add_directive(parsed);
            }
        }
        filter
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let span_events = if self.include_span_events {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        match self.format {
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_file(self.include_location)
                .with_line_number(self.include_location)
                .with_span_events(span_events)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_target(true)
                .with_span_events(span_events)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_events(span_events)
                .boxed(),
        }
    }
}

/// Install the global subscriber.
///
/// Returns `false` when one was already installed (several hosts or tests
/// in one process).
pub fn init_logging(config: LogConfig) -> bool {
    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(config.env_filter())
        .try_init()
        .is_ok()
}
