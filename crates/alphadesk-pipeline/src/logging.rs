//! Logging setup for the pipeline binary
//!
//! Format and verbosity come from `LOG_FORMAT` and `LOG_LEVEL`; per-target
//! overrides still flow in through `RUST_LOG` via the env filter. Chatty
//! transport crates are pinned to warn so INFO stays readable.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Dependencies whose INFO/DEBUG output drowns the pipeline's own.
const QUIET_TARGETS: [&str; 3] = ["hyper", "reqwest", "sqlx"];

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for interactive use
    Pretty,
    /// JSON lines for log aggregation
    Json,
    /// Single-line output for dense terminals
    Compact,
}

impl LogFormat {
    /// Parse a `LOG_FORMAT` value; anything unrecognized means pretty.
    pub fn parse(value: &str) -> Self {
        match value {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

fn level_from_env() -> Level {
    match std::env::var("LOG_LEVEL")
        .map(|l| l.to_uppercase())
        .as_deref()
    {
        Ok("TRACE") => Level::TRACE,
        Ok("DEBUG") => Level::DEBUG,
        Ok("WARN") => Level::WARN,
        Ok("ERROR") => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging from `LOG_FORMAT` and `LOG_LEVEL`.
pub fn init_logging_from_env() {
    let format = std::env::var("LOG_FORMAT")
        .map(|f| LogFormat::parse(&f))
        .unwrap_or(LogFormat::Pretty);
    init_logging(format, level_from_env());
}

/// Initialize logging with an explicit format and default level.
pub fn init_logging(format: LogFormat, default_level: Level) {
    let mut env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    for target in QUIET_TARGETS {
        env_filter = env_filter.add_directive(format!("{target}=warn").parse().unwrap());
    }

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_span_events(FmtSpan::CLOSE))
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .compact()
                        .with_target(false)
                        .with_thread_ids(false),
                )
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_defaults_to_pretty() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("verbose"), LogFormat::Pretty);
    }
}
