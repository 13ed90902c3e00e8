use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_FILTER: &str = "cuisto=info,sqlx=warn";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives.
    pub filter: String,
    /// When set, JSON lines are also written to a daily-rolling file here.
    pub file_dir: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            file_dir: None,
            file_prefix: "cuisto.log".to_string(),
        }
    }
}

/// Flushes the file sink when dropped; hold it for the life of the process.
#[must_use]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

pub fn parse_filter(directives: &str) -> anyhow::Result<EnvFilter> {
    EnvFilter::try_new(directives).with_context(|| format!("parse log filter {directives:?}"))
}

/// Install the global subscriber: human-readable lines on stderr plus an
/// optional JSON file sink.
pub fn init(config: &LogConfig) -> anyhow::Result<LoggingGuard> {
    let filter = parse_filter(&config.filter)?;
    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(UtcTime::rfc_3339());

    let (file_layer, guard) = match &config.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    tracing::info!(
        target: "cuisto",
        event = "logging_initialized",
        filter = %config.filter,
        file_sink = config.file_dir.is_some()
    );
    Ok(LoggingGuard { _file: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        assert!(parse_filter(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn invalid_filter_is_rejected() {
        let err = parse_filter("cuisto=loud").expect_err("bad level");
        assert!(err.to_string().contains("parse log filter"));
    }
}
