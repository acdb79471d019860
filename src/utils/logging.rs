use std::sync::Once;

use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, fmt::time::UtcTime, EnvFilter};

static INIT: Once = Once::new();

/// Logging configuration options
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when `RUST_LOG` is unset
    pub level: Level,
    /// Whether to include source code locations
    pub source_location: bool,
    /// Whether to colorize output
    pub ansi: bool,
    /// Whether to prefix lines with an RFC 3339 UTC timestamp
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            source_location: false,
            ansi: true,
            timestamps: true,
        }
    }
}

/// Initialize logging system. Logs go to stderr; stdout carries the report.
///
/// Only the first call installs a subscriber, later calls are no-ops.
pub fn setup_logging(config: LogConfig) -> Result<(), String> {
    let mut result = Ok(());

    INIT.call_once(|| {
        result = setup_logging_internal(config);
    });

    result
}

fn setup_logging_internal(config: LogConfig) -> Result<(), String> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_ansi(config.ansi);

    let result = if config.timestamps {
        builder.with_timer(UtcTime::rfc_3339()).try_init()
    } else {
        builder.without_time().try_init()
    };
    result.map_err(|e| format!("Failed to set global subscriber: {}", e))
}
