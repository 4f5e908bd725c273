//! Logging system configuration and initialization
//!
//! - Console output on stderr (stdout is reserved for command output)
//! - Optional daily-rolling file output
//! - Optional JSON formatting
//! - `RUST_LOG` overrides the configured level

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::Utc;
use lazy_static::lazy_static;
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;
use crate::infrastructure::config::APP_DIR_NAME;

pub const LOG_FILE_NAME: &str = "price-tracker.log";

/// Noisy dependency targets, kept quiet unless the level is `trace`
const QUIET_TARGETS: &[&str] = &[
    "reqwest=info",
    "hyper=warn",
    "hyper_util=warn",
    "h2=warn",
    "html5ever=warn",
    "selectors=warn",
];

lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

/// UTC timestamps with millisecond precision
struct UtcTimeFormatter;

impl FormatTime for UtcTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

/// Configured log directory, else `<data_local_dir>/price-tracker/logs`
pub fn get_log_directory(config: &LoggingConfig) -> PathBuf {
    config.log_dir.clone().unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
            .join(APP_DIR_NAME)
            .join("logs")
    })
}

/// Filter for the configured level, with dependency noise suppressed
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return Ok(from_env);
    }

    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| anyhow!("Invalid log level '{}': {}", config.level, e))?;

    if !config.level.to_lowercase().contains("trace") {
        for directive in QUIET_TARGETS {
            filter = filter.add_directive(directive.parse()?);
        }
        filter = filter.add_directive(format!("price_tracker_lib={}", config.level).parse()?);
    }

    Ok(filter)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(config)?;
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let console = fmt::Layer::new()
            .with_writer(std::io::stderr)
            .with_timer(UtcTimeFormatter)
            .with_target(false);
        if config.json_format {
            layers.push(console.json().boxed());
        } else {
            layers.push(console.boxed());
        }
    }

    let log_dir = get_log_directory(config);
    if config.file_output {
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;

        let (file_writer, guard) = non_blocking(rolling::daily(&log_dir, LOG_FILE_NAME));
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard registry poisoned"))?
            .push(guard);

        let file = fmt::Layer::new()
            .with_writer(file_writer)
            .with_timer(UtcTimeFormatter)
            .with_ansi(false);
        if config.json_format {
            layers.push(
                file.json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .boxed(),
            );
        } else {
            layers.push(file.with_target(false).boxed());
        }
    }

    Registry::default()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    info!(
        level = %config.level,
        file_output = config.file_output,
        "Logging initialized{}",
        if config.file_output {
            format!(" (files in {})", log_dir.display())
        } else {
            String::new()
        }
    );
    Ok(())
}
