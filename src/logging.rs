//! Logging setup for parley.
//!
//! `RUST_LOG` wins when set. Otherwise the configured level applies to
//! this crate and dependencies are held at `warn`.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::{ParleyError, Result};

/// Parse log level string to tracing Level. Unknown names mean `info`.
fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = parse_level(level).as_str().to_ascii_lowercase();
        EnvFilter::new(format!("warn,parley={level}"))
    })
}

/// Install the global subscriber.
///
/// With `config.file` empty only stdout is used; otherwise lines are
/// appended to that file as well.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(&config.level);

    if config.file.is_empty() {
        return tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .with(filter)
            .try_init()
            .map_err(|e| ParleyError::Config(format!("logging: {e}")));
    }

    let path = Path::new(&config.file);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let file = Arc::new(OpenOptions::new().create(true).append(true).open(path)?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout.and(file))
                .with_ansi(false)
                .with_target(false),
        )
        .with(filter)
        .try_init()
        .map_err(|e| ParleyError::Config(format!("logging: {e}")))
}

/// Console-only fallback. Does nothing if a subscriber is already set.
pub fn init_console_only(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(build_filter(level))
        .try_init();
}
