//! Logging setup
//!
//! Diagnostics go to a daily-rolling file under the user data directory so
//! stdout and stderr stay reserved for session output (the deployed app's
//! install and launch messages). The filter comes from `DDEMON_LOG`;
//! setting `DDEMON_LOG_STDERR=1` additionally mirrors diagnostics to stderr,
//! which is useful when the log file is out of reach.

use std::path::PathBuf;

use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

const LOG_FILE_NAME: &str = "ddemon.log";
const DEFAULT_FILTER: &str = "ddemon=info,droid_demon=info,warn";

/// Initialize logging for the process. Call once, from the binary.
///
/// ```bash
/// DDEMON_LOG=ddemon_deploy=trace ddemon run ...
/// DDEMON_LOG_STDERR=1 ddemon run ...
/// ```
pub fn init() -> Result<()> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let filter = EnvFilter::try_from_env("DDEMON_LOG")
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_layer = fmt::layer()
        .with_writer(rolling::daily(&log_dir, LOG_FILE_NAME))
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(fmt::time::ChronoLocal::new(
            "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        ));

    // Opt-in mirror; session console output owns stderr otherwise
    let stderr_layer = std::env::var_os("DDEMON_LOG_STDERR")
        .is_some()
        .then(|| fmt::layer().with_writer(std::io::stderr).with_ansi(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %log_dir.display(),
        "logging initialized"
    );

    Ok(())
}

fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("droid-demon")
        .join("logs")
}

/// Today's log file, for "see the log at ..." hints
pub fn current_log_file() -> PathBuf {
    log_directory().join(LOG_FILE_NAME)
}
