//! Logging configuration using tracing

use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Diagnostic log file name inside the log directory
pub const LOG_FILE_NAME: &str = "droidwalk.log";

/// Initialize the logging subsystem
///
/// Diagnostics go to a daily-rotated `droidwalk.log` under `log_dir` and to
/// stderr. Level is controlled by the `DROIDWALK_LOG` environment variable;
/// otherwise `verbose` selects debug over info.
///
/// # Examples
/// ```bash
/// DROIDWALK_LOG=debug droidwalk apks/
/// DROIDWALK_LOG=droidwalk_app=trace droidwalk app.apk
/// ```
pub fn init(log_dir: &Path, verbose: bool) -> Result<()> {
    let log_dir = resolve_log_directory(log_dir);

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_env("DROIDWALK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "droidwalk={lvl},droidwalk_core={lvl},droidwalk_device={lvl},droidwalk_app={lvl},warn",
            lvl = default_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_timer(fmt::time::ChronoLocal::new("%H:%M:%S".to_string())),
        )
        .init();

    tracing::debug!("Diagnostic log: {}", log_dir.join(LOG_FILE_NAME).display());

    Ok(())
}

/// Use the requested directory, falling back to the platform data dir
fn resolve_log_directory(requested: &Path) -> PathBuf {
    if std::fs::create_dir_all(requested).is_ok() {
        return requested.to_path_buf();
    }
    let fallback = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("droidwalk")
        .join("logs");
    let _ = std::fs::create_dir_all(&fallback);
    fallback
}

/// Log the startup banner with the effective settings
pub fn banner(lines: &[String]) {
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("droidwalk starting");
    for line in lines {
        tracing::info!("{}", line);
    }
    tracing::info!("═══════════════════════════════════════════════════════");
}
