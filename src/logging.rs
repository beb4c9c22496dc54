//! Structured logging setup.
//!
//! Uses `tracing` with `tracing-subscriber`. The filter comes from
//! `STREAMGATE_LOG` (falling back to `RUST_LOG`), e.g.
//! `STREAMGATE_LOG=streamgate=debug,warn`. Output goes to stdout unless
//! `STREAMGATE_LOG_FILE` names a file, in which case it is appended there
//! and the owner can fetch the tail with the `/log` bot command.

use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "streamgate=info,warn";

/// The log file destination, when one is configured.
pub fn log_file_path() -> Option<PathBuf> {
    std::env::var_os("STREAMGATE_LOG_FILE").map(PathBuf::from)
}

/// Initialize the global subscriber once at startup. Later calls are
/// ignored, which keeps tests that race on initialization harmless.
pub fn init_from_env() {
    let filter = std::env::var("STREAMGATE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    let env_filter =
        EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if let Some(path) = log_file_path() {
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .try_init();
                return;
            }
            Err(err) => {
                eprintln!(
                    "could not open log file {}: {err}, logging to stdout",
                    path.display()
                );
            }
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}
