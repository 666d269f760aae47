//! Tracing setup and model-dump logging.

use std::ffi::OsStr;
use std::path::Path;

use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Env var that turns on full lifecycle dumps at each stage.
pub const DEBUG_MODEL_ENV: &str = "DEBUG_MODEL";

/// Install the global subscriber: human-readable logs on stderr (stdout carries
/// the JSON records), plus a plain-text copy in `log_file` when given.
///
/// The returned guard flushes the file writer; keep it alive until exit.
pub fn init(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return None;
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .unwrap_or(OsStr::new("parcel-rerouter.log"));
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
        dir, file_name,
    ));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Some(guard)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

/// Whether `DEBUG_MODEL` is set to 1/true/yes.
pub fn model_debug_enabled() -> bool {
    std::env::var(DEBUG_MODEL_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

/// Log the serialized form of `obj` at `stage` when model debugging is on.
pub fn debug_log_model<T: Serialize>(obj: &T, stage: &str) {
    if !model_debug_enabled() {
        return;
    }
    match serde_json::to_string(obj) {
        Ok(json) => tracing::info!(stage, model = %json, "Model debug"),
        Err(e) => tracing::warn!(stage, error = %e, "Could not serialize model for debug log"),
    }
}
