use crate::config::WorkerConfig;
use serde::Serialize;
use std::fmt::Display;
use std::time::Instant;

pub const DEFAULT_RESULT_MAX_LEN: usize = 200;

pub fn setup_logging(config: &WorkerConfig) {
    common::setup_logging(config.environment);
}

/// Run `f`, logging how long it took and a preview of what it returned.
///
/// Failures are logged at error level and handed back unchanged.
pub fn log_call<T, E, F>(function: &str, result_max_len: usize, f: F) -> Result<T, E>
where
    T: Serialize,
    E: Display,
    F: FnOnce() -> Result<T, E>,
{
    let start = Instant::now();
    let result = f();
    let tact_time = round4(start.elapsed().as_secs_f64());

    match &result {
        Ok(value) => {
            tracing::info!(
                function,
                result = %preview(value, result_max_len),
                tact_time,
                "success"
            );
        }
        Err(e) => {
            tracing::error!(function, tact_time, error = %e, "failure");
        }
    }

    result
}

/// JSON rendering of `value`, cut to `max_len` characters with a trailing ` ...`.
pub fn preview<T: Serialize>(value: &T, max_len: usize) -> String {
    let rendered = serde_json::to_string(value)
        .unwrap_or_else(|e| format!("<unserializable: {e}>"));

    if rendered.chars().count() < max_len {
        return rendered;
    }

    let mut cut: String = rendered.chars().take(max_len).collect();
    cut.push_str(" ...");
    cut
}

fn round4(seconds: f64) -> f64 {
    (seconds * 10_000.0).round() / 10_000.0
}
