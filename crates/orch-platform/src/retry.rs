use std::thread;

use orch_core::errors::OrchError;
use tracing::warn;

use crate::config::BackoffConfig;

/// Runs the creation call `op` until it succeeds, fails with a
/// non-transient error, or the attempts of `policy` run out. Delays grow
/// exponentially up to the cap. A transient error left over after the last
/// attempt is reported as `BackendCreate`.
pub fn with_backoff<T, F>(policy: &BackoffConfig, label: &str, mut op: F) -> Result<T, OrchError>
where
    F: FnMut() -> Result<T, OrchError>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                let delay = policy.delay(attempt);
                warn!(operation = label, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                let mut err = err.into_create_failure();
                err.info_mut()
                    .context
                    .insert("attempts".to_string(), attempt.to_string());
                return Err(err);
            }
        }
    }
}
