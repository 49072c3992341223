//! Bounded retry of optimistic concurrency conflicts.
use std::{future::Future, time::Duration};

use rand::Rng;
use tracing::{error, warn};

/// Backoff used when a write loses an optimistic concurrency race.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound of the delay.
    pub max_delay: Duration,
    /// Growth factor of the delay.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 5.0,
        }
    }
}

/// Reports whether the error is a 409 caused by a stale resource version.
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "Conflict")
}

/// Run `operation` until it succeeds, fails with anything but a conflict, or runs out of
/// attempts.
///
/// The operation must re-read the object it writes so every attempt works from the latest
/// resource version.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, kube::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if !is_conflict(&err) => return Err(err),
            Err(err) => {
                if attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %err,
                        "conflict retries exhausted"
                    );
                    return Err(err);
                }

                // Jitter between 0.5x and 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
                warn!(
                    operation = %operation_name,
                    attempt,
                    delay_ms = jittered.as_millis(),
                    "write conflict, retrying"
                );
                tokio::time::sleep(jittered).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
