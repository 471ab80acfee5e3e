use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::error::LinkError;

/// SQLite primary result codes worth another try.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Bounded exponential backoff with a per-attempt timeout.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 50,
            max_delay_ms: 1000,
            timeout_ms: 2000,
        }
    }
}

/// Whether a store error is transient: pool exhaustion, I/O, or SQLite
/// reporting the database as busy or locked.
pub fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => {
            let busy_code = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
                .unwrap_or(false);
            busy_code || {
                let msg = db_err.message().to_lowercase();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
        }
        _ => false,
    }
}

fn is_retryable_link_error(err: &LinkError) -> bool {
    matches!(err, LinkError::Store(e) if is_retryable(e))
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// the retry budget is spent. Each attempt is cut off after
/// `config.timeout_ms`; a final timeout surfaces as `ResolutionFailed`.
pub async fn with_retry<T, F, Fut>(
    operation_name: &str,
    config: RetryConfig,
    mut operation: F,
) -> Result<T, LinkError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LinkError>>,
{
    let timeout = Duration::from_millis(config.timeout_ms);
    let mut attempt = 0;

    loop {
        let failure = match tokio::time::timeout(timeout, operation()).await {
            Ok(Ok(value)) => {
                if attempt > 0 {
                    tracing::debug!(
                        "Operation '{}' succeeded after {} retries",
                        operation_name,
                        attempt
                    );
                }
                return Ok(value);
            }
            Ok(Err(e)) if is_retryable_link_error(&e) => e.to_string(),
            Ok(Err(e)) => return Err(e),
            Err(_elapsed) => format!("timed out after {}ms", config.timeout_ms),
        };

        if attempt >= config.max_retries {
            tracing::warn!(
                "Operation '{}' failed after {} attempts: {}",
                operation_name,
                attempt + 1,
                failure
            );
            return Err(LinkError::ResolutionFailed(format!(
                "{operation_name}: {failure}"
            )));
        }

        attempt += 1;
        let delay = backoff_delay(attempt, config.base_delay_ms, config.max_delay_ms);
        tracing::warn!(
            "Operation '{}' failed (attempt {}/{}): {}; retrying in {} ms",
            operation_name,
            attempt,
            config.max_retries + 1,
            failure,
            delay
        );
        sleep(Duration::from_millis(delay)).await;
    }
}

/// Exponential delay for the given retry (1-based), capped, plus 0-25% jitter.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let exp_delay = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp_delay.min(max_ms);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4);
    capped.saturating_add(jitter)
}
