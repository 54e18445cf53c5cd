use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Error, Result, anyhow};
use rand::Rng;
use tracing::debug;

use crate::types::error::{S3mirrorError, is_cancelled_error};
use crate::types::token::PipelineCancellationToken;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_EXPONENT: f64 = 2.0;

// Network and connectivity errors.
const RETRYABLE_PATTERNS: &[&str] = &[
    "connection",
    "timeout",
    "temporary failure",
    "service unavailable",
    "internal error",
    "slow down",
    "throttling",
    "rate limit",
    "too many requests",
    "request timeout",
    "dial tcp",
    "connection reset",
    "connection refused",
    "no such host",
    "i/o timeout",
    "context deadline exceeded",
    "eof",
    "unexpected eof",
];

// Provider-specific throttling and availability errors.
const PROVIDER_RETRYABLE_PATTERNS: &[&str] = &[
    "provisionedthroughputexceeded",
    "throttlingexception",
    "requestlimitexceeded",
    "serviceunavailable",
    "internalerror",
    "slowdown",
    "requesttimeout",
];

/// Retry behavior of one transfer operation. Immutable per operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_exponent: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_exponent: DEFAULT_BACKOFF_EXPONENT,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_delay < self.base_delay {
            return Err(anyhow!(
                "retry base delay must not exceed the maximum delay"
            ));
        }
        if self.backoff_exponent < 1.0 {
            return Err(anyhow!("retry backoff exponent must be at least 1"));
        }

        Ok(())
    }

    /// Delay before retrying after the given 0-indexed attempt:
    /// `base * exponent^attempt`, with optional ±25% jitter, clamped to
    /// `max_delay`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let mut delay = self.base_delay.as_secs_f64() * self.backoff_exponent.powi(attempt as i32);

        if self.jitter && delay > 0.0 {
            let jitter_factor = rand::thread_rng().gen_range(0.75..=1.25);
            delay *= jitter_factor;
        }

        if delay < 0.0 {
            delay = self.base_delay.as_secs_f64();
        }
        if delay > self.max_delay.as_secs_f64() {
            delay = self.max_delay.as_secs_f64();
        }

        Duration::from_secs_f64(delay)
    }
}

/// The classification is purely textual and intentionally independent of
/// SDK error types, so that wrapped and foreign errors classify the same
/// way.
pub fn is_retryable_error(e: &Error) -> bool {
    let message = format!("{e:#}").to_lowercase();

    RETRYABLE_PATTERNS
        .iter()
        .chain(PROVIDER_RETRYABLE_PATTERNS)
        .any(|pattern| message.contains(pattern))
}

/// Progress events emitted by the retry loop. The controller never logs on
/// its own; the observer decides what reaches the log sink.
#[derive(Debug, Clone)]
pub enum RetryEvent<'a> {
    Succeeded {
        operation: &'a str,
        retries: u32,
    },
    Retrying {
        operation: &'a str,
        attempt: u32,
        total_attempts: u32,
        delay: Duration,
        error: String,
    },
    NonRetryable {
        operation: &'a str,
        error: String,
    },
    Exhausted {
        operation: &'a str,
        attempts: u32,
        error: String,
    },
}

pub trait RetryObserver: Send + Sync {
    fn on_event(&self, event: RetryEvent<'_>);
}

/// Forwards retry events to the tracing subscriber at debug level.
pub struct TracingRetryObserver;

impl RetryObserver for TracingRetryObserver {
    fn on_event(&self, event: RetryEvent<'_>) {
        match event {
            RetryEvent::Succeeded { operation, retries } => {
                debug!(operation = operation, retries = retries, "operation succeeded after retries.");
            }
            RetryEvent::Retrying {
                operation,
                attempt,
                total_attempts,
                delay,
                error,
            } => {
                debug!(
                    operation = operation,
                    attempt = attempt,
                    total_attempts = total_attempts,
                    delay_millis = delay.as_millis() as u64,
                    error = error,
                    "operation failed. retrying."
                );
            }
            RetryEvent::NonRetryable { operation, error } => {
                debug!(operation = operation, error = error, "operation failed with non-retryable error.");
            }
            RetryEvent::Exhausted {
                operation,
                attempts,
                error,
            } => {
                debug!(operation = operation, attempts = attempts, error = error, "operation retries exhausted.");
            }
        }
    }
}

/// Drives an operation through retries with exponential backoff. Backoff
/// sleeps race the cancellation token and return the cancellation error
/// when it fires, not the underlying operation error.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    cancellation_token: &PipelineCancellationToken,
    observer: &dyn RetryObserver,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    observer.on_event(RetryEvent::Succeeded {
                        operation: operation_name,
                        retries: attempt,
                    });
                }
                return Ok(value);
            }
            Err(e) => {
                if is_cancelled_error(&e) {
                    return Err(e);
                }

                if !is_retryable_error(&e) {
                    observer.on_event(RetryEvent::NonRetryable {
                        operation: operation_name,
                        error: format!("{e:#}"),
                    });
                    return Err(e);
                }

                if attempt == config.max_retries {
                    last_error = Some(e);
                    break;
                }

                let delay = config.calculate_delay(attempt);
                observer.on_event(RetryEvent::Retrying {
                    operation: operation_name,
                    attempt: attempt + 1,
                    total_attempts: config.max_retries + 1,
                    delay,
                    error: format!("{e:#}"),
                });
                last_error = Some(e);

                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        return Err(anyhow!(S3mirrorError::Cancelled));
                    },
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    let attempts = config.max_retries + 1;
    let last_error = last_error.unwrap();

    observer.on_event(RetryEvent::Exhausted {
        operation: operation_name,
        attempts,
        error: format!("{last_error:#}"),
    });

    Err(last_error).with_context(|| format!("operation failed after {attempts} retries"))
}
