//! Async retry loop for data-service requests.
//!
//! Each failure is classified and logged; the request is sent again after a
//! backoff delay while [`RetryPolicy::should_retry_request`] allows it.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::RetryPolicy;
use crate::error::{classify, Context, ErrorRecord, Failure};
use crate::error_log::ErrorLogger;

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The value, or the classification of the final failure.
    pub result: Result<T, ErrorRecord>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Total time spent, including delays.
    pub elapsed: Duration,
}

/// Runs operations under a [`RetryPolicy`], logging every failure.
#[derive(Debug, Clone, Default)]
pub struct RetryDriver {
    policy: RetryPolicy,
    context: Context,
    logger: Option<Arc<ErrorLogger>>,
}

impl RetryDriver {
    /// Creates a driver that does not log.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            context: Context::new(),
            logger: None,
        }
    }

    /// Logs failures to `logger`.
    pub fn with_logger(mut self, logger: Arc<ErrorLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Adds a context entry to every logged failure, e.g. the endpoint.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Returns the policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds or the policy stops retrying.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Failure>,
    {
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            total_attempts = attempt + 1,
                            "Request succeeded after retries"
                        );
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt + 1,
                        elapsed: start.elapsed(),
                    };
                }
                Err(e) => {
                    attempt += 1;
                    let failure: Failure = e.into();

                    let mut context = self.context.clone();
                    context.insert("attempt".to_string(), attempt.to_string());
                    if let Some(logger) = &self.logger {
                        logger.log(failure.clone(), Some(&context), None);
                    }

                    let record = classify(failure, Some(&context));
                    if !self.policy.should_retry_request(&record, attempt) {
                        warn!(
                            attempt,
                            kind = %record.kind,
                            "Request failed, not retrying"
                        );
                        return RetryOutcome {
                            result: Err(record),
                            attempts: attempt,
                            elapsed: start.elapsed(),
                        };
                    }

                    let delay = self.policy.delay_for_attempt(attempt - 1);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        kind = %record.kind,
                        "Retrying request after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Runs `operation` under `policy` without logging.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, ErrorRecord>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<Failure>,
{
    RetryDriver::new(policy.clone()).run(operation).await.result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::error_log::{ConsoleSink, Environment, LogEvent, LoggerConfig};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new().with_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_succeeds_first_time() {
        let outcome = RetryDriver::new(fast_policy())
            .run(|| async { Ok::<_, Failure>(7) })
            .await;
        assert_eq!(outcome.result.unwrap(), 7);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_retries_transient_status_then_succeeds() {
        let calls = &AtomicU32::new(0);
        let outcome = RetryDriver::new(fast_policy())
            .run(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Failure::status(503))
                } else {
                    Ok("costs")
                }
            })
            .await;
        assert_eq!(outcome.result.unwrap(), "costs");
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), ErrorRecord> = with_retry(&fast_policy(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Failure::exception("TypeError", "network down"))
        })
        .await;
        let record = result.unwrap_err();
        assert_eq!(record.kind, ErrorKind::Network);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(record.context.get("attempt"), Some(&"3".to_string()));
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), ErrorRecord> = with_retry(&fast_policy(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Failure::status(401))
        })
        .await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::Authentication);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_outside_retry_set_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let _ = with_retry(&fast_policy(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Failure::status(501))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct CapturingConsole(Mutex<Vec<LogEvent>>);

    impl ConsoleSink for CapturingConsole {
        fn write(&self, event: &LogEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test]
    async fn test_each_failure_is_logged_with_context() {
        let console = Arc::new(CapturingConsole::default());
        let logger = Arc::new(
            ErrorLogger::new(LoggerConfig::for_environment(Environment::Development))
                .with_console_sink(console.clone()),
        );
        let driver = RetryDriver::new(fast_policy())
            .with_logger(logger)
            .with_context("endpoint", "/api/costs");

        let _ = driver
            .run(|| async { Err::<(), _>(Failure::status(500)) })
            .await;

        let events = console.0.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2].record.context.get("endpoint"),
            Some(&"/api/costs".to_string())
        );
        assert_eq!(events[0].record.context.get("attempt"), Some(&"1".to_string()));
    }

    #[test]
    fn test_driver_runs_on_blocking_executor() {
        let outcome = tokio_test::block_on(
            RetryDriver::new(fast_policy()).run(|| async { Ok::<_, Failure>(()) }),
        );
        assert_eq!(outcome.attempts, 1);
    }
}
