//! Remote sampling and delivery of the error logger.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use costpie_resilience::error::Failure;
use costpie_resilience::error_log::{
    Environment, ErrorLogger, LogEvent, LoggerConfig, RemoteSink, SinkError,
};

#[derive(Default)]
struct CountingSink {
    sent: AtomicU32,
}

#[async_trait]
impl RemoteSink for CountingSink {
    fn name(&self) -> &str {
        "counting"
    }

    async fn send(&self, _event: &LogEvent) -> Result<(), SinkError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn logger_with_rate(rate: f64, sink: Arc<CountingSink>) -> ErrorLogger {
    let config = LoggerConfig::for_environment(Environment::Production)
        .with_console_enabled(false)
        .with_sample_rate(rate);
    ErrorLogger::new(config).with_remote_sink(sink)
}

async fn log_many(logger: &ErrorLogger, trials: u32) {
    let handles: Vec<_> = (0..trials)
        .filter_map(|i| logger.log(Failure::http(500, format!("trial {}", i)), None, None))
        .collect();
    for result in futures::future::join_all(handles).await {
        result.unwrap();
    }
}

#[tokio::test]
async fn test_zero_sample_rate_never_sends() {
    let sink = Arc::new(CountingSink::default());
    let logger = logger_with_rate(0.0, sink.clone());

    log_many(&logger, 1000).await;

    assert_eq!(sink.sent.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_full_sample_rate_always_sends() {
    let sink = Arc::new(CountingSink::default());
    let logger = logger_with_rate(1.0, sink.clone());

    log_many(&logger, 1000).await;

    assert_eq!(sink.sent.load(Ordering::SeqCst), 1000);
}

#[tokio::test]
async fn test_remote_disabled_never_sends() {
    let sink = Arc::new(CountingSink::default());
    let config = LoggerConfig::for_environment(Environment::Development).with_console_enabled(false);
    let logger = ErrorLogger::new(config.with_remote_enabled(false)).with_remote_sink(sink.clone());

    log_many(&logger, 50).await;

    assert_eq!(sink.sent.load(Ordering::SeqCst), 0);
}
