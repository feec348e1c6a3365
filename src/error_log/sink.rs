//! Console and remote sinks for log events.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use thiserror::Error;

use super::LogEvent;

/// Errors raised by remote sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The HTTP request could not be sent.
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote service answered with a non-success status.
    #[error("remote sink rejected event with status {0}")]
    Rejected(u16),

    /// Any other sink failure.
    #[error("{0}")]
    Other(String),
}

/// Synchronous sink for local diagnostics.
pub trait ConsoleSink: Send + Sync {
    /// Writes one event.
    fn write(&self, event: &LogEvent);
}

/// Console sink that emits through `tracing`.
///
/// Each event is recorded inside an `error_log` span carrying the kind, so
/// subscriber output groups lines by kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsole;

impl ConsoleSink for TracingConsole {
    fn write(&self, event: &LogEvent) {
        let record = &event.record;
        let span = tracing::error_span!("error_log", kind = %record.kind);
        let _entered = span.enter();

        tracing::error!(
            status = record.status_code,
            retryable = record.retryable,
            session_id = %event.session_id,
            "{}",
            record.message
        );
        tracing::debug!(
            context = ?record.context,
            user_id = ?event.user_id,
            url = ?event.url,
            component_stack = ?event.component_stack,
            "error details"
        );
        if let Some(cause) = &record.cause {
            tracing::debug!(cause = %cause, "original error");
        }
    }
}

/// Asynchronous sink that ships events off the client.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Delivers one event.
    async fn send(&self, event: &LogEvent) -> Result<(), SinkError>;
}

/// Remote sink that posts events as JSON to an HTTP endpoint.
pub struct HttpRemoteSink {
    client: Client,
    endpoint: String,
}

impl HttpRemoteSink {
    /// Creates a sink posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Returns the endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteSink for HttpRemoteSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, event: &LogEvent) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(event)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

/// Source of uniform draws in `[0, 1)` for sampling decisions.
pub trait Sampler: Send + Sync {
    /// Draws one value.
    fn draw(&self) -> f64;
}

/// Sampler backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn draw(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_sampler_range() {
        let sampler = RandomSampler;
        for _ in 0..1000 {
            let draw = sampler.draw();
            assert!((0.0..1.0).contains(&draw));
        }
    }

    #[test]
    fn test_http_sink_keeps_endpoint() {
        let sink = HttpRemoteSink::new("http://127.0.0.1:9/api/error-logs").unwrap();
        assert_eq!(sink.endpoint(), "http://127.0.0.1:9/api/error-logs");
        assert_eq!(sink.name(), "http");
    }

    #[test]
    fn test_sink_error_display() {
        assert_eq!(
            SinkError::Rejected(503).to_string(),
            "remote sink rejected event with status 503"
        );
    }
}
