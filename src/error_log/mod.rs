//! Error logging service.
//!
//! [`ErrorLogger`] classifies a failure, enriches it with session and
//! environment data into a [`LogEvent`], writes it to the console sink and
//! forwards a sample of events to a remote sink without blocking the caller.
//!
//! One logger is usually shared process-wide through [`install_global`] and
//! [`global`]. It owns the session id (fixed at construction) and the
//! signed-in user id, which the auth layer updates with
//! [`ErrorLogger::set_user_id`]. Tests build isolated instances with
//! [`ErrorLogger::new`].

pub mod config;
pub mod event;
pub mod sink;

use std::sync::{Arc, OnceLock, RwLock};

use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{classify, Context, ErrorRecord, Failure};

pub use config::{Environment, LoggerConfig, LoggerConfigError};
pub use event::LogEvent;
pub use sink::{
    ConsoleSink, HttpRemoteSink, RandomSampler, RemoteSink, Sampler, SinkError, TracingConsole,
};

static GLOBAL_LOGGER: OnceLock<Arc<ErrorLogger>> = OnceLock::new();

/// Returned when a global logger is installed twice.
#[derive(Debug, Error)]
#[error("a global error logger is already installed")]
pub struct InstallError;

/// Installs the process-wide logger.
///
/// # Errors
///
/// Returns [`InstallError`] if a logger was already installed, or if
/// [`global`] was called earlier and created the default one.
pub fn install_global(logger: ErrorLogger) -> Result<Arc<ErrorLogger>, InstallError> {
    let logger = Arc::new(logger);
    GLOBAL_LOGGER
        .set(Arc::clone(&logger))
        .map_err(|_| InstallError)?;
    Ok(logger)
}

/// Returns the process-wide logger, creating a default one on first use.
pub fn global() -> Arc<ErrorLogger> {
    Arc::clone(GLOBAL_LOGGER.get_or_init(|| Arc::new(ErrorLogger::new(LoggerConfig::default()))))
}

/// Classifies, enriches and dispatches failures.
pub struct ErrorLogger {
    config: LoggerConfig,
    session_id: String,
    user_id: RwLock<Option<String>>,
    location: RwLock<Option<String>>,
    user_agent: String,
    console: Arc<dyn ConsoleSink>,
    remote: Option<Arc<dyn RemoteSink>>,
    sampler: Arc<dyn Sampler>,
}

impl std::fmt::Debug for ErrorLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorLogger")
            .field("config", &self.config)
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id())
            .field("remote", &self.remote.as_ref().map(|sink| sink.name().to_string()))
            .finish()
    }
}

impl ErrorLogger {
    /// Creates a logger with the tracing console sink and no remote sink.
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config,
            session_id: generate_session_id(),
            user_id: RwLock::new(None),
            location: RwLock::new(None),
            user_agent: format!("costpie-resilience/{}", env!("CARGO_PKG_VERSION")),
            console: Arc::new(TracingConsole),
            remote: None,
            sampler: Arc::new(RandomSampler),
        }
    }

    /// Creates a logger and, when remote logging is enabled with an
    /// endpoint, attaches an [`HttpRemoteSink`].
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: LoggerConfig) -> Result<Self, SinkError> {
        let endpoint = config
            .remote_endpoint
            .clone()
            .filter(|_| config.remote_enabled);
        let logger = Self::new(config);
        match endpoint {
            Some(endpoint) => Ok(logger.with_remote_sink(Arc::new(HttpRemoteSink::new(endpoint)?))),
            None => Ok(logger),
        }
    }

    /// Replaces the console sink.
    pub fn with_console_sink(mut self, sink: Arc<dyn ConsoleSink>) -> Self {
        self.console = sink;
        self
    }

    /// Attaches a remote sink.
    pub fn with_remote_sink(mut self, sink: Arc<dyn RemoteSink>) -> Self {
        self.remote = Some(sink);
        self
    }

    /// Replaces the sampling source.
    pub fn with_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Overrides the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Returns the session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns the current user id.
    pub fn user_id(&self) -> Option<String> {
        self.user_id
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Sets or clears the user id attached to subsequent events.
    pub fn set_user_id(&self, user_id: Option<String>) {
        *self
            .user_id
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = user_id;
    }

    /// Sets or clears the location attached to subsequent events.
    pub fn set_location(&self, url: Option<String>) {
        *self
            .location
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = url;
    }

    /// Clears user id and location.
    pub fn reset(&self) {
        self.set_user_id(None);
        self.set_location(None);
    }

    /// Logs a failure.
    ///
    /// The console sink runs synchronously. When the event is sampled for
    /// the remote sink, delivery runs on a spawned task whose handle is
    /// returned; callers are free to drop it.
    pub fn log(
        &self,
        cause: impl Into<Failure>,
        context: Option<&Context>,
        component_stack: Option<&str>,
    ) -> Option<JoinHandle<()>> {
        let record = classify(cause, context);
        let event = self.enrich(record, component_stack);

        if self.config.console_active() {
            self.console.write(&event);
        }

        self.dispatch_remote(event)
    }

    /// Logs a failure captured by a supervision boundary.
    pub fn log_boundary(
        &self,
        failure: &Failure,
        component_stack: &str,
        context: Option<&Context>,
    ) -> Option<JoinHandle<()>> {
        let mut context = context.cloned().unwrap_or_default();
        context
            .entry("source".to_string())
            .or_insert_with(|| "error-boundary".to_string());
        self.log(failure.clone(), Some(&context), Some(component_stack))
    }

    /// Records that a boundary recovered after retrying.
    pub fn log_recovered(&self, boundary: &str, attempt: u32) {
        if self.config.console_active() {
            info!(boundary, attempt, session_id = %self.session_id, "Boundary recovered");
        }
    }

    /// Records that a boundary gave up on retrying.
    pub fn log_exhausted(&self, boundary: &str, record: &ErrorRecord, attempt: u32) {
        if self.config.console_active() {
            warn!(
                boundary,
                attempt,
                kind = %record.kind,
                retryable = record.retryable,
                session_id = %self.session_id,
                "Boundary exhausted retries"
            );
        }
    }

    fn enrich(&self, record: ErrorRecord, component_stack: Option<&str>) -> LogEvent {
        let url = self
            .location
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let path = url
            .as_deref()
            .and_then(|u| reqwest::Url::parse(u).ok())
            .map(|u| u.path().to_string());

        LogEvent {
            record,
            session_id: self.session_id.clone(),
            user_id: self.user_id(),
            url,
            path,
            user_agent: Some(self.user_agent.clone()),
            application_version: self.config.application_version.clone(),
            environment: self.config.environment,
            component_stack: component_stack.map(str::to_string),
            client_timestamp: Utc::now(),
        }
    }

    fn dispatch_remote(&self, event: LogEvent) -> Option<JoinHandle<()>> {
        if !self.config.remote_enabled {
            return None;
        }
        let Some(sink) = self.remote.clone() else {
            debug!("remote error logging enabled without a sink");
            return None;
        };
        if self.sampler.draw() >= self.config.sample_rate {
            return None;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime, dropping remote error log");
            return None;
        };

        let report_failures = self.config.console_active();
        Some(runtime.spawn(async move {
            if let Err(e) = sink.send(&event).await {
                if report_failures {
                    warn!(sink = sink.name(), error = %e, "Error logging failed");
                }
            }
        }))
    }
}

/// Millisecond timestamp and random suffix, both base 36.
fn generate_session_id() -> String {
    let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    let suffix: u64 = rand::thread_rng().gen();
    format!("{}{}", to_base36(millis), to_base36(suffix))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingConsole {
        events: Mutex<Vec<LogEvent>>,
    }

    impl ConsoleSink for CapturingConsole {
        fn write(&self, event: &LogEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[derive(Default)]
    struct CountingSink {
        sent: AtomicUsize,
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

    struct FailingSink;

    #[async_trait]
    impl RemoteSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn send(&self, _event: &LogEvent) -> Result<(), SinkError> {
            Err(SinkError::Other("collector offline".to_string()))
        }
    }

    struct FixedSampler(f64);

    impl Sampler for FixedSampler {
        fn draw(&self) -> f64 {
            self.0
        }
    }

    fn production() -> LoggerConfig {
        LoggerConfig::for_environment(Environment::Production)
    }

    #[test]
    fn test_session_id_is_stable_and_unique() {
        let a = ErrorLogger::new(LoggerConfig::default());
        let b = ErrorLogger::new(LoggerConfig::default());
        assert_eq!(a.session_id(), a.session_id());
        assert_ne!(a.session_id(), b.session_id());
        assert!(a
            .session_id()
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_user_id_attached_and_cleared() {
        let console = Arc::new(CapturingConsole::default());
        let logger = ErrorLogger::new(LoggerConfig::for_environment(Environment::Development))
            .with_console_sink(console.clone());

        logger.set_user_id(Some("user_42".to_string()));
        logger.log("first", None, None);
        logger.set_user_id(None);
        logger.log("second", None, None);

        let events = console.events.lock().unwrap();
        assert_eq!(events[0].user_id.as_deref(), Some("user_42"));
        assert_eq!(events[1].user_id, None);
        assert_eq!(events[0].session_id, events[1].session_id);
    }

    #[test]
    fn test_event_enrichment() {
        let console = Arc::new(CapturingConsole::default());
        let logger = ErrorLogger::new(
            LoggerConfig::for_environment(Environment::Development).with_application_version("2.4.1"),
        )
        .with_console_sink(console.clone())
        .with_user_agent("test-agent");
        logger.set_location(Some("https://app.costpie.io/schedules?page=2".to_string()));

        let mut context = Context::new();
        context.insert("component".to_string(), "ScheduleTable".to_string());
        logger.log(Failure::status(503), Some(&context), Some("in ScheduleTable"));

        let events = console.events.lock().unwrap();
        let event = &events[0];
        assert_eq!(event.record.kind, ErrorKind::ServerError);
        assert_eq!(event.path.as_deref(), Some("/schedules"));
        assert_eq!(event.user_agent.as_deref(), Some("test-agent"));
        assert_eq!(event.application_version.as_deref(), Some("2.4.1"));
        assert_eq!(event.component_stack.as_deref(), Some("in ScheduleTable"));
        assert_eq!(
            event.record.context.get("component"),
            Some(&"ScheduleTable".to_string())
        );
    }

    #[test]
    fn test_console_gated_in_production() {
        let console = Arc::new(CapturingConsole::default());
        let logger = ErrorLogger::new(production().with_console_enabled(false).with_remote_enabled(false))
            .with_console_sink(console.clone());
        logger.log("quiet", None, None);
        assert!(console.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_log_boundary_tags_source() {
        let console = Arc::new(CapturingConsole::default());
        let logger = ErrorLogger::new(LoggerConfig::for_environment(Environment::Development))
            .with_console_sink(console.clone());
        logger.log_boundary(&Failure::status(500), "in CostChart", None);

        let events = console.events.lock().unwrap();
        assert_eq!(
            events[0].record.context.get("source"),
            Some(&"error-boundary".to_string())
        );
    }

    #[tokio::test]
    async fn test_remote_disabled_never_dispatches() {
        let sink = Arc::new(CountingSink::default());
        let logger = ErrorLogger::new(production().with_remote_enabled(false))
            .with_remote_sink(sink.clone());
        assert!(logger.log("x", None, None).is_none());
        assert_eq!(sink.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sampling_uses_strict_threshold() {
        let sink = Arc::new(CountingSink::default());
        let logger = ErrorLogger::new(production().with_sample_rate(0.5))
            .with_remote_sink(sink.clone())
            .with_sampler(Arc::new(FixedSampler(0.5)));
        assert!(logger.log("x", None, None).is_none());

        let logger = ErrorLogger::new(production().with_sample_rate(0.5))
            .with_remote_sink(sink.clone())
            .with_sampler(Arc::new(FixedSampler(0.49)));
        logger.log("x", None, None).unwrap().await.unwrap();
        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_is_swallowed() {
        let logger = ErrorLogger::new(production().with_sample_rate(1.0))
            .with_remote_sink(Arc::new(FailingSink));
        let handle = logger.log("x", None, None).unwrap();
        assert!(handle.await.is_ok());
    }

    #[test]
    fn test_no_runtime_drops_remote_delivery() {
        let sink = Arc::new(CountingSink::default());
        let logger = ErrorLogger::new(production().with_sample_rate(1.0)).with_remote_sink(sink.clone());
        assert!(logger.log("x", None, None).is_none());
        assert_eq!(sink.sent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_from_config_attaches_http_sink() {
        let logger = ErrorLogger::from_config(
            production().with_remote_endpoint("http://127.0.0.1:9/api/error-logs"),
        )
        .unwrap();
        assert!(format!("{:?}", logger).contains("http"));

        let logger = ErrorLogger::from_config(
            production()
                .with_remote_enabled(false)
                .with_remote_endpoint("http://127.0.0.1:9/api/error-logs"),
        )
        .unwrap();
        assert!(logger.remote.is_none());
    }
}
