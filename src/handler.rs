//! Imperative error handling for failures outside a boundary.
//!
//! [`ErrorHandler`] is used by code that catches a failure itself, such as an
//! event handler or a background refresh: it classifies and logs the failure,
//! keeps it as the current error, notifies the user and sends
//! unauthenticated users to sign in.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{
    classify, format_message, notification_title, suggested_action, Context, ErrorRecord, Failure,
};
use crate::error_log::{self, ErrorLogger};
use crate::navigation::{NavigateOptions, Navigator, LOGIN_PATH};

/// Delay before an authentication failure redirects to sign-in.
pub const DEFAULT_AUTH_REDIRECT_DELAY: Duration = Duration::from_millis(1500);

/// A toast-style message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub description: String,
    /// Label of an action button, if any.
    pub action: Option<String>,
    pub destructive: bool,
}

/// Displays notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        warn!(
            title = %notification.title,
            action = notification.action.as_deref().unwrap_or(""),
            "{}",
            notification.description
        );
    }
}

/// Behavior switches for [`ErrorHandler`].
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub notify: bool,
    pub redirect_on_auth: bool,
    pub context: Context,
    pub login_path: String,
    pub redirect_delay: Duration,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            notify: true,
            redirect_on_auth: true,
            context: Context::new(),
            login_path: LOGIN_PATH.to_string(),
            redirect_delay: DEFAULT_AUTH_REDIRECT_DELAY,
        }
    }
}

impl HandlerOptions {
    /// Sets whether the user is notified.
    pub fn with_notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }

    /// Sets whether authentication failures redirect to sign-in.
    pub fn with_redirect_on_auth(mut self, redirect: bool) -> Self {
        self.redirect_on_auth = redirect;
        self
    }

    /// Adds a context entry to every handled failure.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the sign-in path. Defaults to `/login`.
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Sets the delay before the sign-in redirect.
    pub fn with_redirect_delay(mut self, delay: Duration) -> Self {
        self.redirect_delay = delay;
        self
    }
}

type HandlerHook = Box<dyn FnMut(&Failure, &ErrorRecord) + Send>;

/// Handles failures caught by application code.
pub struct ErrorHandler {
    options: HandlerOptions,
    logger: Arc<ErrorLogger>,
    notifier: Option<Arc<dyn Notifier>>,
    navigator: Option<Arc<dyn Navigator>>,
    on_error: Option<HandlerHook>,
    error: Option<ErrorRecord>,
    redirect: Option<JoinHandle<()>>,
}

impl ErrorHandler {
    /// Creates a handler that logs to the process-wide logger.
    pub fn new(options: HandlerOptions) -> Self {
        Self {
            options,
            logger: error_log::global(),
            notifier: None,
            navigator: None,
            on_error: None,
            error: None,
            redirect: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<ErrorLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Called with every handled failure and its classification. Panics
    /// inside the hook are caught.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&Failure, &ErrorRecord) + Send + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }

    /// The most recently handled error.
    pub fn error(&self) -> Option<&ErrorRecord> {
        self.error.as_ref()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Forgets the current error. A pending redirect still happens.
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Classifies, records, logs and reports `cause`.
    pub fn handle_error(&mut self, cause: impl Into<Failure>) -> ErrorRecord {
        let failure = cause.into();
        let record = classify(failure.clone(), Some(&self.options.context));
        self.error = Some(record.clone());

        self.logger
            .log(failure.clone(), Some(&self.options.context), None);

        if let Some(hook) = self.on_error.as_mut() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(&failure, &record))) {
                error!(
                    kind = %record.kind,
                    panic = %Failure::from_panic(payload.as_ref()),
                    "on_error hook panicked"
                );
            }
        }

        if self.options.redirect_on_auth && record.kind.requires_sign_in() {
            self.notify(Notification {
                title: "Authentication Required".to_string(),
                description: "Please sign in to continue.".to_string(),
                action: None,
                destructive: true,
            });
            self.schedule_redirect();
            return record;
        }

        let action = suggested_action(&record);
        self.notify(Notification {
            title: notification_title(record.kind),
            description: format_message(&record),
            action: (action != "Try again").then(|| action.to_string()),
            destructive: true,
        });
        record
    }

    fn notify(&self, notification: Notification) {
        if !self.options.notify {
            return;
        }
        if let Some(notifier) = &self.notifier {
            notifier.notify(notification);
        }
    }

    fn schedule_redirect(&mut self) {
        let Some(navigator) = self.navigator.clone() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime; cannot schedule sign-in redirect");
            return;
        };

        if let Some(previous) = self.redirect.take() {
            previous.abort();
        }
        let delay = self.options.redirect_delay;
        let path = self.options.login_path.clone();
        debug!(path = %path, delay_ms = delay.as_millis() as u64, "Scheduling sign-in redirect");

        self.redirect = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            navigator.navigate(&path, NavigateOptions::replace());
        }));
    }
}

impl Drop for ErrorHandler {
    fn drop(&mut self) {
        if let Some(redirect) = self.redirect.take() {
            redirect.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::error_log::{Environment, LoggerConfig};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        notifications: Mutex<Vec<Notification>>,
        navigations: Mutex<Vec<String>>,
    }

    impl Notifier for Recorder {
        fn notify(&self, notification: Notification) {
            self.notifications.lock().unwrap().push(notification);
        }
    }

    impl Navigator for Recorder {
        fn navigate(&self, path: &str, options: NavigateOptions) {
            assert!(options.replace);
            self.navigations.lock().unwrap().push(path.to_string());
        }
    }

    fn handler(options: HandlerOptions, recorder: &Arc<Recorder>) -> ErrorHandler {
        let logger = ErrorLogger::new(
            LoggerConfig::for_environment(Environment::Production).with_console_enabled(false),
        );
        ErrorHandler::new(options)
            .with_logger(Arc::new(logger))
            .with_notifier(recorder.clone())
            .with_navigator(recorder.clone())
    }

    #[test]
    fn test_records_and_notifies() {
        let recorder = Arc::new(Recorder::default());
        let mut handler = handler(HandlerOptions::default(), &recorder);

        let record = handler.handle_error(Failure::status(429));
        assert_eq!(record.kind, ErrorKind::RateLimit);
        assert!(handler.is_error());

        let notifications = recorder.notifications.lock().unwrap();
        assert_eq!(
            notifications.as_slice(),
            &[Notification {
                title: "Rate limit".to_string(),
                description: "Too many requests. Please try again later".to_string(),
                action: Some("Wait a few minutes and try again".to_string()),
                destructive: true,
            }]
        );
    }

    #[test]
    fn test_plain_retry_action_is_omitted() {
        let recorder = Arc::new(Recorder::default());
        let mut handler = handler(HandlerOptions::default(), &recorder);

        handler.handle_error(Failure::status(422));
        let notifications = recorder.notifications.lock().unwrap();
        assert_eq!(notifications[0].action, None);
        assert_eq!(notifications[0].title, "Validation error");
    }

    #[test]
    fn test_clear_error() {
        let recorder = Arc::new(Recorder::default());
        let mut handler = handler(HandlerOptions::default().with_notify(false), &recorder);

        handler.handle_error("boom");
        assert_eq!(handler.error().map(|e| e.message.as_str()), Some("boom"));
        handler.clear_error();
        assert!(!handler.is_error());
        assert!(recorder.notifications.lock().unwrap().is_empty());
    }

    #[test]
    fn test_hook_sees_context() {
        let recorder = Arc::new(Recorder::default());
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let mut handler = handler(
            HandlerOptions::default().with_context("view", "budgets"),
            &recorder,
        )
        .on_error(move |_, record| {
            *sink.lock().unwrap() = record.context.get("view").cloned();
        });

        handler.handle_error(Failure::status(500));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("budgets"));
    }

    #[test]
    fn test_panicking_hook_is_contained() {
        let recorder = Arc::new(Recorder::default());
        let mut handler = handler(HandlerOptions::default(), &recorder)
            .on_error(|_, _| panic!("analytics hook failed"));

        let record = handler.handle_error(Failure::status(503));
        assert_eq!(record.kind, ErrorKind::ServerError);
        assert!(handler.is_error());
        assert_eq!(recorder.notifications.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_redirects_after_delay() {
        let recorder = Arc::new(Recorder::default());
        let mut handler = handler(HandlerOptions::default(), &recorder);

        handler.handle_error(Failure::status(401));
        assert_eq!(
            recorder.notifications.lock().unwrap()[0].title,
            "Authentication Required"
        );

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(recorder.navigations.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(
            recorder.navigations.lock().unwrap().as_slice(),
            &["/login".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handler_cancels_redirect() {
        let recorder = Arc::new(Recorder::default());
        let mut handler = handler(HandlerOptions::default(), &recorder);

        handler.handle_error(Failure::status(401));
        drop(handler);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(recorder.navigations.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_redirect_disabled() {
        let recorder = Arc::new(Recorder::default());
        let mut handler = handler(
            HandlerOptions::default().with_redirect_on_auth(false),
            &recorder,
        );

        handler.handle_error(Failure::status(401));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(recorder.navigations.lock().unwrap().is_empty());
        assert_eq!(
            recorder.notifications.lock().unwrap()[0].title,
            "Authentication"
        );
    }
}
