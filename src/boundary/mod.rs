//! Supervision boundary for a rendering subtree.
//!
//! An [`ErrorBoundary`] owns a [`Subtree`] and catches every failure it
//! produces, whether returned as an `Err` or raised as a panic. Captured
//! failures are classified, logged and turned into a fallback; nothing
//! propagates past the boundary.
//!
//! The boundary is a state machine over [`SupervisionState`]:
//!
//! ```text
//! Healthy --capture--> Failed --retry()--> Retrying --countdown--> Healthy
//!                        |                                           |
//!                        +--not retryable--> Exhausted <--capture----+
//! ```
//!
//! Any state returns to `Healthy` on [`ErrorBoundary::hard_reset`] or when a
//! reset key changes. Retry countdowns and sign-in redirects run as tokio
//! tasks owned by the boundary; they are aborted on reset and on drop.
//!
//! # Example
//!
//! ```no_run
//! use costpie_resilience::boundary::{BoundaryBuilder, Rendered};
//! use costpie_resilience::error::Failure;
//!
//! # async fn demo() {
//! let mut calls = 0;
//! let mut boundary = BoundaryBuilder::new()
//!     .name("CostChart")
//!     .max_retries(2)
//!     .build(move || {
//!         calls += 1;
//!         if calls == 1 { Err(Failure::status(500)) } else { Ok("chart") }
//!     });
//!
//! assert!(matches!(boundary.render(), Rendered::Fallback(_)));
//! boundary.retry();
//! while boundary.next_event().await.is_some() {}
//! assert!(matches!(boundary.render(), Rendered::Content("chart")));
//! # }
//! ```

pub mod fallback;
pub mod state;
mod timers;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{classify, Context, ErrorRecord, Failure};
use crate::error_log::{self, ErrorLogger};
use crate::navigation::{Navigator, LOGIN_PATH};
use crate::retry::{self, RetryPolicy};

pub use fallback::{FallbackView, Severity};
pub use state::{StateTag, SupervisionState};

use timers::{TimerMessage, TimerSet};

/// Delay before an authentication failure redirects to sign-in.
pub const DEFAULT_REDIRECT_DELAY: Duration = Duration::from_millis(3000);

/// A guarded unit of rendering.
pub trait Subtree {
    type Output;

    /// Produces output, or the failure that prevented it.
    fn render(&mut self) -> Result<Self::Output, Failure>;

    /// Discards internal state. Called by [`ErrorBoundary::hard_reset`].
    fn remount(&mut self) {}
}

impl<V, F> Subtree for F
where
    F: FnMut() -> Result<V, Failure>,
{
    type Output = V;

    fn render(&mut self) -> Result<V, Failure> {
        self()
    }
}

/// A value whose change resets a failed boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResetKey {
    Text(String),
    Int(i64),
    Unsigned(u64),
    Bool(bool),
}

impl From<&str> for ResetKey {
    fn from(value: &str) -> Self {
        ResetKey::Text(value.to_string())
    }
}

impl From<String> for ResetKey {
    fn from(value: String) -> Self {
        ResetKey::Text(value)
    }
}

impl From<i64> for ResetKey {
    fn from(value: i64) -> Self {
        ResetKey::Int(value)
    }
}

impl From<i32> for ResetKey {
    fn from(value: i32) -> Self {
        ResetKey::Int(i64::from(value))
    }
}

impl From<u64> for ResetKey {
    fn from(value: u64) -> Self {
        ResetKey::Unsigned(value)
    }
}

impl From<u32> for ResetKey {
    fn from(value: u32) -> Self {
        ResetKey::Unsigned(u64::from(value))
    }
}

impl From<bool> for ResetKey {
    fn from(value: bool) -> Self {
        ResetKey::Bool(value)
    }
}

/// Where a failure was captured, passed to `on_error` hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentContext {
    pub boundary: String,
    pub component_stack: String,
    pub attempt: u32,
}

/// Output of [`ErrorBoundary::render`].
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered<V> {
    /// The subtree rendered normally.
    Content(V),
    /// Output of the custom fallback.
    Custom(V),
    /// The default fallback.
    Fallback(FallbackView),
}

impl<V> Rendered<V> {
    /// Returns the subtree output, if it rendered.
    pub fn content(self) -> Option<V> {
        match self {
            Rendered::Content(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_content(&self) -> bool {
        matches!(self, Rendered::Content(_))
    }
}

/// Something that happened on a boundary timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryEvent {
    /// The retry countdown moved; seconds left, rounded down.
    Countdown { remaining_secs: u64 },
    /// The countdown finished and the subtree will render again.
    Resumed { attempt: u32 },
    /// The sign-in redirect was performed.
    Redirected { path: String },
}

type ErrorHook = Box<dyn FnMut(&Failure, &ComponentContext) + Send>;
type FallbackFn<V> = Box<dyn Fn(&FallbackView) -> V + Send>;

/// Configures and builds an [`ErrorBoundary`].
pub struct BoundaryBuilder<V> {
    name: String,
    policy: RetryPolicy,
    auto_retry: bool,
    reset_keys: Vec<ResetKey>,
    context: Context,
    on_error: Option<ErrorHook>,
    fallback: Option<FallbackFn<V>>,
    logger: Option<Arc<ErrorLogger>>,
    navigator: Option<Arc<dyn Navigator>>,
    login_path: String,
    redirect_delay: Duration,
}

impl<V> Default for BoundaryBuilder<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> BoundaryBuilder<V> {
    pub fn new() -> Self {
        Self {
            name: "ErrorBoundary".to_string(),
            policy: RetryPolicy::new(),
            auto_retry: false,
            reset_keys: Vec::new(),
            context: Context::new(),
            on_error: None,
            fallback: None,
            logger: None,
            navigator: None,
            login_path: LOGIN_PATH.to_string(),
            redirect_delay: DEFAULT_REDIRECT_DELAY,
        }
    }

    /// Names the boundary in logs and component stacks.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets how many retries are allowed before the boundary is exhausted.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy = self.policy.with_max_retries(max_retries);
        self
    }

    /// Sets the delay before the first retry.
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.policy = self.policy.with_base_delay(base_delay);
        self
    }

    /// Caps the backoff delay before jitter.
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.policy = self.policy.with_max_delay(max_delay);
        self
    }

    /// Starts a retry as soon as a retryable failure is captured.
    pub fn auto_retry(mut self, enabled: bool) -> Self {
        self.auto_retry = enabled;
        self
    }

    /// Sets the initial reset keys.
    pub fn reset_keys<K: Into<ResetKey>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.reset_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a context entry to every failure this boundary logs.
    pub fn context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Called once per captured failure. Panics inside the hook are caught.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&Failure, &ComponentContext) + Send + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }

    /// Replaces the default fallback.
    pub fn fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&FallbackView) -> V + Send + 'static,
    {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Logs to `logger` instead of the process-wide one.
    pub fn logger(mut self, logger: Arc<ErrorLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Enables sign-in redirects for authentication failures.
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Sets where authentication failures redirect. Defaults to `/login`.
    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Sets how long the fallback shows before the sign-in redirect.
    pub fn redirect_delay(mut self, delay: Duration) -> Self {
        self.redirect_delay = delay;
        self
    }

    /// Mounts `subtree` under a new boundary.
    pub fn build<S>(self, subtree: S) -> ErrorBoundary<S>
    where
        S: Subtree<Output = V>,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let logger = self.logger.unwrap_or_else(error_log::global);

        ErrorBoundary {
            subtree,
            name: self.name,
            policy: self.policy,
            auto_retry: self.auto_retry,
            reset_keys: self.reset_keys,
            context: self.context,
            on_error: self.on_error,
            fallback: self.fallback,
            logger,
            navigator: self.navigator,
            login_path: self.login_path,
            redirect_delay: self.redirect_delay,
            state: SupervisionState::Healthy,
            next_attempt: 0,
            recovering: false,
            generation: 0,
            transitions: vec![StateTag::Healthy],
            timers: TimerSet::default(),
            sender,
            receiver,
        }
    }
}

/// Catches failures of a [`Subtree`] and supervises its recovery.
pub struct ErrorBoundary<S: Subtree> {
    subtree: S,
    name: String,
    policy: RetryPolicy,
    auto_retry: bool,
    reset_keys: Vec<ResetKey>,
    context: Context,
    on_error: Option<ErrorHook>,
    fallback: Option<FallbackFn<S::Output>>,
    logger: Arc<ErrorLogger>,
    navigator: Option<Arc<dyn Navigator>>,
    login_path: String,
    redirect_delay: Duration,

    state: SupervisionState,
    /// Attempt number the next captured failure is recorded with.
    next_attempt: u32,
    /// Set when a retry resumed the subtree and it has not rendered yet.
    recovering: bool,
    generation: u64,
    transitions: Vec<StateTag>,
    timers: TimerSet,
    sender: mpsc::UnboundedSender<TimerMessage>,
    receiver: mpsc::UnboundedReceiver<TimerMessage>,
}

impl<S: Subtree> ErrorBoundary<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &SupervisionState {
        &self.state
    }

    /// The retry counter: the current failure's attempt, or the attempt the
    /// next failure will be recorded with while healthy.
    pub fn attempt(&self) -> u32 {
        match self.state {
            SupervisionState::Healthy => self.next_attempt,
            _ => self.state.attempt(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.policy.max_retries
    }

    /// Every state the boundary has entered, oldest first.
    pub fn transitions(&self) -> &[StateTag] {
        &self.transitions
    }

    pub fn subtree(&self) -> &S {
        &self.subtree
    }

    pub fn reset_keys(&self) -> &[ResetKey] {
        &self.reset_keys
    }

    /// Renders the subtree, or the fallback while it is failed.
    pub fn render(&mut self) -> Rendered<S::Output> {
        if self.state.is_healthy() {
            let outcome = catch_unwind(AssertUnwindSafe(|| self.subtree.render()));
            let failure = match outcome {
                Ok(Ok(value)) => {
                    if self.recovering {
                        self.recovering = false;
                        self.logger.log_recovered(&self.name, self.next_attempt);
                    }
                    return Rendered::Content(value);
                }
                Ok(Err(failure)) => failure,
                Err(payload) => Failure::from_panic(payload.as_ref()),
            };
            self.capture(failure);
        }

        self.render_fallback()
    }

    /// Starts a retry countdown.
    ///
    /// Returns false when the boundary is not failed, the failure is not
    /// retryable at the current attempt, or no tokio runtime is available to
    /// run the countdown.
    pub fn retry(&mut self) -> bool {
        let (record, attempt) = match &self.state {
            SupervisionState::Failed { record, attempt } => (record.clone(), *attempt),
            _ => return false,
        };
        if !retry::is_retryable(&record, attempt, self.policy.max_retries) {
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(boundary = %self.name, "No async runtime; cannot schedule retry");
            return false;
        };

        let delay = self.policy.delay_for_attempt(attempt);
        debug!(
            boundary = %self.name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );

        self.timers.cancel_countdown();
        self.timers.countdown = Some(timers::spawn_countdown(
            &runtime,
            delay,
            self.generation,
            self.sender.clone(),
        ));
        self.transition(SupervisionState::Retrying {
            record,
            attempt,
            remaining_ms: delay.as_millis() as u64,
        });
        true
    }

    /// Returns to `Healthy` with the retry counter at zero and remounts the
    /// subtree, whatever the current state.
    pub fn hard_reset(&mut self) {
        debug!(boundary = %self.name, "Hard reset");
        self.subtree.remount();
        self.reset_to_healthy(0);
    }

    /// Updates the reset keys. A failed boundary resets when the new keys
    /// have the same length and differ in any position.
    pub fn set_reset_keys<K: Into<ResetKey>>(&mut self, keys: impl IntoIterator<Item = K>) {
        let keys: Vec<ResetKey> = keys.into_iter().map(Into::into).collect();
        let changed = keys.len() == self.reset_keys.len()
            && keys.iter().zip(&self.reset_keys).any(|(new, old)| new != old);
        self.reset_keys = keys;

        if changed && !self.state.is_healthy() {
            debug!(boundary = %self.name, "Reset keys changed");
            self.reset_to_healthy(0);
        }
    }

    /// Waits for the next timer event.
    ///
    /// Returns `None` immediately when no timer is running.
    pub async fn next_event(&mut self) -> Option<BoundaryEvent> {
        while !self.timers.is_idle() {
            let message = self.receiver.recv().await?;
            if let Some(event) = self.apply(message) {
                return Some(event);
            }
        }
        None
    }

    /// Applies timer messages that have already arrived, without waiting.
    pub fn poll_events(&mut self) -> Vec<BoundaryEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            events.extend(self.apply(message));
        }
        events
    }

    /// Unmounts the boundary, cancelling its timers.
    pub fn unmount(self) {}

    fn capture(&mut self, failure: Failure) {
        let attempt = self.next_attempt;
        let mut context = self.context.clone();
        context.insert("boundary".to_string(), self.name.clone());

        let component = ComponentContext {
            boundary: self.name.clone(),
            component_stack: format!("in {}", self.name),
            attempt,
        };

        let record = classify(failure.clone(), Some(&context));
        self.logger
            .log_boundary(&failure, &component.component_stack, Some(&context));

        if let Some(hook) = self.on_error.as_mut() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(&failure, &component))) {
                error!(
                    boundary = %self.name,
                    panic = %Failure::from_panic(payload.as_ref()),
                    "on_error hook panicked"
                );
            }
        }

        self.transition(SupervisionState::Failed {
            record: record.clone(),
            attempt,
        });

        if record.kind.requires_sign_in() {
            self.schedule_redirect();
        }

        if !retry::is_retryable(&record, attempt, self.policy.max_retries) {
            self.logger.log_exhausted(&self.name, &record, attempt);
            self.transition(SupervisionState::Exhausted { record, attempt });
        } else if self.auto_retry {
            self.retry();
        }
    }

    fn schedule_redirect(&mut self) {
        let Some(navigator) = self.navigator.clone() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            warn!(boundary = %self.name, "No async runtime; cannot schedule sign-in redirect");
            return;
        };

        self.timers.cancel_redirect();
        self.timers.redirect = Some(timers::spawn_redirect(
            &runtime,
            self.redirect_delay,
            self.generation,
            navigator,
            self.login_path.clone(),
            self.sender.clone(),
        ));
    }

    fn apply(&mut self, message: TimerMessage) -> Option<BoundaryEvent> {
        if message.generation() != self.generation {
            return None;
        }

        match message {
            TimerMessage::Countdown { remaining, .. } => {
                if let SupervisionState::Retrying { remaining_ms, .. } = &mut self.state {
                    *remaining_ms = remaining.as_millis() as u64;
                    return Some(BoundaryEvent::Countdown {
                        remaining_secs: remaining.as_secs(),
                    });
                }
                None
            }
            TimerMessage::Elapsed { .. } => {
                self.timers.countdown = None;
                let SupervisionState::Retrying { attempt, .. } = self.state else {
                    return None;
                };
                let attempt = attempt + 1;
                debug!(boundary = %self.name, attempt, "Retry countdown elapsed");
                self.reset_to_healthy(attempt);
                self.recovering = true;
                Some(BoundaryEvent::Resumed { attempt })
            }
            TimerMessage::Redirected { path, .. } => {
                self.timers.redirect = None;
                Some(BoundaryEvent::Redirected { path })
            }
        }
    }

    fn reset_to_healthy(&mut self, attempt: u32) {
        self.timers.cancel_all();
        self.generation += 1;
        self.next_attempt = attempt;
        self.recovering = false;
        self.transition(SupervisionState::Healthy);
    }

    fn render_fallback(&self) -> Rendered<S::Output> {
        let Some(record) = self.state.record() else {
            let record = classify(Failure::Unknown, None);
            return Rendered::Fallback(self.view(&record, false));
        };
        let view = self.view(record, self.state.is_exhausted());
        match &self.fallback {
            Some(fallback) => Rendered::Custom(fallback(&view)),
            None => Rendered::Fallback(view),
        }
    }

    fn view(&self, record: &ErrorRecord, exhausted: bool) -> FallbackView {
        let attempt = self.state.attempt();
        FallbackView::build(
            record,
            attempt,
            self.policy.max_retries,
            self.state.remaining_secs(),
            retry::is_retryable(record, attempt, self.policy.max_retries),
            exhausted,
        )
    }

    fn transition(&mut self, state: SupervisionState) {
        let tag = state.tag();
        debug!(boundary = %self.name, state = %tag, "Boundary transition");
        self.state = state;
        self.transitions.push(tag);
    }
}

impl<S: Subtree> Drop for ErrorBoundary<S> {
    fn drop(&mut self) {
        self.timers.cancel_all();
    }
}
