//! Cancellable timers owned by a boundary.
//!
//! Each timer is a tokio task. The countdown reports back through an
//! unbounded channel that the boundary drains; the redirect calls the
//! navigator directly and then reports that it ran, even if the navigator
//! panicked. Messages carry the generation they were started in so
//! the boundary can ignore ticks from a timer it has since replaced.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::error;

use crate::error::Failure;
use crate::navigation::{NavigateOptions, Navigator};

const TICK: Duration = Duration::from_secs(1);

/// Messages sent from timer tasks to their boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TimerMessage {
    /// Time left on the retry countdown, sent once per second.
    Countdown { generation: u64, remaining: Duration },
    /// The retry countdown finished.
    Elapsed { generation: u64 },
    /// The sign-in redirect was performed.
    Redirected { generation: u64, path: String },
}

impl TimerMessage {
    pub(crate) fn generation(&self) -> u64 {
        match self {
            TimerMessage::Countdown { generation, .. }
            | TimerMessage::Elapsed { generation }
            | TimerMessage::Redirected { generation, .. } => *generation,
        }
    }
}

/// Handles to the timers a boundary may be running.
#[derive(Debug, Default)]
pub(crate) struct TimerSet {
    pub(crate) countdown: Option<JoinHandle<()>>,
    pub(crate) redirect: Option<JoinHandle<()>>,
}

impl TimerSet {
    pub(crate) fn cancel_countdown(&mut self) {
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
    }

    pub(crate) fn cancel_redirect(&mut self) {
        if let Some(handle) = self.redirect.take() {
            handle.abort();
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        self.cancel_countdown();
        self.cancel_redirect();
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.countdown.is_none() && self.redirect.is_none()
    }
}

/// Starts a countdown of `delay`, ticking every second.
pub(crate) fn spawn_countdown(
    runtime: &Handle,
    delay: Duration,
    generation: u64,
    sender: mpsc::UnboundedSender<TimerMessage>,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let deadline = Instant::now() + delay;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(remaining.min(TICK)).await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if sender
                .send(TimerMessage::Countdown {
                    generation,
                    remaining,
                })
                .is_err()
            {
                return;
            }
        }

        let _ = sender.send(TimerMessage::Elapsed { generation });
    })
}

/// Navigates to `path` after `delay` unless aborted first.
pub(crate) fn spawn_redirect(
    runtime: &Handle,
    delay: Duration,
    generation: u64,
    navigator: Arc<dyn Navigator>,
    path: String,
    sender: mpsc::UnboundedSender<TimerMessage>,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        let navigated =
            catch_unwind(AssertUnwindSafe(|| navigator.navigate(&path, NavigateOptions::replace())));
        if let Err(payload) = navigated {
            error!(
                path = %path,
                panic = %Failure::from_panic(payload.as_ref()),
                "Sign-in navigation panicked"
            );
        }
        let _ = sender.send(TimerMessage::Redirected { generation, path });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNavigator(Mutex<Vec<(String, NavigateOptions)>>);

    impl Navigator for RecordingNavigator {
        fn navigate(&self, path: &str, options: NavigateOptions) {
            self.0.lock().unwrap().push((path.to_string(), options));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_ticks_then_elapses() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_countdown(&Handle::current(), Duration::from_millis(2_500), 7, tx);

        let mut messages = Vec::new();
        while let Some(message) = rx.recv().await {
            let done = matches!(message, TimerMessage::Elapsed { .. });
            messages.push(message);
            if done {
                break;
            }
        }
        handle.await.unwrap();

        assert_eq!(
            messages,
            vec![
                TimerMessage::Countdown {
                    generation: 7,
                    remaining: Duration::from_millis(1_500)
                },
                TimerMessage::Countdown {
                    generation: 7,
                    remaining: Duration::from_millis(500)
                },
                TimerMessage::Elapsed { generation: 7 },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_countdown_only_elapses() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_countdown(&Handle::current(), Duration::from_millis(300), 1, tx);
        assert_eq!(rx.recv().await, Some(TimerMessage::Elapsed { generation: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_redirect_fires_after_delay() {
        let navigator = Arc::new(RecordingNavigator::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_redirect(
            &Handle::current(),
            Duration::from_secs(3),
            2,
            navigator.clone(),
            "/login".to_string(),
            tx,
        );

        let message = rx.recv().await;
        assert_eq!(
            message,
            Some(TimerMessage::Redirected {
                generation: 2,
                path: "/login".to_string()
            })
        );
        let calls = navigator.0.lock().unwrap();
        assert_eq!(calls.as_slice(), &[("/login".to_string(), NavigateOptions::replace())]);
    }

    struct PanickingNavigator;

    impl Navigator for PanickingNavigator {
        fn navigate(&self, _path: &str, _options: NavigateOptions) {
            panic!("router unavailable");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_redirect_reports_even_when_navigator_panics() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_redirect(
            &Handle::current(),
            Duration::from_secs(3),
            4,
            Arc::new(PanickingNavigator),
            "/login".to_string(),
            tx,
        );

        assert_eq!(
            rx.recv().await,
            Some(TimerMessage::Redirected {
                generation: 4,
                path: "/login".to_string()
            })
        );
        assert!(handle.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_redirect_never_navigates() {
        let navigator = Arc::new(RecordingNavigator::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet {
            countdown: None,
            redirect: Some(spawn_redirect(
                &Handle::current(),
                Duration::from_secs(3),
                0,
                navigator.clone(),
                "/login".to_string(),
                tx,
            )),
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        timers.cancel_all();
        assert!(timers.is_idle());
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(navigator.0.lock().unwrap().is_empty());
    }
}
