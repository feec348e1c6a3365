//! Default fallback shown in place of a failed subtree.

use std::fmt;

use serde::Serialize;

use crate::error::{error_title, format_message, suggested_action, ErrorKind, ErrorRecord};

/// Visual weight of a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Transient connectivity or throttling problems.
    Warning,
    Destructive,
}

impl Severity {
    fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit => Severity::Warning,
            _ => Severity::Destructive,
        }
    }
}

/// Everything a fallback needs to describe a captured failure.
///
/// Custom fallbacks passed to
/// [`BoundaryBuilder::fallback`](super::BoundaryBuilder::fallback) receive
/// this view and render their own output from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackView {
    pub title: String,
    pub message: String,
    pub action: String,
    pub severity: Severity,
    pub kind: ErrorKind,
    /// Retries started so far, including one that is counting down.
    pub attempt: u32,
    pub max_retries: u32,
    /// Whether a retry affordance is offered.
    pub retry_available: bool,
    /// Seconds left before an in-flight retry resumes the subtree.
    pub retrying_in: Option<u64>,
    pub sign_in_available: bool,
    pub hard_reset_available: bool,
    pub exhausted: bool,
}

impl FallbackView {
    pub(crate) fn build(
        record: &ErrorRecord,
        attempt: u32,
        max_retries: u32,
        retrying_in: Option<u64>,
        retry_available: bool,
        exhausted: bool,
    ) -> Self {
        let retrying = retrying_in.is_some();
        Self {
            title: error_title(record).to_string(),
            message: format_message(record),
            action: suggested_action(record).to_string(),
            severity: Severity::for_kind(record.kind),
            kind: record.kind,
            attempt: if retrying { attempt + 1 } else { attempt },
            max_retries,
            retry_available: retry_available && !retrying,
            retrying_in,
            sign_in_available: record.kind.requires_sign_in(),
            hard_reset_available: true,
            exhausted,
        }
    }

    /// Returns true while a retry countdown runs.
    pub fn is_retrying(&self) -> bool {
        self.retrying_in.is_some()
    }
}

impl fmt::Display for FallbackView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(f, "{}", self.message)?;

        if self.attempt > 0 {
            writeln!(f, "Retry attempt {} of {}", self.attempt, self.max_retries)?;
        }
        if let Some(secs) = self.retrying_in.filter(|secs| *secs > 0) {
            let plural = if secs == 1 { "" } else { "s" };
            writeln!(f, "Retrying in {} second{}...", secs, plural)?;
        }

        let mut actions = Vec::new();
        if self.sign_in_available {
            actions.push("[Sign In]".to_string());
        }
        if self.retry_available {
            actions.push("[Retry]".to_string());
        }
        if !self.is_retrying() {
            actions.push("[Reload]".to_string());
        }
        if !actions.is_empty() {
            write!(f, "{} ({})", actions.join(" "), self.action)?;
        } else {
            write!(f, "({})", self.action)?;
        }
        Ok(())
    }
}
