//! Supervision state of a guarded subtree.

use std::fmt;

use crate::error::ErrorRecord;

/// Lifecycle of a guarded subtree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SupervisionState {
    /// The subtree renders normally.
    #[default]
    Healthy,
    /// A failure was captured; a retry may be requested.
    Failed { record: ErrorRecord, attempt: u32 },
    /// Waiting out the backoff delay before resuming the subtree.
    Retrying {
        record: ErrorRecord,
        attempt: u32,
        remaining_ms: u64,
    },
    /// No further retries; only a hard reset leaves this state.
    Exhausted { record: ErrorRecord, attempt: u32 },
}

impl SupervisionState {
    /// Returns true while the subtree renders normally.
    pub fn is_healthy(&self) -> bool {
        matches!(self, SupervisionState::Healthy)
    }

    /// Returns true once retries are exhausted.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, SupervisionState::Exhausted { .. })
    }

    /// Returns true while a retry countdown runs.
    pub fn is_retrying(&self) -> bool {
        matches!(self, SupervisionState::Retrying { .. })
    }

    /// The captured error, if any.
    pub fn record(&self) -> Option<&ErrorRecord> {
        match self {
            SupervisionState::Healthy => None,
            SupervisionState::Failed { record, .. }
            | SupervisionState::Retrying { record, .. }
            | SupervisionState::Exhausted { record, .. } => Some(record),
        }
    }

    /// The retry counter; zero while healthy.
    pub fn attempt(&self) -> u32 {
        match self {
            SupervisionState::Healthy => 0,
            SupervisionState::Failed { attempt, .. }
            | SupervisionState::Retrying { attempt, .. }
            | SupervisionState::Exhausted { attempt, .. } => *attempt,
        }
    }

    /// Whole seconds left on the retry countdown.
    pub fn remaining_secs(&self) -> Option<u64> {
        match self {
            SupervisionState::Retrying { remaining_ms, .. } => Some(remaining_ms / 1000),
            _ => None,
        }
    }

    /// Compact tag for transition histories.
    pub fn tag(&self) -> StateTag {
        match self {
            SupervisionState::Healthy => StateTag::Healthy,
            SupervisionState::Failed { attempt, .. } => StateTag::Failed(*attempt),
            SupervisionState::Retrying { attempt, .. } => StateTag::Retrying(*attempt),
            SupervisionState::Exhausted { attempt, .. } => StateTag::Exhausted(*attempt),
        }
    }
}

/// State without its payload, carrying only the attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTag {
    Healthy,
    Failed(u32),
    Retrying(u32),
    Exhausted(u32),
}

impl fmt::Display for StateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateTag::Healthy => write!(f, "healthy"),
            StateTag::Failed(attempt) => write!(f, "failed(attempt={})", attempt),
            StateTag::Retrying(attempt) => write!(f, "retrying(attempt={})", attempt),
            StateTag::Exhausted(attempt) => write!(f, "exhausted(attempt={})", attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_is_healthy() {
        let state = SupervisionState::default();
        assert!(state.is_healthy());
        assert_eq!(state.attempt(), 0);
        assert!(state.record().is_none());
    }

    #[test]
    fn test_remaining_secs_floors() {
        let state = SupervisionState::Retrying {
            record: ErrorRecord::new(ErrorKind::ServerError, "down"),
            attempt: 1,
            remaining_ms: 2_900,
        };
        assert_eq!(state.remaining_secs(), Some(2));
        assert_eq!(state.tag(), StateTag::Retrying(1));
        assert!(state.is_retrying());
    }

    #[test]
    fn test_tag_display() {
        assert_eq!(StateTag::Exhausted(2).to_string(), "exhausted(attempt=2)");
    }
}
