//! Outcome model: what a worker reports for one attempt.

use serde::{Deserialize, Serialize};

/// Classification of an attempt result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
    /// The worker did not report within the execution timeout.
    TimedOut,
    /// The worker stopped early after observing the cancellation signal.
    Cancelled,
}

/// Result of one execution attempt.
///
/// Only `Success` moves a task to `succeeded`; every other kind is fed to
/// the retry policy as a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            reason: Some(reason.into()),
        }
    }

    /// The attempt ran past its deadline, either the execution timeout or
    /// an expired lease.
    pub fn timed_out(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::TimedOut,
            reason: Some(reason.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: OutcomeKind::Cancelled,
            reason: Some("cancelled".to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }
}
