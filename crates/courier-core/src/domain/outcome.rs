//! Outcome model: what an executor reports for one attempt.

use serde::{Deserialize, Serialize};

/// The result of one attempt to deliver a queued request.
///
/// `Retry` and `Failed` both mean "not delivered", but the queue acts on them
/// differently: `Retry` keeps the row and bumps its retry count, `Failed`
/// deletes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryOutcome {
    Success,
    Retry(String),
    Failed(String),
}

impl RetryOutcome {
    pub fn retry(reason: impl Into<String>) -> Self {
        Self::Retry(reason.into())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            RetryOutcome::Success => None,
            RetryOutcome::Retry(reason) | RetryOutcome::Failed(reason) => Some(reason),
        }
    }
}
