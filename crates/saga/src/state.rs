//! Checkout run states.

use serde::{Deserialize, Serialize};

/// Where a checkout run stands relative to its commit point, the write of
/// the order header.
///
/// ```text
/// NotStarted ──► Preparing ──┬──► Committed ──┬──► Completed
///                            │                └──► Compensating ──► Failed
///                            └──► Failed
/// ```
///
/// A run that fails while `Preparing` has written nothing and fails
/// directly. Once `Committed`, every failure is compensated first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    #[default]
    NotStarted,

    /// Loading and pricing the cart. Nothing has been written yet.
    Preparing,

    /// The order header exists.
    Committed,

    /// Undoing the committed steps after a failure.
    Compensating,

    /// The order was placed (terminal state).
    Completed,

    /// The run gave up (terminal state).
    Failed,
}

impl SagaState {
    /// State after the order header has been written.
    pub fn commit(self) -> SagaState {
        match self {
            SagaState::Preparing => SagaState::Committed,
            other => other,
        }
    }

    /// State a step failure leads to.
    pub fn on_failure(self) -> SagaState {
        match self {
            SagaState::Preparing => SagaState::Failed,
            SagaState::Committed => SagaState::Compensating,
            other => other,
        }
    }

    /// Returns true if a failure now has effects to undo.
    pub fn needs_compensation(&self) -> bool {
        matches!(self, SagaState::Committed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "not_started",
            SagaState::Preparing => "preparing",
            SagaState::Committed => "committed",
            SagaState::Compensating => "compensating",
            SagaState::Completed => "completed",
            SagaState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
