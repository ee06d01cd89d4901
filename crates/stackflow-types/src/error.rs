use thiserror::Error;

/// Errors raised by an action handler while performing a step.
///
/// The variant decides retry behaviour: `Timeout` and `Network` are transient
/// and eligible for another attempt, `Validation` and `Failed` are not.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid step configuration: {0}")]
    Validation(String),

    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    /// Whether this error class may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::Timeout(_) | ActionError::Network(_))
    }
}
