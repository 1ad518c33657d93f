//! Error taxonomy shared by every desk operation.
//!
//! Low-level glue (SQLite, keyring) keeps returning `Result<_, String>`;
//! those strings are folded into [`DeskError::Cache`] when they cross into
//! a desk operation.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeskError {
    /// Input rejected before any request was sent.
    #[error("{0}")]
    Validation(String),

    /// Network failure or a non-2xx response other than 409.
    #[error("{message}")]
    Transport { status: Option<u16>, message: String },

    /// HTTP 409 from the gateway (identifier collision).
    #[error("Conflict: {body}")]
    Conflict { body: String },

    /// Mutation attempted on a locked or terminal entity.
    #[error("{0}")]
    InvalidTransition(String),

    /// Some requests of a multi-request batch failed.
    #[error("{failed} of {total} requests failed")]
    PartialBatchFailure { failed: usize, total: usize },

    /// A single mutation was refused by the gateway; local state is unchanged.
    #[error("Update failed: {0}")]
    MutationFailed(String),

    /// Bearer token missing or expired. The shell redirects to login.
    #[error("Session expired, please sign in again")]
    SessionExpired,

    /// Local fallback cache failure.
    #[error("Local cache error: {0}")]
    Cache(String),

    /// The PDF/print collaborator could not produce the artifact.
    #[error("Could not render document: {0}")]
    Render(String),
}

pub type DeskResult<T> = Result<T, DeskError>;

impl DeskError {
    pub fn transport(message: impl Into<String>) -> Self {
        DeskError::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Failures that can be resubmitted unchanged. A partial batch is not one
    /// of them: its stored parts would be sent twice.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeskError::Transport { .. } | DeskError::Conflict { .. } | DeskError::MutationFailed(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DeskError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_split_matches_taxonomy() {
        assert!(DeskError::transport("down").is_retryable());
        assert!(DeskError::Conflict { body: "dup".into() }.is_retryable());
        assert!(!DeskError::Validation("missing".into()).is_retryable());
        assert!(!DeskError::InvalidTransition("locked".into()).is_retryable());
        assert!(!DeskError::SessionExpired.is_retryable());
        assert!(!DeskError::PartialBatchFailure { failed: 1, total: 3 }.is_retryable());
    }

    #[test]
    fn batch_failure_message_counts() {
        let err = DeskError::PartialBatchFailure {
            failed: 1,
            total: 3,
        };
        assert_eq!(err.to_string(), "1 of 3 requests failed");
    }
}
