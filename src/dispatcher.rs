//! Mutation dispatch helpers: duplicate-submission guard and conversion of
//! outcomes into user-facing notifications.
//!
//! Every desk mutation takes an [`InFlightGuard`] for its key before the
//! first request and releases it when the guard drops, so a second click on
//! the same submit button is refused while the first request is pending.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;

use crate::error::{DeskError, DeskResult};

#[derive(Default)]
pub struct InFlight {
    keys: Mutex<HashSet<String>>,
}

pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
    key: String,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Fails with a validation error when the same mutation is
    /// already running.
    pub fn begin(&self, key: impl Into<String>) -> DeskResult<InFlightGuard<'_>> {
        let key = key.into();
        let mut keys = self
            .keys
            .lock()
            .map_err(|e| DeskError::Cache(format!("in-flight lock poisoned: {e}")))?;
        if !keys.insert(key.clone()) {
            debug!(key = %key, "duplicate submission refused");
            return Err(DeskError::Validation(
                "This action is already in progress".into(),
            ));
        }
        Ok(InFlightGuard { owner: self, key })
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.keys
            .lock()
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut keys) = self.owner.keys.lock() {
            keys.remove(&self.key);
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub level: NoticeLevel,
    pub message: String,
    /// Offer a retry button.
    pub retryable: bool,
    /// Send the user to the login flow.
    pub redirect_to_login: bool,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
            retryable: false,
            redirect_to_login: false,
        }
    }

    pub fn warning(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
            retryable,
            redirect_to_login: false,
        }
    }
}

/// Convert any desk error into the notification the shell displays.
pub fn notify(err: &DeskError) -> Notification {
    let message = match err {
        DeskError::PartialBatchFailure { failed, total } => format!(
            "{failed} of {total} parts could not be submitted; the rest may already be recorded"
        ),
        DeskError::Conflict { body } if !body.is_empty() => {
            format!("Could not obtain a unique number after several attempts: {body}")
        }
        DeskError::Conflict { .. } => {
            "Could not obtain a unique number after several attempts".to_string()
        }
        other => other.to_string(),
    };
    Notification {
        level: NoticeLevel::Error,
        message,
        retryable: err.is_retryable(),
        redirect_to_login: matches!(err, DeskError::SessionExpired),
    }
}

/// Fold an operation result into a notification, using `ok` for the
/// success message.
pub fn notify_result<T>(result: &DeskResult<T>, ok: impl FnOnce(&T) -> Notification) -> Notification {
    match result {
        Ok(value) => ok(value),
        Err(err) => notify(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_is_refused_until_guard_drops() {
        let in_flight = InFlight::new();
        let guard = in_flight.begin("po:PO-1").unwrap();
        assert!(in_flight.is_busy("po:PO-1"));
        assert!(matches!(
            in_flight.begin("po:PO-1"),
            Err(DeskError::Validation(_))
        ));
        assert!(in_flight.begin("po:PO-2").is_ok());
        drop(guard);
        assert!(!in_flight.is_busy("po:PO-1"));
        assert!(in_flight.begin("po:PO-1").is_ok());
    }

    #[test]
    fn session_expiry_redirects() {
        let n = notify(&DeskError::SessionExpired);
        assert!(n.redirect_to_login);
        assert!(!n.retryable);
        assert_eq!(n.level, NoticeLevel::Error);
    }

    #[test]
    fn transport_errors_are_retryable_validation_errors_are_not() {
        assert!(notify(&DeskError::transport("timeout")).retryable);
        assert!(!notify(&DeskError::Validation("Customer name is required".into())).retryable);
        assert!(!notify(&DeskError::InvalidTransition("locked".into())).retryable);
    }

    #[test]
    fn partial_batch_message_mentions_counts() {
        let n = notify(&DeskError::PartialBatchFailure {
            failed: 1,
            total: 3,
        });
        assert!(n.message.starts_with("1 of 3"), "{}", n.message);
        assert!(!n.retryable);
    }

    #[test]
    fn notify_result_uses_success_builder() {
        let ok: DeskResult<usize> = Ok(2);
        let n = notify_result(&ok, |n| Notification::success(format!("{n} parts ordered")));
        assert_eq!(n, Notification::success("2 parts ordered"));
    }
}
