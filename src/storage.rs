//! Persisted session and gateway settings in the OS credential store.
//!
//! On Windows this uses the Credential Manager (via the `keyring` crate), on
//! macOS Keychain, and on Linux the Secret Service API. The bearer token and
//! the user profile blob written at login are read back here before any
//! gateway mutation.

use keyring::Entry;
use tracing::warn;

const SERVICE_NAME: &str = "stock-desk";

// Credential keys
pub const KEY_AUTH_TOKEN: &str = "auth_token";
pub const KEY_USER_PROFILE: &str = "user_profile";
pub const KEY_GATEWAY_URL: &str = "gateway_url";

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

/// Remove the session credentials (logout). The gateway URL is kept.
pub fn clear_session() -> Result<(), String> {
    delete_credential(KEY_AUTH_TOKEN)?;
    delete_credential(KEY_USER_PROFILE)?;
    Ok(())
}

