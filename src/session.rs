//! Explicit session context.
//!
//! The bearer token and the user profile blob are read once from the
//! credential store into a [`Session`]. Operations that need the caller's
//! identity take `&Session` and call [`Session::guard`] at their boundary;
//! an expired or missing token becomes `DeskError::SessionExpired`, which
//! the shell turns into a login redirect.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use zeroize::Zeroizing;

use crate::error::{DeskError, DeskResult};
use crate::{storage, value_i64, value_str};

/// Display information from the profile blob stored at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: Option<i64>,
    pub username: String,
    pub display_name: String,
    pub role: Option<String>,
}

impl UserProfile {
    /// Parse the profile blob. Accepts `name`, `full_name`, `fullName` or
    /// falls back to the username for the display name.
    pub fn from_json(raw: &str) -> Option<Self> {
        let v: Value = serde_json::from_str(raw).ok()?;
        let username = value_str(&v, &["username", "email"]).unwrap_or_default();
        let display_name = value_str(&v, &["name", "full_name", "fullName", "displayName"])
            .unwrap_or_else(|| username.clone());
        if display_name.is_empty() {
            return None;
        }
        Some(Self {
            id: value_i64(&v, &["id", "user_id"]),
            username,
            display_name,
            role: value_str(&v, &["role"]),
        })
    }
}

#[derive(Clone)]
pub struct Session {
    token: Zeroizing<String>,
    profile: UserProfile,
    expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.profile.username)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Read the `exp` claim of a JWT without verifying it. Opaque tokens yield
/// `None` and are treated as non-expiring on the client.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp").and_then(Value::as_i64)?;
    Utc.timestamp_opt(exp, 0).single()
}

impl Session {
    pub fn from_parts(token: &str, profile_json: &str) -> DeskResult<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(DeskError::SessionExpired);
        }
        let profile = UserProfile::from_json(profile_json).ok_or(DeskError::SessionExpired)?;
        Ok(Self {
            token: Zeroizing::new(token.to_string()),
            profile,
            expires_at: token_expiry(token),
        })
    }

    /// Load the session persisted by the login flow.
    pub fn load() -> DeskResult<Self> {
        let token = storage::get_credential(storage::KEY_AUTH_TOKEN).ok_or(DeskError::SessionExpired)?;
        let profile =
            storage::get_credential(storage::KEY_USER_PROFILE).ok_or(DeskError::SessionExpired)?;
        Self::from_parts(&token, &profile)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }

    /// Precondition gate for gateway mutations.
    pub fn guard(&self) -> DeskResult<&Self> {
        if self.is_expired_at(Utc::now()) {
            return Err(DeskError::SessionExpired);
        }
        Ok(self)
    }

    pub fn bearer(&self) -> &str {
        self.token.as_str()
    }

    pub fn display_name(&self) -> &str {
        &self.profile.display_name
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}
