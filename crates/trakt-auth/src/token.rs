//! Access token record and token endpoint wire format
//!
//! `AccessToken` is the single record the token store persists. It is built
//! from a `TokenResponse` returned by either the code exchange or the refresh
//! grant; both grants share the same response shape.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_TOKEN_TYPE;

/// The current Trakt credential.
///
/// `created_at` is epoch seconds as reported by Trakt; `expires_in` is the
/// lifetime in seconds counted from `created_at`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub scope: String,
    pub created_at: u64,
    pub expires_in: u64,
}

impl AccessToken {
    /// Absolute expiry as epoch seconds.
    pub fn expires_at(&self) -> u64 {
        self.created_at.saturating_add(self.expires_in)
    }

    /// Whether the token expires at or before `now + window`.
    pub fn expires_within(&self, now: u64, window: Duration) -> bool {
        self.expires_at() <= now.saturating_add(window.as_secs())
    }

    /// `Authorization` header value: `<token_type> <access_token>`.
    pub fn authorization_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

// Tokens stay out of logs even when a caller debug-prints the record.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("created_at", &self.created_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Response body of `POST /oauth/token` for both grant types.
#[derive(Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Seconds until the access token expires
    pub expires_in: u64,
    #[serde(default)]
    pub created_at: Option<u64>,
}

impl TokenResponse {
    /// Convert into the stored record, filling omitted fields.
    ///
    /// A missing `created_at` is taken as `now`; a missing `token_type`
    /// defaults to `Bearer`.
    pub fn into_access_token(self, now: u64) -> AccessToken {
        AccessToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            scope: self.scope.unwrap_or_default(),
            created_at: self.created_at.unwrap_or(now),
            expires_in: self.expires_in,
        }
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Current time as epoch seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
