//! Persisted token record

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Token lifetime FreshBooks documents when `expires_in` is omitted
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 12 * 60 * 60;

/// Current credentials plus the selected FreshBooks identity.
///
/// `Debug` never prints the token values.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Opaque bearer credential
    pub access_token: String,

    /// Long-lived credential used to mint new access tokens
    pub refresh_token: String,

    /// Absolute expiry of the access token
    pub expires_at: DateTime<Utc>,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Selected FreshBooks account id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// Selected FreshBooks business id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_id: Option<i64>,
}

pub(crate) fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenRecord {
    /// Create a record without identity context
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
            token_type: default_token_type(),
            account_id: None,
            business_id: None,
        }
    }

    /// Attach identity context
    #[must_use]
    pub fn with_identity(mut self, account_id: Option<String>, business_id: Option<i64>) -> Self {
        self.account_id = account_id;
        self.business_id = business_id;
        self
    }

    /// `true` once `now` is within `margin` of expiry
    pub fn is_stale(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now >= self.expires_at - margin
    }

    /// Seconds until the access token expires, clamped at zero
    pub fn seconds_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// `Authorization` header value
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("account_id", &self.account_id)
            .field("business_id", &self.business_id)
            .finish()
    }
}
