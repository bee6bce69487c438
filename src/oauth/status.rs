//! Derived authentication status

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::record::TokenRecord;

/// Snapshot of the authentication state, recomputed on every query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    /// A token record is available
    pub authenticated: bool,
    /// Seconds until the access token expires (never negative)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Selected account id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Selected business id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_id: Option<i64>,
    /// Why `authenticated` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// A refresh token is present and the access token is stale
    pub can_refresh: bool,
}

impl AuthStatus {
    /// Status for a missing or unreadable record
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            expires_in: None,
            account_id: None,
            business_id: None,
            reason: Some(reason.into()),
            can_refresh: false,
        }
    }

    /// Status derived from a stored record
    pub fn from_record(record: &TokenRecord, now: DateTime<Utc>, margin: Duration) -> Self {
        Self {
            authenticated: true,
            expires_in: Some(record.seconds_until_expiry(now)),
            account_id: record.account_id.clone(),
            business_id: record.business_id,
            reason: None,
            can_refresh: !record.refresh_token.is_empty() && record.is_stale(now, margin),
        }
    }
}
