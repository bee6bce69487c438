//! Read-only store over environment variables
//!
//! Values are read on every `load()` so an externally rotated token is
//! picked up without a restart.

use std::fmt;

use chrono::DateTime;
use tracing::warn;

use super::TokenStore;
use crate::oauth::record::{TokenRecord, default_token_type};
use crate::{Error, ErrorKind, Result};

/// Access token variable
pub const ENV_ACCESS_TOKEN: &str = "FRESHBOOKS_ACCESS_TOKEN";
/// Refresh token variable
pub const ENV_REFRESH_TOKEN: &str = "FRESHBOOKS_REFRESH_TOKEN";
/// Expiry variable (Unix seconds)
pub const ENV_EXPIRES_AT: &str = "FRESHBOOKS_TOKEN_EXPIRES_AT";
/// Account id variable
pub const ENV_ACCOUNT_ID: &str = "FRESHBOOKS_ACCOUNT_ID";
/// Business id variable
pub const ENV_BUSINESS_ID: &str = "FRESHBOOKS_BUSINESS_ID";

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Token record assembled from `FRESHBOOKS_*` variables
pub struct EnvStore {
    lookup: Lookup,
}

impl EnvStore {
    /// Read from the process environment
    #[must_use]
    pub fn from_process_env() -> Self {
        Self::with_source(|name| std::env::var(name).ok())
    }

    /// Read through a custom lookup function
    pub fn with_source<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn read_record(&self) -> Result<Option<TokenRecord>> {
        let Some(access_token) = self.var(ENV_ACCESS_TOKEN) else {
            return Ok(None);
        };

        let refresh_token = self
            .var(ENV_REFRESH_TOKEN)
            .ok_or_else(|| Error::CorruptRecord(format!("{ENV_REFRESH_TOKEN} is not set")))?;

        let expires_at = self
            .var(ENV_EXPIRES_AT)
            .ok_or_else(|| Error::CorruptRecord(format!("{ENV_EXPIRES_AT} is not set")))?;
        let expires_at = expires_at
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| {
                Error::CorruptRecord(format!("{ENV_EXPIRES_AT} is not a Unix timestamp"))
            })?;

        let business_id = self
            .var(ENV_BUSINESS_ID)
            .map(|v| {
                v.parse::<i64>().map_err(|_| {
                    Error::CorruptRecord(format!("{ENV_BUSINESS_ID} is not an integer"))
                })
            })
            .transpose()?;

        Ok(Some(TokenRecord {
            access_token,
            refresh_token,
            expires_at,
            token_type: default_token_type(),
            account_id: self.var(ENV_ACCOUNT_ID),
            business_id,
        }))
    }
}

impl fmt::Debug for EnvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvStore").finish_non_exhaustive()
    }
}

impl TokenStore for EnvStore {
    fn load(&self) -> Result<Option<TokenRecord>> {
        match self.read_record() {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(kind = %ErrorKind::CorruptRecord, error = %e, "Ignoring malformed token environment");
                Ok(None)
            }
        }
    }

    fn save(&self, _record: &TokenRecord) -> Result<()> {
        Err(Error::UnsupportedOperation(
            "environment token store is read-only; save is not supported".to_string(),
        ))
    }

    fn clear(&self) -> Result<()> {
        Err(Error::UnsupportedOperation(
            "environment token store is read-only; clear is not supported".to_string(),
        ))
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn describe(&self) -> &'static str {
        "env"
    }
}
