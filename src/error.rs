//! Error types for the FreshBooks MCP server
//!
//! Every failure carries an [`ErrorKind`] so callers (tools, the CLI, the MCP
//! layer) can tell "try again" apart from "re-authenticate" without matching on
//! message text. Messages and `Debug` output never contain token values.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for the FreshBooks MCP server
pub type Result<T> = std::result::Result<T, Error>;

/// Error reported by the OAuth provider in a token or revocation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// HTTP status of the provider response, when one was received
    pub status: Option<u16>,
    /// OAuth error code (`invalid_grant`, `invalid_client`, ...)
    pub code: String,
    /// Human-readable description supplied by the provider
    pub description: Option<String>,
}

impl ProviderError {
    /// Create a provider error with the given code and no description
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            status: None,
            code: code.into(),
            description: None,
        }
    }

    /// Attach a description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach the HTTP status
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// `true` if the provider rejected the grant (dead, used or revoked code/token)
    pub fn is_invalid_grant(&self) -> bool {
        self.code == "invalid_grant"
    }

    /// `true` if the provider rejected the client credentials
    pub fn is_invalid_client(&self) -> bool {
        self.code == "invalid_client"
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)?;
        if let Some(description) = &self.description {
            write!(f, " ({description})")?;
        }
        if let Some(status) = self.status {
            write!(f, " [HTTP {status}]")?;
        }
        Ok(())
    }
}

/// FreshBooks MCP errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// No usable token record exists
    #[error("Not authenticated with FreshBooks; run the authorization flow first")]
    NotAuthenticated,

    /// Authorization code exchange was rejected by the provider
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(ProviderError),

    /// Refresh was rejected by the provider for a reason other than a dead grant
    #[error("Token refresh failed: {0}")]
    RefreshFailed(ProviderError),

    /// Authorization code is invalid, expired or already used
    #[error("Authorization code rejected: {0}")]
    InvalidGrant(ProviderError),

    /// Client id/secret rejected; fix the configuration
    #[error("Client credentials rejected: {0}")]
    InvalidClient(ProviderError),

    /// No refresh token is stored
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The stored refresh token is dead; local credentials were cleared
    #[error("FreshBooks session expired; re-authorization required")]
    SessionExpired,

    /// Mutation attempted on a read-only token store
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Token file could not be decrypted (wrong key, corruption or tampering)
    #[error("Token decryption failed: {0}")]
    DecryptionFailed(String),

    /// Decrypted or environment-supplied record is malformed
    #[error("Stored token record is corrupt: {0}")]
    CorruptRecord(String),

    /// Token file does not exist
    #[error("Token file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport error (timeout, DNS, connection reset)
    #[error("HTTP error: {0}")]
    Http(#[source] Arc<reqwest::Error>),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    /// MCP protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(Arc::new(err.without_url()))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

/// Stable, matchable classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::NotAuthenticated`]
    NotAuthenticated,
    /// See [`Error::TokenExchangeFailed`]
    TokenExchangeFailed,
    /// See [`Error::RefreshFailed`]
    RefreshFailed,
    /// See [`Error::InvalidGrant`]
    InvalidGrant,
    /// See [`Error::InvalidClient`]
    InvalidClient,
    /// See [`Error::NoRefreshToken`]
    NoRefreshToken,
    /// See [`Error::SessionExpired`]
    SessionExpired,
    /// See [`Error::UnsupportedOperation`]
    UnsupportedOperation,
    /// See [`Error::DecryptionFailed`]
    DecryptionFailed,
    /// See [`Error::CorruptRecord`]
    CorruptRecord,
    /// See [`Error::NotFound`]
    NotFound,
    /// See [`Error::Config`]
    Config,
    /// See [`Error::Http`]
    Http,
    /// See [`Error::Io`]
    Io,
    /// See [`Error::Json`]
    Json,
    /// See [`Error::Protocol`]
    Protocol,
    /// See [`Error::Internal`]
    Internal,
}

impl ErrorKind {
    /// `snake_case` name used in tool results and logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::TokenExchangeFailed => "token_exchange_failed",
            Self::RefreshFailed => "refresh_failed",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidClient => "invalid_client",
            Self::NoRefreshToken => "no_refresh_token",
            Self::SessionExpired => "session_expired",
            Self::UnsupportedOperation => "unsupported_operation",
            Self::DecryptionFailed => "decryption_failed",
            Self::CorruptRecord => "corrupt_record",
            Self::NotFound => "not_found",
            Self::Config => "config",
            Self::Http => "http",
            Self::Io => "io",
            Self::Json => "json",
            Self::Protocol => "protocol",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAuthenticated => ErrorKind::NotAuthenticated,
            Self::TokenExchangeFailed(_) => ErrorKind::TokenExchangeFailed,
            Self::RefreshFailed(_) => ErrorKind::RefreshFailed,
            Self::InvalidGrant(_) => ErrorKind::InvalidGrant,
            Self::InvalidClient(_) => ErrorKind::InvalidClient,
            Self::NoRefreshToken => ErrorKind::NoRefreshToken,
            Self::SessionExpired => ErrorKind::SessionExpired,
            Self::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            Self::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
            Self::CorruptRecord(_) => ErrorKind::CorruptRecord,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Config(_) => ErrorKind::Config,
            Self::Http(_) => ErrorKind::Http,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Json,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// `true` for transport-level failures a caller may simply retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// `true` when the user has to run the authorization flow again
    #[must_use]
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotAuthenticated
                | ErrorKind::SessionExpired
                | ErrorKind::InvalidGrant
                | ErrorKind::NoRefreshToken
                | ErrorKind::DecryptionFailed
                | ErrorKind::CorruptRecord
                | ErrorKind::NotFound
        )
    }

    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Protocol(_) => rpc_codes::INVALID_REQUEST,
            _ if self.requires_reauthentication() => rpc_codes::AUTHENTICATION_REQUIRED,
            Self::Http(_) | Self::Io(_) => rpc_codes::SERVER_ERROR_START,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server error range start
    pub const SERVER_ERROR_START: i32 = -32000;
    /// Credentials missing or dead (server-defined range)
    pub const AUTHENTICATION_REQUIRED: i32 = -32001;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_display_includes_code_description_and_status() {
        let err = ProviderError::new("invalid_grant")
            .with_description("code already used")
            .with_status(400);
        assert_eq!(
            err.to_string(),
            "invalid_grant (code already used) [HTTP 400]"
        );
        assert!(err.is_invalid_grant());
        assert!(!err.is_invalid_client());
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Error::SessionExpired.kind(), ErrorKind::SessionExpired);
        assert_eq!(
            Error::InvalidClient(ProviderError::new("invalid_client")).kind(),
            ErrorKind::InvalidClient
        );
        assert_eq!(ErrorKind::DecryptionFailed.to_string(), "decryption_failed");
    }

    #[test]
    fn reauthentication_grouping() {
        assert!(Error::NotAuthenticated.requires_reauthentication());
        assert!(Error::SessionExpired.requires_reauthentication());
        assert!(Error::DecryptionFailed("bad tag".into()).requires_reauthentication());
        assert!(!Error::InvalidClient(ProviderError::new("invalid_client")).requires_reauthentication());
        assert!(!Error::UnsupportedOperation("save".into()).requires_reauthentication());
    }

    #[test]
    fn io_errors_are_transient() {
        let err: Error = io::Error::new(io::ErrorKind::TimedOut, "slow disk").into();
        assert!(err.is_transient());
        assert!(!Error::NotAuthenticated.is_transient());
    }

    #[test]
    fn rpc_codes_follow_kind() {
        assert_eq!(
            Error::NotAuthenticated.to_rpc_code(),
            rpc_codes::AUTHENTICATION_REQUIRED
        );
        assert_eq!(
            Error::Protocol("bad".into()).to_rpc_code(),
            rpc_codes::INVALID_REQUEST
        );
        assert_eq!(
            Error::Internal("x".into()).to_rpc_code(),
            rpc_codes::INTERNAL_ERROR
        );
    }

    #[test]
    fn errors_are_clone() {
        let err: Error = io::Error::other("boom").into();
        let copy = err.clone();
        assert_eq!(copy.kind(), ErrorKind::Io);
        assert_eq!(copy.to_string(), err.to_string());
    }
}
