//! Token endpoint transport
//!
//! [`TokenEndpoint`] is the seam between the OAuth client's policy (when to
//! refresh, what to persist) and the wire. [`HttpTokenEndpoint`] speaks the
//! form-encoded OAuth2 token and revocation protocol.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::config::OAuthConfig;
use crate::{Error, ProviderError, Result};

/// Grant presented to the token endpoint
#[derive(Clone, Copy)]
pub enum TokenGrant<'a> {
    /// `grant_type=authorization_code`
    AuthorizationCode {
        /// Code returned on the redirect
        code: &'a str,
    },
    /// `grant_type=refresh_token`
    RefreshToken {
        /// Stored refresh token
        refresh_token: &'a str,
    },
}

impl TokenGrant<'_> {
    /// OAuth `grant_type` value
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }
}

impl fmt::Debug for TokenGrant<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("grant_type", &self.grant_type())
            .finish_non_exhaustive()
    }
}

/// Successful token endpoint response
#[derive(Clone, Default, Deserialize)]
pub struct TokenResponse {
    /// New access token
    #[serde(default)]
    pub access_token: String,
    /// Rotated refresh token, if the provider sent one
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Token type
    #[serde(default)]
    pub token_type: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Token endpoint failure
#[derive(Debug, Clone)]
pub enum GrantError {
    /// The provider answered with an OAuth error
    Rejected(ProviderError),
    /// The request never produced a provider answer
    Transport(Error),
}

impl From<Error> for GrantError {
    fn from(err: Error) -> Self {
        Self::Transport(err)
    }
}

impl From<reqwest::Error> for GrantError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.into())
    }
}

/// Provider token and revocation endpoints
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange a grant for tokens
    async fn request_token(
        &self,
        grant: TokenGrant<'_>,
    ) -> std::result::Result<TokenResponse, GrantError>;

    /// Revoke a token; providers without revocation succeed trivially
    async fn revoke(&self, token: &str) -> std::result::Result<(), GrantError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth2 token endpoint over HTTPS
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    http_client: Client,
    config: OAuthConfig,
}

impl HttpTokenEndpoint {
    /// Create an endpoint with the given request timeout
    pub fn new(config: OAuthConfig, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("freshbooks-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(config, http_client))
    }

    /// Create an endpoint over an existing HTTP client
    #[must_use]
    pub fn with_client(config: OAuthConfig, http_client: Client) -> Self {
        Self {
            http_client,
            config,
        }
    }

    async fn rejection(response: reqwest::Response) -> GrantError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ErrorBody>(&body).ok();

        let code = parsed
            .as_ref()
            .and_then(|b| b.error.clone())
            .unwrap_or_else(|| "http_error".to_string());
        let mut err = ProviderError::new(code).with_status(status);
        if let Some(description) = parsed.and_then(|b| b.error_description) {
            err = err.with_description(description);
        }
        GrantError::Rejected(err)
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn request_token(
        &self,
        grant: TokenGrant<'_>,
    ) -> std::result::Result<TokenResponse, GrantError> {
        let redirect_uri = self.config.redirect_uri.as_str();
        let mut params = vec![
            ("grant_type", grant.grant_type()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        match grant {
            TokenGrant::AuthorizationCode { code } => {
                params.push(("code", code));
                params.push(("redirect_uri", redirect_uri));
            }
            TokenGrant::RefreshToken { refresh_token } => {
                params.push(("refresh_token", refresh_token));
            }
        }

        debug!(grant_type = grant.grant_type(), endpoint = %self.config.token_endpoint, "Requesting token");

        let response = self
            .http_client
            .post(self.config.token_endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let status = response.status().as_u16();
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            GrantError::Rejected(
                ProviderError::new("invalid_response")
                    .with_description(format!("unparseable token response: {e}"))
                    .with_status(status),
            )
        })
    }

    async fn revoke(&self, token: &str) -> std::result::Result<(), GrantError> {
        let Some(endpoint) = &self.config.revocation_endpoint else {
            return Ok(());
        };

        let params = [
            ("token", token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        let response = self
            .http_client
            .post(endpoint.clone())
            .form(&params)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::rejection(response).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_debug_hides_secrets() {
        let grant = TokenGrant::RefreshToken {
            refresh_token: "very-secret-refresh",
        };
        let debug = format!("{grant:?}");
        assert!(debug.contains("refresh_token"));
        assert!(!debug.contains("very-secret-refresh"));
    }

    #[test]
    fn response_debug_hides_tokens() {
        let response = TokenResponse {
            access_token: "acc-xyz".to_string(),
            refresh_token: Some("ref-xyz".to_string()),
            expires_in: Some(3600),
            token_type: None,
        };
        let debug = format!("{response:?}");
        assert!(!debug.contains("acc-xyz"));
        assert!(!debug.contains("ref-xyz"));
        assert!(debug.contains("3600"));
    }

    #[test]
    fn response_tolerates_missing_fields() {
        let response: TokenResponse = serde_json::from_str(r#"{"access_token":"a"}"#).unwrap();
        assert_eq!(response.access_token, "a");
        assert_eq!(response.refresh_token, None);
        assert_eq!(response.expires_in, None);
    }
}
