//! OAuth client configuration

use std::fmt;

use url::Url;

use crate::config::OAuthSettings;
use crate::{Error, Result};

/// FreshBooks authorization endpoint
pub const FRESHBOOKS_AUTHORIZATION_URL: &str = "https://auth.freshbooks.com/oauth/authorize";
/// FreshBooks token endpoint
pub const FRESHBOOKS_TOKEN_URL: &str = "https://api.freshbooks.com/auth/oauth/token";
/// FreshBooks token revocation endpoint
pub const FRESHBOOKS_REVOCATION_URL: &str = "https://api.freshbooks.com/auth/oauth/revoke";

/// Immutable OAuth client configuration.
///
/// Supplied once at startup and never persisted. The client secret is kept
/// out of `Debug` output.
#[derive(Clone)]
pub struct OAuthConfig {
    /// Registered application client id
    pub client_id: String,
    /// Registered application client secret
    pub client_secret: String,
    /// Redirect URI registered with the provider
    pub redirect_uri: Url,
    /// Requested scopes (empty = provider default)
    pub scopes: Vec<String>,
    /// Authorization endpoint the user is sent to
    pub authorization_endpoint: Url,
    /// Token endpoint for code exchange and refresh
    pub token_endpoint: Url,
    /// Optional revocation endpoint notified on logout
    pub revocation_endpoint: Option<Url>,
}

impl OAuthConfig {
    /// Create a configuration against the FreshBooks endpoints
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: &str,
    ) -> Result<Self> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();

        if client_id.trim().is_empty() {
            return Err(Error::Config("OAuth client_id is required".to_string()));
        }
        if client_secret.trim().is_empty() {
            return Err(Error::Config("OAuth client_secret is required".to_string()));
        }

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri: parse_url("redirect_uri", redirect_uri)?,
            scopes: Vec::new(),
            authorization_endpoint: parse_url("authorization_endpoint", FRESHBOOKS_AUTHORIZATION_URL)?,
            token_endpoint: parse_url("token_endpoint", FRESHBOOKS_TOKEN_URL)?,
            revocation_endpoint: Some(parse_url("revocation_endpoint", FRESHBOOKS_REVOCATION_URL)?),
        })
    }

    /// Build from the `oauth` section of the configuration file
    pub fn from_settings(settings: &OAuthSettings) -> Result<Self> {
        let client_id = settings.client_id.clone().unwrap_or_default();
        let client_secret = settings.client_secret.clone().unwrap_or_default();
        let redirect_uri = settings
            .redirect_uri
            .as_deref()
            .ok_or_else(|| Error::Config("OAuth redirect_uri is required".to_string()))?;

        let mut config = Self::new(client_id, client_secret, redirect_uri)?
            .with_scopes(settings.scopes.clone());
        config.authorization_endpoint =
            parse_url("authorization_endpoint", &settings.authorization_endpoint)?;
        config.token_endpoint = parse_url("token_endpoint", &settings.token_endpoint)?;
        config.revocation_endpoint = settings
            .revocation_endpoint
            .as_deref()
            .map(|u| parse_url("revocation_endpoint", u))
            .transpose()?;
        Ok(config)
    }

    /// Set the requested scopes
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Point the token endpoint somewhere else (mock servers, sandboxes)
    #[must_use]
    pub fn with_token_endpoint(mut self, endpoint: Url) -> Self {
        self.token_endpoint = endpoint;
        self
    }

    /// Replace or disable the revocation endpoint
    #[must_use]
    pub fn with_revocation_endpoint(mut self, endpoint: Option<Url>) -> Self {
        self.revocation_endpoint = endpoint;
        self
    }

    /// Space-separated scope string, `None` when no scopes are configured
    #[must_use]
    pub fn scope_string(&self) -> Option<String> {
        (!self.scopes.is_empty()).then(|| self.scopes.join(" "))
    }
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri.as_str())
            .field("scopes", &self.scopes)
            .field("authorization_endpoint", &self.authorization_endpoint.as_str())
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field(
                "revocation_endpoint",
                &self.revocation_endpoint.as_ref().map(Url::as_str),
            )
            .finish()
    }
}

fn parse_url(field: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| Error::Config(format!("Invalid {field} '{value}': {e}")))
}
