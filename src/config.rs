//! Configuration management

use std::{
    env, fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::oauth::crypto::DEFAULT_PASSPHRASE_ENV;
use crate::oauth::{
    DEFAULT_REFRESH_MARGIN, DEFAULT_REQUEST_TIMEOUT, FRESHBOOKS_AUTHORIZATION_URL,
    FRESHBOOKS_REVOCATION_URL, FRESHBOOKS_TOKEN_URL, OAuthConfig,
};
use crate::{Error, Result};

/// Client id fallback variable
pub const ENV_CLIENT_ID: &str = "FRESHBOOKS_CLIENT_ID";
/// Client secret fallback variable
pub const ENV_CLIENT_SECRET: &str = "FRESHBOOKS_CLIENT_SECRET";
/// Redirect URI fallback variable
pub const ENV_REDIRECT_URI: &str = "FRESHBOOKS_REDIRECT_URI";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving credentials.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// OAuth client settings
    pub oauth: OAuthSettings,
    /// Token storage settings
    pub storage: StorageSettings,
    /// FreshBooks API settings
    pub api: ApiSettings,
}

/// OAuth client settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    /// Application client id
    pub client_id: Option<String>,
    /// Application client secret
    pub client_secret: Option<String>,
    /// Registered redirect URI
    pub redirect_uri: Option<String>,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// Revocation endpoint (`null` disables remote revocation)
    pub revocation_endpoint: Option<String>,
    /// Refresh this long before expiry
    #[serde(with = "humantime_serde")]
    pub refresh_margin: Duration,
    /// Token endpoint request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            scopes: Vec::new(),
            authorization_endpoint: FRESHBOOKS_AUTHORIZATION_URL.to_string(),
            token_endpoint: FRESHBOOKS_TOKEN_URL.to_string(),
            revocation_endpoint: Some(FRESHBOOKS_REVOCATION_URL.to_string()),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("revocation_endpoint", &self.revocation_endpoint)
            .field("refresh_margin", &self.refresh_margin)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Token store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory (lost on exit)
    Memory,
    /// Read-only `FRESHBOOKS_*` environment variables
    Env,
    /// Encrypted file
    #[default]
    File,
}

/// Token storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Backend selection
    pub backend: StorageBackend,
    /// Token file path (default `~/.freshbooks-mcp/tokens.enc`)
    pub path: Option<String>,
    /// Variable holding the optional key-derivation passphrase
    pub passphrase_env: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            path: None,
            passphrase_env: DEFAULT_PASSPHRASE_ENV.to_string(),
        }
    }
}

impl StorageSettings {
    /// Resolved token file location
    pub fn token_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(PathBuf::from(expand_home(path))),
            None => dirs::home_dir()
                .map(|home| home.join(".freshbooks-mcp").join("tokens.enc"))
                .ok_or_else(|| Error::Config("Cannot determine home directory".to_string())),
        }
    }
}

/// FreshBooks API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// API base URL
    pub base_url: String,
    /// Request timeout for API calls
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.freshbooks.com".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // FRESHBOOKS_MCP_OAUTH__CLIENT_ID -> oauth.client_id
        figment = figment.merge(Env::prefixed("FRESHBOOKS_MCP_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.apply_credential_env(|name| env::var(name).ok());

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Fill unset credentials from the conventional `FRESHBOOKS_*` variables
    fn apply_credential_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let oauth = &mut self.oauth;
        for (slot, name) in [
            (&mut oauth.client_id, ENV_CLIENT_ID),
            (&mut oauth.client_secret, ENV_CLIENT_SECRET),
            (&mut oauth.redirect_uri, ENV_REDIRECT_URI),
        ] {
            if slot.is_none() {
                *slot = lookup(name).filter(|v| !v.trim().is_empty());
            }
        }
    }

    /// Validated OAuth client configuration
    pub fn oauth_config(&self) -> Result<OAuthConfig> {
        OAuthConfig::from_settings(&self.oauth)
    }
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Human-readable durations: `"250ms"`, `"30s"`, `"5m"`, `"1h"` or bare seconds
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Integer seconds from YAML or env, or a suffixed string
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Secs(u64),
        Text(String),
    }

    /// Deserialize a human-readable duration string or integer seconds
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawDuration::deserialize(deserializer)? {
            RawDuration::Secs(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Text(s) => parse(s.trim()).map_err(serde::de::Error::custom),
        }
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, String> {
        // "ms" must be checked before "s" and "m"
        let (number, scale, millis) = if let Some(ms) = s.strip_suffix("ms") {
            (ms, 1, true)
        } else if let Some(secs) = s.strip_suffix('s') {
            (secs, 1, false)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60, false)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3600, false)
        } else {
            (s, 1, false)
        };

        let value = number
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid duration '{s}': {e}"))?;
        let value = value
            .checked_mul(scale)
            .ok_or_else(|| format!("duration '{s}' is too large"))?;
        Ok(if millis {
            Duration::from_millis(value)
        } else {
            Duration::from_secs(value)
        })
    }
}
