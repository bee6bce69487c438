//! OAuth 2.0 credential lifecycle for FreshBooks
//!
//! Implements the authorization-code flow as a confidential client and
//! keeps the resulting tokens usable for every tool call.
//!
//! Features:
//! - Authorization URL construction and code exchange
//! - Single-flight refresh with a configurable safety margin
//! - Pluggable token storage (memory, environment, encrypted file)
//! - Best-effort revocation on logout
//!
//! ```
//! use std::sync::Arc;
//! use freshbooks_mcp::oauth::{InMemoryStore, OAuthClient, OAuthConfig};
//!
//! # tokio_test::block_on(async {
//! let config = OAuthConfig::new("client-id", "client-secret", "https://localhost/callback")?;
//! let client = OAuthClient::builder(config, Arc::new(InMemoryStore::new())).build()?;
//!
//! assert!(!client.get_status().authenticated);
//! assert!(client.get_valid_token().await.is_err());
//! # Ok::<(), freshbooks_mcp::Error>(())
//! # }).unwrap();
//! ```

mod client;
mod config;
pub mod crypto;
mod endpoint;
mod record;
mod status;
pub mod storage;

pub use client::{
    BearerTokenProvider, DEFAULT_REFRESH_MARGIN, DEFAULT_REQUEST_TIMEOUT, OAuthClient,
    OAuthClientBuilder, generate_state,
};
pub use config::{
    FRESHBOOKS_AUTHORIZATION_URL, FRESHBOOKS_REVOCATION_URL, FRESHBOOKS_TOKEN_URL, OAuthConfig,
};
pub use endpoint::{GrantError, HttpTokenEndpoint, TokenEndpoint, TokenGrant, TokenResponse};
pub use record::{DEFAULT_TOKEN_LIFETIME_SECS, TokenRecord};
pub use status::AuthStatus;
pub use storage::{EncryptedFileStore, EnvStore, InMemoryStore, TokenStore};
