//! FreshBooks MCP Library
//!
//! OAuth2 credential lifecycle for a FreshBooks Model Context Protocol server.
//!
//! # Features
//!
//! - **Authorization-code flow**: authorization URL, code exchange, revocation
//! - **Single-flight refresh**: concurrent callers share one token refresh
//! - **Encrypted token store**: AES-256-GCM with a machine-bound Argon2id key
//! - **Environment store**: read-only credentials for CI and containers
//! - **MCP tools**: `auth_*` tools over stdio JSON-RPC
//!
//! Tokens never appear in logs, errors or tool results.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod oauth;
pub mod protocol;
pub mod server;
pub mod tools;

pub use error::{Error, ErrorKind, ProviderError, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging on stderr (stdout is reserved for MCP frames)
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
