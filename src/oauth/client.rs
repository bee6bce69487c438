//! OAuth Client
//!
//! Authorization-code flow against FreshBooks plus the refresh policy every
//! tool relies on: a stored token is handed out until it is within the
//! refresh margin of expiry, then exactly one refresh runs no matter how many
//! callers are waiting for it.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use argon2::password_hash::rand_core::{OsRng, RngCore};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use url::Url;

use super::config::OAuthConfig;
use super::endpoint::{GrantError, HttpTokenEndpoint, TokenEndpoint, TokenGrant, TokenResponse};
use super::record::{DEFAULT_TOKEN_LIFETIME_SECS, TokenRecord};
use super::status::AuthStatus;
use super::storage::TokenStore;
use crate::clock::{Clock, SystemClock};
use crate::{Error, ProviderError, Result};

/// Refresh when this close to expiry
pub const DEFAULT_REFRESH_MARGIN: StdDuration = StdDuration::from_secs(5 * 60);
/// Token endpoint request timeout
pub const DEFAULT_REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(30);

type RefreshFuture = Shared<BoxFuture<'static, Result<TokenRecord>>>;

/// Source of a currently valid bearer token.
///
/// This is the only capability resource tools need from the auth layer.
#[async_trait]
pub trait BearerTokenProvider: Send + Sync {
    /// A bearer token valid for at least the refresh margin
    async fn bearer_token(&self) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshMode {
    /// Skip the network call if another caller already refreshed
    IfStale,
    /// Always hit the token endpoint
    Force,
}

/// OAuth client handle; clones share state
#[derive(Clone)]
pub struct OAuthClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: OAuthConfig,
    store: Arc<dyn TokenStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    clock: Arc<dyn Clock>,
    refresh_margin: Duration,
    in_flight: Mutex<Option<RefreshFuture>>,
    /// Held across every read-modify-write of the store
    write_lock: AsyncMutex<()>,
}

/// Builder for [`OAuthClient`]
pub struct OAuthClientBuilder {
    config: OAuthConfig,
    store: Arc<dyn TokenStore>,
    endpoint: Option<Arc<dyn TokenEndpoint>>,
    clock: Arc<dyn Clock>,
    refresh_margin: StdDuration,
    request_timeout: StdDuration,
}

impl OAuthClientBuilder {
    /// Use a custom token endpoint transport
    #[must_use]
    pub fn endpoint(mut self, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Use a custom clock
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// How long before expiry a token counts as stale
    #[must_use]
    pub fn refresh_margin(mut self, margin: StdDuration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Timeout for the default HTTP token endpoint
    #[must_use]
    pub fn request_timeout(mut self, timeout: StdDuration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the client
    pub fn build(self) -> Result<OAuthClient> {
        let refresh_margin = Duration::from_std(self.refresh_margin)
            .map_err(|e| Error::Config(format!("Invalid refresh margin: {e}")))?;
        let endpoint = match self.endpoint {
            Some(endpoint) => endpoint,
            None => Arc::new(HttpTokenEndpoint::new(
                self.config.clone(),
                self.request_timeout,
            )?),
        };

        Ok(OAuthClient {
            inner: Arc::new(Inner {
                config: self.config,
                store: self.store,
                endpoint,
                clock: self.clock,
                refresh_margin,
                in_flight: Mutex::new(None),
                write_lock: AsyncMutex::new(()),
            }),
        })
    }
}

impl OAuthClient {
    /// Start building a client over `store`
    pub fn builder(config: OAuthConfig, store: Arc<dyn TokenStore>) -> OAuthClientBuilder {
        OAuthClientBuilder {
            config,
            store,
            endpoint: None,
            clock: Arc::new(SystemClock),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Client configuration
    pub fn config(&self) -> &OAuthConfig {
        &self.inner.config
    }

    /// Label of the backing token store
    pub fn store_backend(&self) -> &'static str {
        self.inner.store.describe()
    }

    /// URL the user opens to grant access
    pub fn generate_authorization_url(&self, state: Option<&str>) -> Url {
        let config = &self.inner.config;
        let mut url = config.authorization_endpoint.clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("client_id", &config.client_id);
            params.append_pair("response_type", "code");
            params.append_pair("redirect_uri", config.redirect_uri.as_str());
            if let Some(scope) = config.scope_string() {
                params.append_pair("scope", &scope);
            }
            if let Some(state) = state {
                params.append_pair("state", state);
            }
        }
        url
    }

    /// Exchange an authorization code for tokens and persist them.
    ///
    /// Nothing is written unless the provider accepts the code.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenRecord> {
        let code = code.trim();
        if code.is_empty() {
            return Err(Error::TokenExchangeFailed(
                ProviderError::new("invalid_request").with_description("authorization code is empty"),
            ));
        }
        self.inner.ensure_writable("exchange_code")?;

        let response = match self
            .inner
            .endpoint
            .request_token(TokenGrant::AuthorizationCode { code })
            .await
        {
            Ok(response) => response,
            Err(GrantError::Rejected(e)) => {
                warn!(code = %e.code, status = ?e.status, "Authorization code rejected");
                return Err(if e.is_invalid_grant() {
                    Error::InvalidGrant(e)
                } else if e.is_invalid_client() {
                    Error::InvalidClient(e)
                } else {
                    Error::TokenExchangeFailed(e)
                });
            }
            Err(GrantError::Transport(e)) => return Err(e),
        };

        let record = record_from_response(response, None, self.inner.clock.now())
            .map_err(Error::TokenExchangeFailed)?;
        {
            let _guard = self.inner.write_lock.lock().await;
            self.inner.store.save(&record)?;
        }

        info!(
            backend = self.inner.store.describe(),
            expires_at = %record.expires_at,
            "Authorization code exchanged"
        );
        Ok(record)
    }

    /// Refresh now, regardless of the current expiry.
    ///
    /// Joins a refresh already in flight.
    pub async fn refresh_access_token(&self) -> Result<TokenRecord> {
        self.refresh(RefreshMode::Force).await
    }

    /// Current access token, refreshing first if it is stale
    pub async fn get_valid_token(&self) -> Result<String> {
        let record = self.inner.store.load()?.ok_or(Error::NotAuthenticated)?;
        if !record.is_stale(self.inner.clock.now(), self.inner.refresh_margin) {
            return Ok(record.access_token);
        }

        debug!(expires_at = %record.expires_at, "Access token stale, refreshing");
        Ok(self.refresh(RefreshMode::IfStale).await?.access_token)
    }

    /// Log out locally, then tell the provider.
    ///
    /// Waits for a refresh already in flight so its result cannot land after
    /// the store is cleared. Remote revocation is best effort; only local
    /// failures are returned.
    pub async fn revoke_token(&self) -> Result<()> {
        let previous = {
            let _guard = self.inner.write_lock.lock().await;
            let previous = self.inner.store.load().ok().flatten();
            self.inner.store.clear()?;
            previous
        };
        info!(backend = self.inner.store.describe(), "Local credentials cleared");

        let Some(record) = previous else {
            return Ok(());
        };
        if let Err(e) = self.inner.endpoint.revoke(&record.refresh_token).await {
            match e {
                GrantError::Rejected(e) => {
                    warn!(code = %e.code, status = ?e.status, "Provider rejected token revocation");
                }
                GrantError::Transport(e) => {
                    warn!(error = %e, "Token revocation request failed");
                }
            }
        }
        Ok(())
    }

    /// Authentication snapshot; never refreshes or writes
    pub fn get_status(&self) -> AuthStatus {
        let now = self.inner.clock.now();
        match self.inner.store.load() {
            Ok(Some(record)) => AuthStatus::from_record(&record, now, self.inner.refresh_margin),
            Ok(None) => AuthStatus::unauthenticated("No FreshBooks credentials stored"),
            Err(e) => AuthStatus::unauthenticated(format!("Token store unavailable ({}): {e}", e.kind())),
        }
    }

    /// Select the FreshBooks account and business for later calls.
    ///
    /// Credentials are untouched unless the record is stale, in which case
    /// it is refreshed first.
    pub async fn set_active_account(
        &self,
        account_id: &str,
        business_id: Option<i64>,
    ) -> Result<TokenRecord> {
        let account_id = account_id.trim();
        if account_id.is_empty() {
            return Err(Error::Protocol("account_id must not be empty".to_string()));
        }

        let guard = self.inner.write_lock.lock().await;
        let mut record = self.inner.store.load()?.ok_or(Error::NotAuthenticated)?;
        if record.is_stale(self.inner.clock.now(), self.inner.refresh_margin) {
            record = self.inner.refresh_locked(RefreshMode::IfStale).await?;
        }

        let record = record.with_identity(Some(account_id.to_string()), business_id);
        self.inner.store.save(&record)?;
        drop(guard);
        info!(account_id, business_id = ?business_id, "Active account updated");
        Ok(record)
    }

    fn refresh(&self, mode: RefreshMode) -> RefreshFuture {
        let mut slot = self.inner.in_flight.lock();
        if let Some(in_flight) = slot.as_ref() {
            debug!("Joining in-flight token refresh");
            return in_flight.clone();
        }

        let inner = Arc::clone(&self.inner);
        let refresh = async move {
            let result = inner.refresh_once(mode).await;
            *inner.in_flight.lock() = None;
            result
        }
        .boxed()
        .shared();

        *slot = Some(refresh.clone());
        refresh
    }
}

impl Inner {
    fn ensure_writable(&self, operation: &str) -> Result<()> {
        if self.store.is_read_only() {
            return Err(Error::UnsupportedOperation(format!(
                "{operation} needs a writable token store; '{}' is read-only",
                self.store.describe()
            )));
        }
        Ok(())
    }

    async fn refresh_once(&self, mode: RefreshMode) -> Result<TokenRecord> {
        let _guard = self.write_lock.lock().await;
        self.refresh_locked(mode).await
    }

    /// Refresh with `write_lock` already held by the caller
    async fn refresh_locked(&self, mode: RefreshMode) -> Result<TokenRecord> {
        let current = self.store.load()?.ok_or(Error::NoRefreshToken)?;
        if mode == RefreshMode::IfStale && !current.is_stale(self.clock.now(), self.refresh_margin) {
            debug!("Token was refreshed by another caller");
            return Ok(current);
        }
        if current.refresh_token.is_empty() {
            return Err(Error::NoRefreshToken);
        }
        self.ensure_writable("refresh")?;

        let grant = TokenGrant::RefreshToken {
            refresh_token: &current.refresh_token,
        };
        let response = match self.endpoint.request_token(grant).await {
            Ok(response) => response,
            Err(GrantError::Rejected(e)) if e.is_invalid_grant() => {
                warn!(code = %e.code, "Refresh token rejected; clearing local credentials");
                if let Err(clear_err) = self.store.clear() {
                    warn!(error = %clear_err, "Failed to clear rejected credentials");
                }
                return Err(Error::SessionExpired);
            }
            Err(GrantError::Rejected(e)) => {
                warn!(code = %e.code, status = ?e.status, "Token refresh rejected");
                return Err(if e.is_invalid_client() {
                    Error::InvalidClient(e)
                } else {
                    Error::RefreshFailed(e)
                });
            }
            Err(GrantError::Transport(e)) => {
                warn!(error = %e, "Token refresh request failed");
                return Err(e);
            }
        };

        let record = record_from_response(response, Some(&current.refresh_token), self.clock.now())
            .map_err(Error::RefreshFailed)?
            .with_identity(current.account_id.clone(), current.business_id);
        self.store.save(&record)?;

        info!(expires_at = %record.expires_at, "Access token refreshed");
        Ok(record)
    }
}

#[async_trait]
impl BearerTokenProvider for OAuthClient {
    async fn bearer_token(&self) -> Result<String> {
        self.get_valid_token().await
    }
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("config", &self.inner.config)
            .field("store", &self.inner.store.describe())
            .field("refresh_margin", &self.inner.refresh_margin)
            .finish_non_exhaustive()
    }
}

/// Validate a token response and turn it into a record.
///
/// `previous_refresh` is kept when the provider does not rotate the refresh
/// token; without one a missing refresh token is an invalid response.
fn record_from_response(
    response: TokenResponse,
    previous_refresh: Option<&str>,
    now: DateTime<Utc>,
) -> std::result::Result<TokenRecord, ProviderError> {
    let invalid = |what: &str| ProviderError::new("invalid_response").with_description(what);

    if response.access_token.is_empty() {
        return Err(invalid("token response has no access_token"));
    }

    let expires_in = response.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
    if expires_in <= 0 {
        return Err(invalid("token response has a non-positive expires_in"));
    }

    let refresh_token = response
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| previous_refresh.map(str::to_string))
        .ok_or_else(|| invalid("token response has no refresh_token"))?;

    let mut record = TokenRecord::new(
        response.access_token,
        refresh_token,
        now + Duration::seconds(expires_in),
    );
    if let Some(token_type) = response.token_type.filter(|t| !t.is_empty()) {
        record.token_type = token_type;
    }
    Ok(record)
}

/// Random `state` value for CSRF protection
pub fn generate_state() -> String {
    let mut state_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut state_bytes);
    URL_SAFE_NO_PAD.encode(state_bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ErrorKind;
    use crate::clock::ManualClock;
    use crate::oauth::storage::{EnvStore, InMemoryStore};

    /// Endpoint answering from a script of canned results
    #[derive(Default)]
    struct ScriptedEndpoint {
        replies: Mutex<VecDeque<std::result::Result<TokenResponse, GrantError>>>,
        token_calls: AtomicUsize,
        revoked: Mutex<Vec<String>>,
        fail_revoke: bool,
    }

    impl ScriptedEndpoint {
        fn replying(
            replies: impl IntoIterator<Item = std::result::Result<TokenResponse, GrantError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                ..Self::default()
            })
        }

        fn calls(&self) -> usize {
            self.token_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenEndpoint for ScriptedEndpoint {
        async fn request_token(
            &self,
            _grant: TokenGrant<'_>,
        ) -> std::result::Result<TokenResponse, GrantError> {
            self.token_calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(GrantError::Transport(Error::Internal("no reply".into()))))
        }

        async fn revoke(&self, token: &str) -> std::result::Result<(), GrantError> {
            self.revoked.lock().push(token.to_string());
            if self.fail_revoke {
                Err(GrantError::Rejected(ProviderError::new("server_error").with_status(503)))
            } else {
                Ok(())
            }
        }
    }

    fn tokens(access: &str, refresh: Option<&str>, expires_in: i64) -> TokenResponse {
        TokenResponse {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_in: Some(expires_in),
            token_type: Some("Bearer".to_string()),
        }
    }

    fn rejected(code: &str) -> std::result::Result<TokenResponse, GrantError> {
        Err(GrantError::Rejected(ProviderError::new(code).with_status(400)))
    }

    fn config() -> OAuthConfig {
        OAuthConfig::new("client-1", "secret-1", "https://localhost:8787/callback")
            .unwrap()
            .with_scopes(vec!["user:profile:read".to_string()])
    }

    fn client_with(
        store: Arc<dyn TokenStore>,
        endpoint: Arc<ScriptedEndpoint>,
        clock: &ManualClock,
    ) -> OAuthClient {
        OAuthClient::builder(config(), store)
            .endpoint(endpoint)
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap()
    }

    // =========================================================================
    // Authorization URL
    // =========================================================================

    #[test]
    fn authorization_url_carries_required_params() {
        let clock = ManualClock::new();
        let client = client_with(
            Arc::new(InMemoryStore::new()),
            ScriptedEndpoint::replying([]),
            &clock,
        );
        let url = client.generate_authorization_url(Some("xyz"));
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("auth.freshbooks.com"));
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["redirect_uri"], "https://localhost:8787/callback");
        assert_eq!(params["scope"], "user:profile:read");
        assert_eq!(params["state"], "xyz");
    }

    #[test]
    fn authorization_url_omits_state_when_absent() {
        let clock = ManualClock::new();
        let client = client_with(
            Arc::new(InMemoryStore::new()),
            ScriptedEndpoint::replying([]),
            &clock,
        );
        let url = client.generate_authorization_url(None);
        assert!(url.query_pairs().all(|(k, _)| k != "state"));
    }

    #[test]
    fn state_is_random_base64url() {
        let a = generate_state();
        let b = generate_state();
        assert_ne!(a, b);
        assert_eq!(a.len(), 22);
        assert!(!a.contains(['+', '/', '=']));
    }

    // =========================================================================
    // Code exchange
    // =========================================================================

    #[tokio::test]
    async fn exchange_persists_record_without_identity() {
        let clock = ManualClock::new();
        let store = Arc::new(InMemoryStore::new());
        let endpoint = ScriptedEndpoint::replying([Ok(tokens("tok1", Some("ref1"), 3600))]);
        let client = client_with(store.clone(), endpoint.clone(), &clock);

        let record = client.exchange_code("ABC123").await.unwrap();

        assert_eq!(record.access_token, "tok1");
        assert_eq!(record.refresh_token, "ref1");
        assert_eq!(record.expires_at, clock.now() + Duration::seconds(3600));
        assert_eq!(record.account_id, None);
        assert_eq!(store.load().unwrap(), Some(record));
    }

    #[tokio::test]
    async fn exchange_maps_provider_errors() {
        for (code, expected) in [
            ("invalid_grant", ErrorKind::InvalidGrant),
            ("invalid_client", ErrorKind::InvalidClient),
            ("unsupported_grant_type", ErrorKind::TokenExchangeFailed),
        ] {
            let clock = ManualClock::new();
            let store = Arc::new(InMemoryStore::new());
            let client = client_with(store.clone(), ScriptedEndpoint::replying([rejected(code)]), &clock);

            let err = client.exchange_code("expired-code").await.unwrap_err();
            assert_eq!(err.kind(), expected);
            assert_eq!(store.load().unwrap(), None, "nothing written for {code}");
        }
    }

    #[tokio::test]
    async fn exchange_rejects_empty_code_locally() {
        let clock = ManualClock::new();
        let endpoint = ScriptedEndpoint::replying([]);
        let client = client_with(Arc::new(InMemoryStore::new()), endpoint.clone(), &clock);

        let err = client.exchange_code("   ").await.unwrap_err();
        assert!(matches!(err, Error::TokenExchangeFailed(ref e) if e.code == "invalid_request"));
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn exchange_validates_response() {
        let clock = ManualClock::new();
        for reply in [
            tokens("", Some("r"), 3600),
            tokens("a", Some("r"), 0),
            tokens("a", None, 3600),
        ] {
            let store = Arc::new(InMemoryStore::new());
            let client = client_with(store.clone(), ScriptedEndpoint::replying([Ok(reply)]), &clock);
            let err = client.exchange_code("code").await.unwrap_err();
            assert!(matches!(err, Error::TokenExchangeFailed(ref e) if e.code == "invalid_response"));
            assert_eq!(store.load().unwrap(), None);
        }
    }

    #[tokio::test]
    async fn missing_expires_in_defaults_to_twelve_hours() {
        let clock = ManualClock::new();
        let mut reply = tokens("a", Some("r"), 1);
        reply.expires_in = None;
        reply.token_type = None;
        let client = client_with(
            Arc::new(InMemoryStore::new()),
            ScriptedEndpoint::replying([Ok(reply)]),
            &clock,
        );

        let record = client.exchange_code("code").await.unwrap();
        assert_eq!(record.expires_at, clock.now() + Duration::hours(12));
        assert_eq!(record.token_type, "Bearer");
    }

    // =========================================================================
    // Refresh policy
    // =========================================================================

    #[tokio::test]
    async fn valid_token_is_served_without_network() {
        let clock = ManualClock::new();
        let store = Arc::new(InMemoryStore::with_record(TokenRecord::new(
            "cached",
            "r",
            clock.now() + Duration::minutes(10),
        )));
        let endpoint = ScriptedEndpoint::replying([]);
        let client = client_with(store, endpoint.clone(), &clock);

        assert_eq!(client.get_valid_token().await.unwrap(), "cached");
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn stale_token_refreshes_and_keeps_identity() {
        let clock = ManualClock::new();
        let store = Arc::new(InMemoryStore::with_record(
            TokenRecord::new("old", "ref-old", clock.now() + Duration::seconds(30))
                .with_identity(Some("ACC".into()), Some(3)),
        ));
        let endpoint = ScriptedEndpoint::replying([Ok(tokens("new", None, 3600))]);
        let client = client_with(store.clone(), endpoint.clone(), &clock);

        assert_eq!(client.get_valid_token().await.unwrap(), "new");
        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.refresh_token, "ref-old");
        assert_eq!(stored.account_id.as_deref(), Some("ACC"));
        assert_eq!(stored.business_id, Some(3));
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test]
    async fn rotated_refresh_token_is_persisted() {
        let clock = ManualClock::new();
        let store = Arc::new(InMemoryStore::with_record(TokenRecord::new(
            "old",
            "ref-old",
            clock.now(),
        )));
        let client = client_with(
            store.clone(),
            ScriptedEndpoint::replying([Ok(tokens("new", Some("ref-new"), 3600))]),
            &clock,
        );

        client.refresh_access_token().await.unwrap();
        assert_eq!(store.load().unwrap().unwrap().refresh_token, "ref-new");
    }

    #[tokio::test]
    async fn no_record_means_not_authenticated() {
        let clock = ManualClock::new();
        let client = client_with(
            Arc::new(InMemoryStore::new()),
            ScriptedEndpoint::replying([]),
            &clock,
        );
        assert!(matches!(client.get_valid_token().await, Err(Error::NotAuthenticated)));
        assert!(matches!(client.refresh_access_token().await, Err(Error::NoRefreshToken)));
    }

    #[tokio::test]
    async fn invalid_grant_on_refresh_clears_store() {
        let clock = ManualClock::new();
        let store = Arc::new(InMemoryStore::with_record(TokenRecord::new(
            "old",
            "dead",
            clock.now(),
        )));
        let client = client_with(
            store.clone(),
            ScriptedEndpoint::replying([rejected("invalid_grant")]),
            &clock,
        );

        assert!(matches!(client.get_valid_token().await, Err(Error::SessionExpired)));
        assert_eq!(store.load().unwrap(), None);

        let status = client.get_status();
        assert!(!status.authenticated);
        assert!(!status.can_refresh);
    }

    #[tokio::test]
    async fn other_refresh_errors_keep_credentials() {
        let clock = ManualClock::new();
        let record = TokenRecord::new("old", "r", clock.now());
        let store = Arc::new(InMemoryStore::with_record(record.clone()));
        let client = client_with(
            store.clone(),
            ScriptedEndpoint::replying([rejected("invalid_client"), rejected("server_error")]),
            &clock,
        );

        assert!(matches!(client.refresh_access_token().await, Err(Error::InvalidClient(_))));
        assert!(matches!(client.refresh_access_token().await, Err(Error::RefreshFailed(_))));
        assert_eq!(store.load().unwrap(), Some(record));
    }

    #[tokio::test]
    async fn read_only_store_refuses_refresh_before_network() {
        let clock = ManualClock::new();
        let expires = (clock.now() + Duration::seconds(10)).timestamp().to_string();
        let store = Arc::new(EnvStore::with_source(move |name| match name {
            "FRESHBOOKS_ACCESS_TOKEN" => Some("a".to_string()),
            "FRESHBOOKS_REFRESH_TOKEN" => Some("r".to_string()),
            "FRESHBOOKS_TOKEN_EXPIRES_AT" => Some(expires.clone()),
            _ => None,
        }));
        let endpoint = ScriptedEndpoint::replying([Ok(tokens("new", None, 3600))]);
        let client = client_with(store, endpoint.clone(), &clock);

        assert!(matches!(
            client.get_valid_token().await,
            Err(Error::UnsupportedOperation(_))
        ));
        assert!(matches!(
            client.exchange_code("code").await,
            Err(Error::UnsupportedOperation(_))
        ));
        assert_eq!(endpoint.calls(), 0);
    }

    // =========================================================================
    // Revoke, status, account selection
    // =========================================================================

    #[tokio::test]
    async fn revoke_clears_even_when_remote_fails() {
        let clock = ManualClock::new();
        let store = Arc::new(InMemoryStore::with_record(TokenRecord::new(
            "a",
            "ref-to-revoke",
            clock.now() + Duration::hours(1),
        )));
        let endpoint = Arc::new(ScriptedEndpoint {
            fail_revoke: true,
            ..ScriptedEndpoint::default()
        });
        let client = client_with(store.clone(), endpoint.clone(), &clock);

        client.revoke_token().await.unwrap();
        assert_eq!(store.load().unwrap(), None);
        assert_eq!(endpoint.revoked.lock().as_slice(), ["ref-to-revoke".to_string()]);

        client.revoke_token().await.unwrap();
        assert_eq!(endpoint.revoked.lock().len(), 1);
    }

    #[tokio::test]
    async fn status_never_touches_network() {
        let clock = ManualClock::new();
        let store = Arc::new(InMemoryStore::with_record(TokenRecord::new(
            "a",
            "r",
            clock.now() + Duration::seconds(90),
        )));
        let endpoint = ScriptedEndpoint::replying([]);
        let client = client_with(store, endpoint.clone(), &clock);

        let status = client.get_status();
        assert!(status.authenticated);
        assert!(status.can_refresh);
        assert_eq!(status.expires_in, Some(90));
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn set_active_account_updates_identity_only() {
        let clock = ManualClock::new();
        let original = TokenRecord::new("a", "r", clock.now() + Duration::hours(1))
            .with_identity(Some("OLD".into()), Some(1));
        let store = Arc::new(InMemoryStore::with_record(original.clone()));
        let endpoint = ScriptedEndpoint::replying([]);
        let client = client_with(store.clone(), endpoint.clone(), &clock);

        client.set_active_account("NEW", None).await.unwrap();
        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.access_token, original.access_token);
        assert_eq!(stored.expires_at, original.expires_at);
        assert_eq!(stored.account_id.as_deref(), Some("NEW"));
        assert_eq!(stored.business_id, None);
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn set_active_account_requires_record() {
        let clock = ManualClock::new();
        let client = client_with(
            Arc::new(InMemoryStore::new()),
            ScriptedEndpoint::replying([]),
            &clock,
        );
        assert!(matches!(
            client.set_active_account("ACC", Some(1)).await,
            Err(Error::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn set_active_account_refreshes_stale_record_first() {
        let clock = ManualClock::new();
        let store = Arc::new(InMemoryStore::with_record(TokenRecord::new(
            "old",
            "r",
            clock.now() - Duration::minutes(1),
        )));
        let endpoint = ScriptedEndpoint::replying([Ok(tokens("fresh", Some("r2"), 3600))]);
        let client = client_with(store.clone(), endpoint.clone(), &clock);

        let record = client.set_active_account("ACC", Some(9)).await.unwrap();
        assert_eq!(record.access_token, "fresh");
        assert!(record.expires_at > clock.now());
        assert_eq!(store.load().unwrap(), Some(record));
        assert_eq!(endpoint.calls(), 1);
    }

    #[test]
    fn debug_hides_client_secret() {
        let clock = ManualClock::new();
        let client = client_with(
            Arc::new(InMemoryStore::new()),
            ScriptedEndpoint::replying([]),
            &clock,
        );
        assert!(!format!("{client:?}").contains("secret-1"));
    }
}
