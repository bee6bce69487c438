//! FreshBooks identity lookup
//!
//! Lists the businesses the authenticated user belongs to so one can be
//! selected with `set_active_account`. This is the first consumer of
//! [`BearerTokenProvider`] and shows how resource calls obtain a token.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::oauth::BearerTokenProvider;
use crate::{Error, Result};

/// Authenticated FreshBooks user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// FreshBooks identity id
    pub identity_id: Option<i64>,
    /// Login email
    pub email: Option<String>,
    /// Display name
    pub name: String,
    /// Businesses the user can act on
    pub businesses: Vec<BusinessMembership>,
}

/// One business the user is a member of
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessMembership {
    /// Business id (for `business_id`)
    pub business_id: i64,
    /// Accounting account id (for `account_id`)
    pub account_id: Option<String>,
    /// Business name
    pub name: String,
    /// Role of the user in this business
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeEnvelope {
    response: MeResponse,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    id: Option<i64>,
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    business_memberships: Vec<MembershipResponse>,
}

#[derive(Debug, Deserialize)]
struct MembershipResponse {
    role: Option<String>,
    business: BusinessResponse,
}

#[derive(Debug, Deserialize)]
struct BusinessResponse {
    id: i64,
    #[serde(default)]
    name: String,
    account_id: Option<String>,
}

impl From<MeResponse> for Identity {
    fn from(me: MeResponse) -> Self {
        let name = [me.first_name, me.last_name]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            identity_id: me.id,
            email: me.email,
            name,
            businesses: me
                .business_memberships
                .into_iter()
                .map(|m| BusinessMembership {
                    business_id: m.business.id,
                    account_id: m.business.account_id,
                    name: m.business.name,
                    role: m.role,
                })
                .collect(),
        }
    }
}

/// Client for `GET /auth/api/v1/users/me`
#[derive(Clone)]
pub struct IdentityClient {
    http_client: Client,
    base_url: Url,
    tokens: Arc<dyn BearerTokenProvider>,
}

impl IdentityClient {
    /// Create a client against `base_url` authenticating through `tokens`
    pub fn new(base_url: &str, timeout: Duration, tokens: Arc<dyn BearerTokenProvider>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid API base URL '{base_url}': {e}")))?;
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("freshbooks-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http_client,
            base_url,
            tokens,
        })
    }

    /// Fetch the current user and their business memberships
    pub async fn current_user(&self) -> Result<Identity> {
        let url = self
            .base_url
            .join("/auth/api/v1/users/me")
            .map_err(|e| Error::Config(format!("Invalid identity URL: {e}")))?;
        let token = self.tokens.bearer_token().await?;

        let response = self
            .http_client
            .get(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED => return Err(Error::NotAuthenticated),
            status => {
                return Err(Error::Protocol(format!(
                    "FreshBooks identity lookup failed: HTTP {status}"
                )));
            }
        }

        let envelope: MeEnvelope = serde_json::from_slice(&response.bytes().await?)?;
        let identity = Identity::from(envelope.response);
        debug!(businesses = identity.businesses.len(), "Fetched FreshBooks identity");
        Ok(identity)
    }
}
