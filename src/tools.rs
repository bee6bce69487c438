//! Authentication tools exposed over MCP
//!
//! Tool results never include access or refresh tokens; they report expiry,
//! identity and status only.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::identity::IdentityClient;
use crate::oauth::{OAuthClient, TokenRecord, generate_state};
use crate::protocol::{Tool, ToolAnnotations, ToolsCallResult};
use crate::{Error, ErrorKind, Result};

/// Known authentication tools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTool {
    /// `auth_status`
    Status,
    /// `auth_get_url`
    GetUrl,
    /// `auth_exchange_code`
    ExchangeCode,
    /// `auth_refresh`
    Refresh,
    /// `auth_revoke`
    Revoke,
    /// `auth_set_account`
    SetAccount,
    /// `auth_list_businesses`
    ListBusinesses,
}

impl AuthTool {
    /// All tools in listing order
    pub const ALL: [Self; 7] = [
        Self::Status,
        Self::GetUrl,
        Self::ExchangeCode,
        Self::Refresh,
        Self::Revoke,
        Self::SetAccount,
        Self::ListBusinesses,
    ];

    /// MCP tool name
    pub fn name(self) -> &'static str {
        match self {
            Self::Status => "auth_status",
            Self::GetUrl => "auth_get_url",
            Self::ExchangeCode => "auth_exchange_code",
            Self::Refresh => "auth_refresh",
            Self::Revoke => "auth_revoke",
            Self::SetAccount => "auth_set_account",
            Self::ListBusinesses => "auth_list_businesses",
        }
    }

    /// Look up a tool by MCP name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    fn definition(self) -> Tool {
        let (description, schema, annotations) = match self {
            Self::Status => (
                "Report whether FreshBooks credentials are present, when the access token \
                 expires and which account is active. Never refreshes.",
                empty_schema(),
                read_only(),
            ),
            Self::GetUrl => (
                "Build the FreshBooks authorization URL the user must open to grant access. \
                 After approving, FreshBooks redirects with a `code` for auth_exchange_code.",
                json!({
                    "type": "object",
                    "properties": {
                        "state": {"type": "string", "description": "CSRF state; generated when omitted"}
                    }
                }),
                read_only(),
            ),
            Self::ExchangeCode => (
                "Exchange the authorization code from the redirect for tokens and store them.",
                json!({
                    "type": "object",
                    "properties": {
                        "code": {"type": "string", "description": "Authorization code from the redirect URL"}
                    },
                    "required": ["code"]
                }),
                mutating(false),
            ),
            Self::Refresh => (
                "Force a refresh of the access token.",
                empty_schema(),
                mutating(false),
            ),
            Self::Revoke => (
                "Log out: delete stored credentials and revoke them at FreshBooks.",
                empty_schema(),
                mutating(true),
            ),
            Self::SetAccount => (
                "Select the FreshBooks account (and optionally business) used by later calls.",
                json!({
                    "type": "object",
                    "properties": {
                        "accountId": {"type": "string"},
                        "businessId": {"type": "integer"}
                    },
                    "required": ["accountId"]
                }),
                mutating(false),
            ),
            Self::ListBusinesses => (
                "List the businesses the authenticated user belongs to, with the accountId and \
                 businessId values accepted by auth_set_account.",
                empty_schema(),
                read_only(),
            ),
        };

        Tool {
            name: self.name().to_string(),
            title: None,
            description: Some(description.to_string()),
            input_schema: schema,
            annotations: Some(annotations),
        }
    }
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

fn read_only() -> ToolAnnotations {
    ToolAnnotations {
        read_only_hint: Some(true),
        open_world_hint: Some(true),
        ..ToolAnnotations::default()
    }
}

fn mutating(destructive: bool) -> ToolAnnotations {
    ToolAnnotations {
        read_only_hint: Some(false),
        destructive_hint: Some(destructive),
        open_world_hint: Some(true),
        ..ToolAnnotations::default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct GetUrlArgs {
    state: Option<String>,
}

#[derive(Default, Deserialize)]
struct ExchangeArgs {
    code: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetAccountArgs {
    account_id: String,
    business_id: Option<i64>,
}

/// Dispatcher for the authentication tools
#[derive(Clone)]
pub struct AuthTools {
    client: OAuthClient,
    identity: IdentityClient,
}

impl AuthTools {
    /// Create the tool set
    #[must_use]
    pub fn new(client: OAuthClient, identity: IdentityClient) -> Self {
        Self { client, identity }
    }

    /// Tool definitions for `tools/list`
    pub fn definitions(&self) -> Vec<Tool> {
        AuthTool::ALL.into_iter().map(AuthTool::definition).collect()
    }

    /// Run a tool, folding failures into an `isError` result
    pub async fn call(&self, tool: AuthTool, arguments: Value) -> ToolsCallResult {
        debug!(tool = tool.name(), "Calling auth tool");
        match self.run(tool, arguments).await {
            Ok(value) => encode_result(&value),
            Err(e) => ToolsCallResult::error(describe_error(&e)),
        }
    }

    async fn run(&self, tool: AuthTool, arguments: Value) -> Result<Value> {
        match tool {
            AuthTool::Status => self.status(),
            AuthTool::GetUrl => {
                let args: GetUrlArgs = parse_args(arguments)?;
                let state = args.state.unwrap_or_else(generate_state);
                let url = self.client.generate_authorization_url(Some(&state));
                Ok(json!({"authorizationUrl": url.as_str(), "state": state}))
            }
            AuthTool::ExchangeCode => {
                let args: ExchangeArgs = parse_args(arguments)?;
                let record = self.client.exchange_code(&args.code).await?;
                Ok(record_summary(&record))
            }
            AuthTool::Refresh => {
                let record = self.client.refresh_access_token().await?;
                Ok(record_summary(&record))
            }
            AuthTool::Revoke => {
                self.client.revoke_token().await?;
                Ok(json!({"revoked": true}))
            }
            AuthTool::SetAccount => {
                let args: SetAccountArgs = parse_args(arguments)?;
                let record = self
                    .client
                    .set_active_account(&args.account_id, args.business_id)
                    .await?;
                Ok(record_summary(&record))
            }
            AuthTool::ListBusinesses => {
                let identity = self.identity.current_user().await?;
                Ok(serde_json::to_value(identity)?)
            }
        }
    }

    fn status(&self) -> Result<Value> {
        let mut status = serde_json::to_value(self.client.get_status())?;
        if let Some(object) = status.as_object_mut() {
            object.insert("store".to_string(), json!(self.client.store_backend()));
        }
        Ok(status)
    }
}

fn parse_args<T: DeserializeOwned + Default>(arguments: Value) -> Result<T> {
    if arguments.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(arguments).map_err(|e| Error::Protocol(format!("Invalid arguments: {e}")))
}

fn encode_result<T: Serialize>(value: &T) -> ToolsCallResult {
    match serde_json::to_string_pretty(value) {
        Ok(text) => ToolsCallResult::text(text),
        Err(e) => ToolsCallResult::error(format!(
            "{}: Failed to encode tool result: {e}",
            ErrorKind::Internal
        )),
    }
}

fn record_summary(record: &TokenRecord) -> Value {
    json!({
        "authenticated": true,
        "expiresAt": record.expires_at.to_rfc3339(),
        "accountId": record.account_id,
        "businessId": record.business_id,
    })
}

/// Error text for tool results: kind, message and a hint when a new login is needed
pub fn describe_error(err: &Error) -> String {
    if err.requires_reauthentication() {
        format!(
            "{}: {err}. Call auth_get_url to start a new authorization.",
            err.kind()
        )
    } else {
        format!("{}: {err}", err.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProviderError;

    #[test]
    fn names_round_trip() {
        for tool in AuthTool::ALL {
            assert_eq!(AuthTool::from_name(tool.name()), Some(tool));
        }
        assert_eq!(AuthTool::from_name("invoices_list"), None);
    }

    #[test]
    fn definitions_have_object_schemas() {
        for tool in AuthTool::ALL {
            let def = tool.definition();
            assert_eq!(def.input_schema["type"], "object", "{}", def.name);
            assert!(def.description.is_some());
        }
        assert_eq!(
            AuthTool::ExchangeCode.definition().input_schema["required"],
            json!(["code"])
        );
    }

    #[test]
    fn reauthentication_errors_carry_hint() {
        let text = describe_error(&Error::SessionExpired);
        assert!(text.starts_with("session_expired:"));
        assert!(text.contains("auth_get_url"));

        let text = describe_error(&Error::RefreshFailed(ProviderError::new("server_error")));
        assert!(text.starts_with("refresh_failed:"));
        assert!(!text.contains("auth_get_url"));
    }

    #[test]
    fn null_arguments_use_defaults() {
        let args: GetUrlArgs = parse_args(Value::Null).unwrap();
        assert!(args.state.is_none());
    }

    #[test]
    fn unencodable_result_is_an_error() {
        // JSON object keys must be strings
        let value = std::collections::HashMap::from([(vec![1u8], 1)]);
        let result = encode_result(&value);
        assert!(result.is_error);

        let result = encode_result(&json!({"revoked": true}));
        assert!(!result.is_error);
    }

    #[test]
    fn bad_arguments_are_protocol_errors() {
        let err = parse_args::<GetUrlArgs>(json!({"state": 5})).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
