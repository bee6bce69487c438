//! FreshBooks MCP - OAuth2 credential lifecycle for FreshBooks tools
//!
//! Serves the `auth_*` MCP tools over stdio, or manages credentials directly
//! from the command line.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use freshbooks_mcp::{
    Error, Result,
    cli::{AuthCommand, Cli, Command, StoreArg},
    config::{Config, StorageBackend},
    identity::IdentityClient,
    oauth::{
        EncryptedFileStore, OAuthClient, TokenRecord, generate_state,
        crypto::{MachineIdentity, TokenCipher},
        storage,
    },
    server::McpServer,
    setup_tracing,
    tools::{AuthTools, describe_error},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let app = match App::new(&config) {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Handle subcommands
    let outcome = match cli.command {
        Some(Command::Auth(cmd)) => run_auth_command(&app, &config, cmd).await,
        Some(Command::Serve) | None => run_server(app).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {}", describe_error(&e));
            ExitCode::FAILURE
        }
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(ref client_id) = cli.client_id {
        config.oauth.client_id = Some(client_id.clone());
    }
    if let Some(ref client_secret) = cli.client_secret {
        config.oauth.client_secret = Some(client_secret.clone());
    }
    if let Some(ref redirect_uri) = cli.redirect_uri {
        config.oauth.redirect_uri = Some(redirect_uri.clone());
    }
    if let Some(store) = cli.store {
        config.storage.backend = match store {
            StoreArg::Memory => StorageBackend::Memory,
            StoreArg::Env => StorageBackend::Env,
            StoreArg::File => StorageBackend::File,
        };
    }

    Ok(config)
}

/// Wired-up clients shared by every command
struct App {
    client: OAuthClient,
    identity: IdentityClient,
}

impl App {
    fn new(config: &Config) -> Result<Self> {
        let store = storage::from_settings(&config.storage)?;
        let client = OAuthClient::builder(config.oauth_config()?, store)
            .refresh_margin(config.oauth.refresh_margin)
            .request_timeout(config.oauth.request_timeout)
            .build()?;
        let identity = IdentityClient::new(
            &config.api.base_url,
            config.api.timeout,
            Arc::new(client.clone()),
        )?;
        Ok(Self { client, identity })
    }
}

/// Serve MCP over stdio
async fn run_server(app: App) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        store = app.client.store_backend(),
        "Starting FreshBooks MCP server"
    );

    let server = McpServer::new(AuthTools::new(app.client, app.identity));
    server.serve_stdio().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Run credential management commands
async fn run_auth_command(app: &App, config: &Config, cmd: AuthCommand) -> Result<()> {
    let client = &app.client;
    match cmd {
        AuthCommand::Url { state } => {
            let state = state.unwrap_or_else(generate_state);
            let url = client.generate_authorization_url(Some(&state));
            println!("Open this URL in a browser and approve access:\n");
            println!("  {url}\n");
            println!("State: {state}");
            println!("Then run: freshbooks-mcp auth exchange <code>");
        }

        AuthCommand::Exchange { code } => {
            let record = client.exchange_code(&code).await?;
            println!("✅ Authenticated");
            print_record(&record);
        }

        AuthCommand::Status { format } => {
            let status = client.get_status();
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&status)?);
                return Ok(());
            }

            println!("Store: {}", client.store_backend());
            if status.authenticated {
                println!("✅ Authenticated");
                if let Some(secs) = status.expires_in {
                    println!("   Access token expires in {secs}s");
                }
                if let Some(ref account) = status.account_id {
                    println!("   Account: {account}");
                }
                if let Some(business) = status.business_id {
                    println!("   Business: {business}");
                }
                if status.can_refresh {
                    println!("   Token is due for refresh");
                }
            } else {
                println!(
                    "❌ Not authenticated: {}",
                    status.reason.as_deref().unwrap_or("unknown")
                );
                if let Some(detail) = file_store_diagnosis(config) {
                    println!("   {detail}");
                }
            }
        }

        AuthCommand::Refresh => {
            let record = client.refresh_access_token().await?;
            println!("✅ Refreshed");
            print_record(&record);
        }

        AuthCommand::Revoke => {
            client.revoke_token().await?;
            println!("✅ Credentials removed");
        }

        AuthCommand::SetAccount {
            account_id,
            business_id,
        } => {
            let record = client.set_active_account(&account_id, business_id).await?;
            println!("✅ Active account updated");
            print_record(&record);
        }

        AuthCommand::Businesses => {
            let identity = app.identity.current_user().await?;
            if identity.businesses.is_empty() {
                println!("No businesses found for {}", identity.name);
            } else {
                println!("Businesses for {}:\n", identity.name);
                for business in &identity.businesses {
                    println!(
                        "  {} - business {} account {} ({})",
                        business.name,
                        business.business_id,
                        business.account_id.as_deref().unwrap_or("-"),
                        business.role.as_deref().unwrap_or("member"),
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_record(record: &TokenRecord) {
    println!("   Expires at: {}", record.expires_at.to_rfc3339());
    if let Some(ref account) = record.account_id {
        println!("   Account: {account}");
    }
    if let Some(business) = record.business_id {
        println!("   Business: {business}");
    }
}

/// Why the encrypted file store came up empty, if it is the active backend
fn file_store_diagnosis(config: &Config) -> Option<String> {
    if config.storage.backend != StorageBackend::File {
        return None;
    }
    let path = config.storage.token_path().ok()?;
    let identity = MachineIdentity::current(&config.storage.passphrase_env);
    let cipher = TokenCipher::derive(&identity).ok()?;
    match EncryptedFileStore::new(path, cipher).load_checked() {
        Ok(_) => None,
        Err(Error::NotFound(path)) => Some(format!("No token file at {}", path.display())),
        Err(e) => Some(format!("Token file unreadable ({}): {e}", e.kind())),
    }
}
