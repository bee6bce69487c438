//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// FreshBooks MCP server - OAuth2 credential lifecycle for FreshBooks tools
#[derive(Parser, Debug)]
#[command(name = "freshbooks-mcp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "FRESHBOOKS_MCP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "FRESHBOOKS_MCP_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "FRESHBOOKS_MCP_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// OAuth client id
    #[arg(long, env = "FRESHBOOKS_CLIENT_ID", global = true)]
    pub client_id: Option<String>,

    /// OAuth client secret (prefer the environment variable over the flag)
    #[arg(long, env = "FRESHBOOKS_CLIENT_SECRET", hide_env_values = true, global = true)]
    pub client_secret: Option<String>,

    /// OAuth redirect URI registered with FreshBooks
    #[arg(long, env = "FRESHBOOKS_REDIRECT_URI", global = true)]
    pub redirect_uri: Option<String>,

    /// Token store backend (overrides config)
    #[arg(long, value_enum, global = true)]
    pub store: Option<StoreArg>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Token store backends selectable from the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreArg {
    /// Process memory; lost on exit
    Memory,
    /// Read-only `FRESHBOOKS_*` variables
    Env,
    /// Encrypted file in the home directory
    File,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve MCP over stdio (default)
    Serve,

    /// Credential management commands
    #[command(subcommand)]
    Auth(AuthCommand),
}

/// Credential subcommands
#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Print the authorization URL to open in a browser
    Url {
        /// CSRF state; generated when omitted
        #[arg(long)]
        state: Option<String>,
    },

    /// Exchange an authorization code for tokens
    Exchange {
        /// Code from the redirect URL
        #[arg(required = true)]
        code: String,
    },

    /// Show credential status (never refreshes)
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Force a token refresh
    Refresh,

    /// Delete stored credentials and revoke them remotely
    Revoke,

    /// Select the active account
    SetAccount {
        /// Accounting account id
        #[arg(required = true)]
        account_id: String,

        /// Business id
        #[arg(long)]
        business_id: Option<i64>,
    },

    /// List businesses available to the authenticated user
    Businesses,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["freshbooks-mcp"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn set_account_parses_business_id() {
        let cli = Cli::try_parse_from([
            "freshbooks-mcp",
            "--store",
            "memory",
            "auth",
            "set-account",
            "xZ9",
            "--business-id",
            "77",
        ])
        .unwrap();
        assert_eq!(cli.store, Some(StoreArg::Memory));
        match cli.command {
            Some(Command::Auth(AuthCommand::SetAccount {
                account_id,
                business_id,
            })) => {
                assert_eq!(account_id, "xZ9");
                assert_eq!(business_id, Some(77));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn exchange_requires_code() {
        assert!(Cli::try_parse_from(["freshbooks-mcp", "auth", "exchange"]).is_err());
    }
}
