//! cross-connect - Connect, list, and disconnect social platform accounts

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use libcrosscast::error::CredentialError;
use libcrosscast::logging::{LogFormat, LoggingConfig};
use libcrosscast::oauth::{generate_state, Pkce};
use libcrosscast::platforms::discord::WEBHOOK_PREFIX;
use libcrosscast::types::Credential;
use libcrosscast::{
    Config, CrosscastError, Database, HttpTokenEndpoint, Platform, Result, TokenCipher,
    TokenRefreshManager, TokenStore,
};

#[derive(Parser, Debug)]
#[command(name = "cross-connect")]
#[command(version)]
#[command(about = "Connect, list, and disconnect social platform accounts", long_about = "\
cross-connect - Connect, list, and disconnect social platform accounts

OAuth platforms (linkedin, instagram, twitter) go through the browser
authorization flow: this tool prints the authorization URL, then reads
the redirect code from stdin and exchanges it for tokens. Discord uses
a webhook URL instead of OAuth.

Tokens are encrypted at rest with the CROSSCAST_MASTER_KEY environment
variable; the same key must be set when posting.
")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// User the connection belongs to
    #[arg(short, long, default_value = "default", global = true)]
    user: String,

    /// Path to config file (defaults to XDG location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect a platform account
    Link {
        /// Platform to connect (linkedin, instagram, twitter, discord)
        platform: String,

        /// Discord webhook URL (Discord only, replaces the OAuth flow)
        #[arg(long)]
        webhook_url: Option<String>,

        /// Platform-side account ID (LinkedIn member ID or Instagram user ID)
        #[arg(long)]
        account_id: Option<String>,
    },

    /// List connected platforms
    List,

    /// Disconnect a platform account
    Unlink {
        /// Platform to disconnect
        platform: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    LoggingConfig::new(LogFormat::Text, "warn".to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let db = Database::new(&config.database.path).await?;
    let cipher = TokenCipher::from_env()?;
    let store = TokenStore::new(db, cipher);

    match cli.command {
        Command::Link {
            platform,
            webhook_url,
            account_id,
        } => {
            let platform = parse_platform(&platform)?;
            match platform {
                Platform::Discord => link_discord(&store, &cli.user, webhook_url).await,
                _ => link_oauth(&store, &config, &cli.user, platform, account_id).await,
            }
        }
        Command::List => {
            let connected = store.connected_platforms(&cli.user).await?;
            if connected.is_empty() {
                println!("No platforms connected for user '{}'", cli.user);
            }
            for platform in connected {
                println!("{}", platform);
            }
            Ok(())
        }
        Command::Unlink { platform } => {
            let platform = parse_platform(&platform)?;
            if store.delete(&cli.user, platform).await? {
                println!("Disconnected {}", platform);
                Ok(())
            } else {
                Err(CrosscastError::InvalidInput(format!(
                    "{} is not connected for user '{}'",
                    platform, cli.user
                )))
            }
        }
    }
}

async fn link_discord(
    store: &TokenStore,
    user: &str,
    webhook_url: Option<String>,
) -> Result<()> {
    let webhook_url = webhook_url.ok_or_else(|| {
        CrosscastError::InvalidInput(
            "Discord uses webhooks: pass --webhook-url <URL>".to_string(),
        )
    })?;
    if !webhook_url.starts_with(WEBHOOK_PREFIX) {
        return Err(CrosscastError::InvalidInput(format!(
            "webhook URL must start with {}",
            WEBHOOK_PREFIX
        )));
    }

    // Webhook URLs never expire and cannot be refreshed.
    let credential = Credential {
        access_token: webhook_url,
        refresh_token: None,
        expires_at: None,
        provider_user_id: None,
    };
    store.store(user, Platform::Discord, &credential).await?;
    println!("Connected discord");
    Ok(())
}

async fn link_oauth(
    store: &TokenStore,
    config: &Config,
    user: &str,
    platform: Platform,
    account_id: Option<String>,
) -> Result<()> {
    let http = libcrosscast::http_client(config.publish.http_timeout_secs)
        .map_err(|e| CredentialError::Network(format!("failed to build HTTP client: {}", e)))?;
    let endpoint = HttpTokenEndpoint::new(http, config.oauth.clone());

    let state = generate_state();
    let pkce = if platform == Platform::Twitter {
        Some(Pkce::generate())
    } else {
        None
    };

    let url = endpoint.authorize_url(platform, &state, pkce.as_ref())?;
    println!("Open this URL in your browser and authorize {}:", platform);
    println!();
    println!("{}", url);
    println!();
    let code = prompt("Paste the 'code' parameter from the redirect URL: ")?;

    let manager = TokenRefreshManager::new(
        store.clone(),
        endpoint,
        config.publish.refresh_buffer_secs,
    );
    manager
        .complete_authorization(
            user,
            platform,
            code.trim(),
            pkce.as_ref().map(|p| p.verifier.as_str()),
            account_id,
        )
        .await?;

    println!("Connected {}", platform);
    Ok(())
}

fn parse_platform(raw: &str) -> Result<Platform> {
    raw.parse::<Platform>().map_err(CrosscastError::InvalidInput)
}

fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    std::io::stdout()
        .flush()
        .map_err(|e| CrosscastError::InvalidInput(format!("stdout error: {}", e)))?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| CrosscastError::InvalidInput(format!("failed to read stdin: {}", e)))?;
    if line.trim().is_empty() {
        return Err(CrosscastError::InvalidInput(
            "no authorization code entered".to_string(),
        ));
    }
    Ok(line)
}
