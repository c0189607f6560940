//! cross-retry - Re-attempt the failed platforms of a partially published post

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use libcrosscast::error::CredentialError;
use libcrosscast::logging::{LogFormat, LoggingConfig};
use libcrosscast::platforms::PublisherSet;
use libcrosscast::types::PostStatus;
use libcrosscast::{
    Config, CrosscastError, Database, HttpTokenEndpoint, Orchestrator, Post, Result,
    RetryController, TokenCipher, TokenRefreshManager, TokenStore,
};

#[derive(Parser, Debug)]
#[command(name = "cross-retry")]
#[command(version)]
#[command(about = "Re-attempt the failed platforms of a partially published post", long_about = "\
cross-retry - Re-attempt the failed platforms of a partially published post

Only the platforms that failed are re-attempted; platforms that already
succeeded are left untouched. Each post carries a bounded retry budget
set at creation time, and a post whose budget is spent is refused.

EXIT CODES:
    0 - Retry succeeded everywhere
    1 - Retry refused, or at least one platform failed again
    2 - Credential problem (reauthorization required)
    3 - Invalid input
")]
struct Cli {
    /// ID of the failed post to retry
    post_id: Option<String>,

    /// List failed posts instead of retrying
    #[arg(short, long)]
    list: bool,

    /// User whose posts to list
    #[arg(short, long, default_value = "default")]
    user: String,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Path to config file (defaults to XDG location)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    LoggingConfig::new(LogFormat::Text, "warn".to_string(), cli.verbose).init();

    match run(cli).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let db = Database::new(&config.database.path).await?;

    if cli.list {
        return list_failed(&db, &cli.user, &cli.format).await;
    }

    let post_id = cli.post_id.as_deref().ok_or_else(|| {
        CrosscastError::InvalidInput("a post ID is required unless --list is given".to_string())
    })?;

    let cipher = TokenCipher::from_env()?;
    let http = libcrosscast::http_client(config.publish.http_timeout_secs)
        .map_err(|e| CredentialError::Network(format!("failed to build HTTP client: {}", e)))?;

    let store = TokenStore::new(db.clone(), cipher);
    let endpoint = HttpTokenEndpoint::new(http.clone(), config.oauth.clone());
    let manager = Arc::new(TokenRefreshManager::new(
        store,
        endpoint,
        config.publish.refresh_buffer_secs,
    ));
    let orchestrator = Orchestrator::new(
        PublisherSet::new(http),
        manager,
        Duration::from_secs(config.publish.platform_timeout_secs),
    );
    let controller = RetryController::new(db, orchestrator);

    let post = controller.retry(post_id).await?;
    print_outcome(&post, &cli.format)?;

    Ok(if post.status == PostStatus::Published {
        0
    } else {
        1
    })
}

async fn list_failed(db: &Database, user: &str, format: &str) -> Result<i32> {
    let posts = db.list_posts(user, Some(PostStatus::Failed), 50).await?;

    match format {
        "json" => {
            let rendered = serde_json::to_string_pretty(&posts)
                .map_err(|e| CrosscastError::InvalidInput(format!("JSON encode failed: {}", e)))?;
            println!("{}", rendered);
        }
        "text" => {
            if posts.is_empty() {
                println!("No failed posts for user '{}'", user);
            }
            for post in &posts {
                let failed: Vec<&str> = post
                    .failed_platforms()
                    .iter()
                    .map(|p| p.as_str())
                    .collect();
                println!(
                    "{}  retries {}/{}  failed: {}",
                    post.id,
                    post.retry_count,
                    post.max_retries,
                    failed.join(", ")
                );
                if let Some(error) = &post.last_error {
                    println!("    {}", error);
                }
            }
        }
        other => {
            return Err(CrosscastError::InvalidInput(format!(
                "Invalid output format: '{}'. Valid options: text, json",
                other
            )));
        }
    }
    Ok(0)
}

fn print_outcome(post: &Post, format: &str) -> Result<()> {
    match format {
        "json" => {
            let rendered = serde_json::to_string_pretty(post)
                .map_err(|e| CrosscastError::InvalidInput(format!("JSON encode failed: {}", e)))?;
            println!("{}", rendered);
        }
        "text" => {
            println!(
                "Post {} is {} after retry {}/{}",
                post.id, post.status, post.retry_count, post.max_retries
            );
            for (platform, result) in &post.results {
                if result.success {
                    match &result.post_url {
                        Some(url) => println!("  ok     {}: {}", platform, url),
                        None => println!(
                            "  ok     {}: {}",
                            platform,
                            result.post_id.as_deref().unwrap_or("published")
                        ),
                    }
                } else {
                    println!(
                        "  failed {}: {}",
                        platform,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
        other => {
            return Err(CrosscastError::InvalidInput(format!(
                "Invalid output format: '{}'. Valid options: text, json",
                other
            )));
        }
    }
    Ok(())
}
