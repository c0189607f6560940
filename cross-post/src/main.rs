//! cross-post - Publish a post to connected social platforms

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use libcrosscast::error::CredentialError;
use libcrosscast::logging::{LogFormat, LoggingConfig};
use libcrosscast::platforms::PublisherSet;
use libcrosscast::types::PostStatus;
use libcrosscast::{
    Config, CrosscastError, Database, HttpTokenEndpoint, Orchestrator, Platform, Post,
    PublishService, Result, TokenCipher, TokenRefreshManager, TokenStore,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cross-post")]
#[command(version)]
#[command(about = "Publish a post to connected social platforms", long_about = "\
cross-post - Publish a post to connected social platforms

Reads content from the argument or stdin and fans it out to the selected
platforms concurrently. Platforms fail independently: the exit status is
nonzero if any platform failed, and cross-retry can re-attempt the failed
subset.

The token store is unlocked with the CROSSCAST_MASTER_KEY environment
variable.

EXIT CODES:
    0 - Published everywhere
    1 - At least one platform failed, or a runtime error
    2 - Credential problem (reauthorization required)
    3 - Invalid input
")]
struct Cli {
    /// Content to post (reads from stdin if not provided)
    content: Option<String>,

    /// Target platform(s), comma-separated (linkedin, instagram, twitter, discord)
    #[arg(short, long)]
    platforms: String,

    /// User the post belongs to
    #[arg(short, long, default_value = "default")]
    user: String,

    /// Image URL to attach (repeatable)
    #[arg(short, long = "image")]
    images: Vec<String>,

    /// Save as draft without publishing
    #[arg(long)]
    draft: bool,

    /// Retry budget for cross-retry (defaults to the configured value)
    #[arg(long)]
    max_retries: Option<u32>,

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
    let platforms = parse_platforms(&cli.platforms)?;
    let content = read_content(cli.content.clone())?;

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let db = Database::new(&config.database.path).await?;
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
    let service = PublishService::new(db, orchestrator);

    let content_map: BTreeMap<Platform, String> = platforms
        .iter()
        .map(|&p| (p, content.clone()))
        .collect();
    let max_retries = cli.max_retries.unwrap_or(config.publish.max_retries);

    let post = service
        .create_post(&cli.user, content_map, cli.images.clone(), platforms, max_retries)
        .await?;

    if cli.draft {
        info!(post_id = %post.id, "saved draft");
        println!("{}", post.id);
        return Ok(0);
    }

    let post = service.publish(&post.id).await?;
    print_outcome(&post, &cli.format)?;

    Ok(if post.status == PostStatus::Published {
        0
    } else {
        1
    })
}

fn parse_platforms(raw: &str) -> Result<Vec<Platform>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Platform>().map_err(CrosscastError::InvalidInput))
        .collect()
}

fn read_content(arg: Option<String>) -> Result<String> {
    let content = match arg {
        Some(content) => content,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| CrosscastError::InvalidInput(format!("failed to read stdin: {}", e)))?;
            buffer.trim_end().to_string()
        }
    };
    Ok(content)
}

fn print_outcome(post: &Post, format: &str) -> Result<()> {
    match format {
        "json" => {
            let rendered = serde_json::to_string_pretty(post)
                .map_err(|e| CrosscastError::InvalidInput(format!("JSON encode failed: {}", e)))?;
            println!("{}", rendered);
        }
        "text" => {
            println!("Post {} is {}", post.id, post.status);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_platforms() {
        let platforms = parse_platforms("twitter, discord").unwrap();
        assert_eq!(platforms, vec![Platform::Twitter, Platform::Discord]);
    }

    #[test]
    fn test_parse_platforms_rejects_unknown() {
        let result = parse_platforms("twitter,friendster");
        assert!(matches!(result, Err(CrosscastError::InvalidInput(_))));
    }

    #[test]
    fn test_read_content_from_arg() {
        assert_eq!(read_content(Some("hi".to_string())).unwrap(), "hi");
    }
}
