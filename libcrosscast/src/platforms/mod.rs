//! Platform publisher abstraction and implementations
//!
//! Each publisher turns (credential, text, image URLs) into a live post via
//! one vendor API. Publishers are stateless: credentials arrive per call,
//! already refreshed by the caller, and every failure is classified into a
//! [`PublishErrorKind`] so the orchestrator can record it uniformly.

use async_trait::async_trait;
use std::sync::Arc;

use crate::types::{Credential, Platform, PublishError, PublishErrorKind, RemotePost};

pub mod discord;
pub mod instagram;
pub mod linkedin;
pub mod twitter;

// Mock publisher is available for all builds (not just tests) to support
// integration tests
pub mod mock;

/// A platform-specific publisher.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Which platform this publisher targets.
    fn platform(&self) -> Platform;

    /// Validate content before any network I/O.
    ///
    /// The default checks the platform's character limit and image rules;
    /// publishers with extra constraints override and call through.
    fn validate(&self, content: &str, images: &[String]) -> Result<(), PublishError> {
        let platform = self.platform();
        let limit = platform.character_limit();
        let length = content.chars().count();
        if length > limit {
            return Err(PublishError::new(
                PublishErrorKind::ContentTooLong,
                format!(
                    "{} allows {} characters, got {}",
                    platform, limit, length
                ),
            ));
        }
        if platform.requires_image() && images.is_empty() {
            return Err(PublishError::new(
                PublishErrorKind::InvalidMedia,
                format!("{} requires at least one image", platform),
            ));
        }
        if content.is_empty() && !platform.allows_image_only() {
            return Err(PublishError::new(
                PublishErrorKind::UnknownError,
                format!("{} does not allow empty post bodies", platform),
            ));
        }
        Ok(())
    }

    /// Publish one post. `content` has already passed [`validate`](Self::validate).
    async fn publish(
        &self,
        credential: &Credential,
        content: &str,
        images: &[String],
    ) -> Result<RemotePost, PublishError>;
}

/// The full set of publishers, one per platform.
///
/// Dispatch is an exhaustive match, so a new [`Platform`] variant fails to
/// compile until a publisher is wired in here.
#[derive(Clone)]
pub struct PublisherSet {
    pub linkedin: Arc<dyn Publisher>,
    pub instagram: Arc<dyn Publisher>,
    pub twitter: Arc<dyn Publisher>,
    pub discord: Arc<dyn Publisher>,
}

impl PublisherSet {
    /// Build the production set on a shared HTTP client.
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            linkedin: Arc::new(linkedin::LinkedInPublisher::new(http.clone())),
            instagram: Arc::new(instagram::InstagramPublisher::new(http.clone())),
            twitter: Arc::new(twitter::TwitterPublisher::new(http.clone())),
            discord: Arc::new(discord::DiscordPublisher::new(http)),
        }
    }

    pub fn get(&self, platform: Platform) -> &Arc<dyn Publisher> {
        match platform {
            Platform::LinkedIn => &self.linkedin,
            Platform::Instagram => &self.instagram,
            Platform::Twitter => &self.twitter,
            Platform::Discord => &self.discord,
        }
    }
}

/// Map an HTTP transport failure to a publish error.
pub(crate) fn transport_error(platform: Platform, e: reqwest::Error) -> PublishError {
    PublishError::new(
        PublishErrorKind::NetworkError,
        format!("{} request failed: {}", platform, e),
    )
}

/// Classify a non-success HTTP status from a vendor API.
pub(crate) fn status_error(platform: Platform, status: u16, body: &str) -> PublishError {
    let kind = match status {
        401 | 403 => PublishErrorKind::AuthError,
        429 => PublishErrorKind::RateLimitExceeded,
        // Server-side failures are transient, so they stay retryable.
        500..=599 => PublishErrorKind::NetworkError,
        _ => PublishErrorKind::UnknownError,
    };
    PublishError::new(
        kind,
        format!("{} returned {}: {}", platform, status, truncate(body, 300)),
    )
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Fetch image bytes from a URL for re-upload to a vendor media endpoint.
pub(crate) async fn fetch_image(
    http: &reqwest::Client,
    platform: Platform,
    url: &str,
) -> Result<Vec<u8>, PublishError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| transport_error(platform, e))?;

    if !response.status().is_success() {
        return Err(PublishError::new(
            PublishErrorKind::InvalidMedia,
            format!("image fetch from {} returned {}", url, response.status()),
        ));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| transport_error(platform, e))?;
    Ok(bytes.to_vec())
}
