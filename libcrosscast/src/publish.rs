//! Multi-platform publish orchestration
//!
//! A logical post fans out to every targeted platform concurrently. Platforms
//! are independent: one platform's failure is recorded in its own result
//! entry and never blocks or rolls back a sibling's successful publish. The
//! orchestrator itself performs no network retries; bounded re-attempts of
//! the failed subset belong to the retry controller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{CrosscastError, Result};
use crate::oauth::{TokenEndpoint, TokenRefreshManager};
use crate::platforms::PublisherSet;
use crate::types::{
    Credential, Platform, Post, PostStatus, PublishError, PublishErrorKind, PublishResult,
};

pub const DEFAULT_PLATFORM_TIMEOUT: Duration = Duration::from_secs(60);

/// Produces ready-to-use credentials for a (user, platform) pair.
///
/// The production implementation is the token refresh manager; tests swap in
/// a map. Any failure here becomes an `AUTH_ERROR` result for that platform
/// only.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, user_id: &str, platform: Platform) -> Result<Option<Credential>>;
}

#[async_trait]
impl<E: TokenEndpoint> CredentialResolver for TokenRefreshManager<E> {
    async fn resolve(&self, user_id: &str, platform: Platform) -> Result<Option<Credential>> {
        self.get_valid(user_id, platform).await
    }
}

/// Fans one post out to its target platforms and collects per-platform
/// results.
#[derive(Clone)]
pub struct Orchestrator {
    publishers: PublisherSet,
    resolver: Arc<dyn CredentialResolver>,
    platform_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        publishers: PublisherSet,
        resolver: Arc<dyn CredentialResolver>,
        platform_timeout: Duration,
    ) -> Self {
        Self {
            publishers,
            resolver,
            platform_timeout,
        }
    }

    /// Publish `post` to `targets` concurrently.
    ///
    /// Always returns one result per target; errors are captured in the
    /// result entries and never escape. Per platform, the sequence is
    /// validate (no I/O), resolve credentials, publish under a deadline.
    pub async fn fan_out(
        &self,
        post: &Post,
        targets: &[Platform],
    ) -> BTreeMap<Platform, PublishResult> {
        let attempts = targets
            .iter()
            .map(|&platform| self.publish_one(post, platform));
        let results = join_all(attempts).await;

        targets.iter().copied().zip(results).collect()
    }

    async fn publish_one(&self, post: &Post, platform: Platform) -> PublishResult {
        let publisher = self.publishers.get(platform);
        let content = post
            .content
            .get(&platform)
            .map(String::as_str)
            .unwrap_or("");

        if let Err(e) = publisher.validate(content, &post.images) {
            warn!(post_id = %post.id, platform = %platform, error = %e, "validation failed");
            return PublishResult::err(platform, e);
        }

        let credential = match self.resolver.resolve(&post.user_id, platform).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                return PublishResult::err(
                    platform,
                    PublishError::new(
                        PublishErrorKind::AuthError,
                        format!("no {} account connected", platform),
                    ),
                );
            }
            Err(e) => {
                warn!(post_id = %post.id, platform = %platform, error = %e, "credential resolution failed");
                return PublishResult::err(
                    platform,
                    PublishError::new(PublishErrorKind::AuthError, e.to_string()),
                );
            }
        };

        let attempt = publisher.publish(&credential, content, &post.images);
        match tokio::time::timeout(self.platform_timeout, attempt).await {
            Ok(Ok(remote)) => {
                info!(post_id = %post.id, platform = %platform, remote_id = %remote.id, "published");
                PublishResult::ok(platform, remote)
            }
            Ok(Err(e)) => {
                warn!(post_id = %post.id, platform = %platform, error = %e, "publish failed");
                PublishResult::err(platform, e)
            }
            Err(_) => PublishResult::err(
                platform,
                PublishError::new(
                    PublishErrorKind::NetworkError,
                    format!(
                        "{} publish timed out after {}s",
                        platform,
                        self.platform_timeout.as_secs()
                    ),
                ),
            ),
        }
    }
}

/// Front door for the publish flow: owns persistence around the fan-out.
pub struct PublishService {
    db: Database,
    orchestrator: Orchestrator,
}

impl PublishService {
    pub fn new(db: Database, orchestrator: Orchestrator) -> Self {
        Self { db, orchestrator }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Create a draft post after shape validation. No network I/O.
    pub async fn create_post(
        &self,
        user_id: &str,
        content: BTreeMap<Platform, String>,
        images: Vec<String>,
        platforms: Vec<Platform>,
        max_retries: u32,
    ) -> Result<Post> {
        let platforms = validate_targets(platforms)?;
        validate_content(&platforms, &content, &images)?;

        let mut post = Post::new(user_id.to_string(), content, images, platforms);
        post.max_retries = max_retries;
        self.db.create_post(&post).await?;
        Ok(post)
    }

    /// Publish a stored post to all its target platforms.
    ///
    /// The post moves to `publishing` before the fan-out and ends at
    /// `published` (every platform succeeded) or `failed` (at least one did
    /// not). Only draft and scheduled posts may enter here; failed posts go
    /// through the retry controller.
    pub async fn publish(&self, post_id: &str) -> Result<Post> {
        let mut post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| CrosscastError::InvalidInput(format!("no such post: {}", post_id)))?;

        if !post.status.can_transition(PostStatus::Publishing)
            || post.status == PostStatus::Failed
        {
            return Err(CrosscastError::InvalidInput(format!(
                "post {} is {}, only draft or scheduled posts can be published",
                post.id, post.status
            )));
        }

        post.status = PostStatus::Publishing;
        self.db
            .update_post_status(&post.id, PostStatus::Publishing)
            .await?;

        let results = self.orchestrator.fan_out(&post, &post.platforms).await;
        post.results = results;

        finalize_outcome(&mut post);
        self.db.update_post_outcome(&post).await?;
        Ok(post)
    }
}

/// Reject an empty target list and collapse duplicates, preserving order.
pub(crate) fn validate_targets(platforms: Vec<Platform>) -> Result<Vec<Platform>> {
    if platforms.is_empty() {
        return Err(CrosscastError::InvalidInput(
            "at least one target platform is required".to_string(),
        ));
    }
    let mut seen = Vec::with_capacity(platforms.len());
    for platform in platforms {
        if !seen.contains(&platform) {
            seen.push(platform);
        }
    }
    Ok(seen)
}

pub(crate) fn validate_content(
    platforms: &[Platform],
    content: &BTreeMap<Platform, String>,
    images: &[String],
) -> Result<()> {
    for platform in platforms {
        let body = content.get(platform).map(String::as_str).unwrap_or("");
        if body.is_empty() && !(platform.allows_image_only() && !images.is_empty()) {
            return Err(CrosscastError::InvalidInput(format!(
                "no content provided for {platform}"
            )));
        }
    }
    Ok(())
}

/// Derive the post's final status from its result map.
pub(crate) fn finalize_outcome(post: &mut Post) {
    let failed = post.failed_platforms();
    if failed.is_empty() {
        post.status = PostStatus::Published;
        post.published_at = Some(chrono::Utc::now().timestamp());
        post.last_error = None;
    } else {
        post.status = PostStatus::Failed;
        post.last_error = Some(
            failed
                .iter()
                .map(|p| {
                    let detail = post
                        .results
                        .get(p)
                        .and_then(|r| r.error.as_deref())
                        .unwrap_or("no attempt recorded");
                    format!("{}: {}", p, detail)
                })
                .collect::<Vec<_>>()
                .join("; "),
        );
    }
    post.updated_at = chrono::Utc::now().timestamp();
}
