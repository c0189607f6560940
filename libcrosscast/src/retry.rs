//! Bounded retry of failed publishes
//!
//! A retry re-enters the orchestrator with only the platforms that failed
//! (or were never attempted); successful results are immutable and carried
//! forward untouched. Attempts are counted before the fan-out and persisted
//! first, so a crash mid-retry can only waste an attempt, never grant a free
//! one.

use tracing::info;

use crate::db::Database;
use crate::error::{Result, RetryError};
use crate::publish::{finalize_outcome, Orchestrator};
use crate::types::{Post, PostStatus};

pub struct RetryController {
    db: Database,
    orchestrator: Orchestrator,
}

impl RetryController {
    pub fn new(db: Database, orchestrator: Orchestrator) -> Self {
        Self { db, orchestrator }
    }

    /// Re-attempt the failed subset of a failed post's platforms.
    ///
    /// Checks run in a fixed order: the post must exist, be in `failed`
    /// status, have attempts left, and have at least one failed platform.
    /// A post rejected here keeps its retry counter unchanged.
    pub async fn retry(&self, post_id: &str) -> Result<Post> {
        let mut post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| RetryError::PostNotFound(post_id.to_string()))?;

        if post.status != PostStatus::Failed {
            return Err(RetryError::NotRetryable {
                status: post.status.to_string(),
            }
            .into());
        }

        if post.retry_count + 1 > post.max_retries {
            return Err(RetryError::MaxRetriesExceeded {
                retry_count: post.retry_count,
                max_retries: post.max_retries,
            }
            .into());
        }

        let failed = post.failed_platforms();
        if failed.is_empty() {
            return Err(RetryError::NothingToRetry.into());
        }

        info!(
            post_id = %post.id,
            attempt = post.retry_count + 1,
            max_retries = post.max_retries,
            platforms = ?failed,
            "retrying failed platforms"
        );

        // Count the attempt and persist before any network I/O
        post.retry_count += 1;
        post.status = PostStatus::Publishing;
        self.db.update_post_outcome(&post).await?;

        let retried = self.orchestrator.fan_out(&post, &failed).await;
        // Overwrite only the retried entries; earlier successes stand
        post.results.extend(retried);

        finalize_outcome(&mut post);
        self.db.update_post_outcome(&post).await?;
        Ok(post)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::error::CrosscastError;
    use crate::platforms::mock::{MapResolver, MockPublisher};
    use crate::platforms::PublisherSet;
    use crate::publish::DEFAULT_PLATFORM_TIMEOUT;
    use crate::types::{Platform, PublishError, PublishErrorKind, PublishResult, RemotePost};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn failed_post(user_id: &str) -> Post {
        let mut content = BTreeMap::new();
        content.insert(Platform::Twitter, "hello".to_string());
        content.insert(Platform::Discord, "hello".to_string());
        let mut post = Post::new(
            user_id.to_string(),
            content,
            vec![],
            vec![Platform::Twitter, Platform::Discord],
        );
        post.status = PostStatus::Failed;
        post.results.insert(
            Platform::Twitter,
            PublishResult::ok(
                Platform::Twitter,
                RemotePost {
                    id: "tw-1".to_string(),
                    url: None,
                },
            ),
        );
        post.results.insert(
            Platform::Discord,
            PublishResult::err(
                Platform::Discord,
                PublishError::new(PublishErrorKind::NetworkError, "timeout"),
            ),
        );
        post.last_error = Some("discord: timeout".to_string());
        post
    }

    fn controller(
        db: Database,
        twitter: MockPublisher,
        discord: MockPublisher,
    ) -> RetryController {
        let set = PublisherSet {
            linkedin: Arc::new(MockPublisher::succeeding(Platform::LinkedIn)),
            instagram: Arc::new(MockPublisher::succeeding(Platform::Instagram)),
            twitter: Arc::new(twitter),
            discord: Arc::new(discord),
        };
        let orchestrator = Orchestrator::new(
            set,
            Arc::new(MapResolver::new(&Platform::ALL)),
            DEFAULT_PLATFORM_TIMEOUT,
        );
        RetryController::new(db, orchestrator)
    }

    #[tokio::test]
    async fn test_retry_reattempts_only_failed_platforms() {
        let db = Database::in_memory().await.unwrap();
        let post = failed_post("user-1");
        db.create_post(&post).await.unwrap();

        let twitter = MockPublisher::succeeding(Platform::Twitter);
        let twitter_calls = twitter.call_log();
        let discord = MockPublisher::succeeding(Platform::Discord);
        let discord_calls = discord.call_log();
        let controller = controller(db.clone(), twitter, discord);

        let retried = controller.retry(&post.id).await.unwrap();

        assert_eq!(twitter_calls.lock().unwrap().len(), 0);
        assert_eq!(discord_calls.lock().unwrap().len(), 1);
        assert_eq!(retried.status, PostStatus::Published);
        assert_eq!(retried.retry_count, 1);
    }

    #[tokio::test]
    async fn test_retry_preserves_prior_success_result() {
        let db = Database::in_memory().await.unwrap();
        let post = failed_post("user-1");
        let original_twitter = post.results[&Platform::Twitter].clone();
        db.create_post(&post).await.unwrap();

        let controller = controller(
            db.clone(),
            MockPublisher::succeeding(Platform::Twitter),
            MockPublisher::succeeding(Platform::Discord),
        );

        let retried = controller.retry(&post.id).await.unwrap();

        // Twitter's entry is byte-for-byte the original, not a re-publish
        assert_eq!(retried.results[&Platform::Twitter], original_twitter);
        assert!(retried.results[&Platform::Discord].success);
        assert!(retried.last_error.is_none());
        assert!(retried.published_at.is_some());
    }

    #[tokio::test]
    async fn test_retry_failure_stays_failed_and_counts() {
        let db = Database::in_memory().await.unwrap();
        let post = failed_post("user-1");
        db.create_post(&post).await.unwrap();

        let controller = controller(
            db.clone(),
            MockPublisher::succeeding(Platform::Twitter),
            MockPublisher::failing(
                Platform::Discord,
                PublishErrorKind::NetworkError,
                "still down",
            ),
        );

        let retried = controller.retry(&post.id).await.unwrap();
        assert_eq!(retried.status, PostStatus::Failed);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.last_error, Some("discord: still down".to_string()));

        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.status, PostStatus::Failed);
    }

    #[tokio::test]
    async fn test_retry_exhausts_after_max_retries() {
        let db = Database::in_memory().await.unwrap();
        let mut post = failed_post("user-1");
        post.max_retries = 2;
        db.create_post(&post).await.unwrap();

        let controller = controller(
            db.clone(),
            MockPublisher::succeeding(Platform::Twitter),
            MockPublisher::failing(
                Platform::Discord,
                PublishErrorKind::NetworkError,
                "still down",
            ),
        );

        controller.retry(&post.id).await.unwrap();
        controller.retry(&post.id).await.unwrap();

        let result = controller.retry(&post.id).await;
        match result {
            Err(CrosscastError::Retry(RetryError::MaxRetriesExceeded {
                retry_count,
                max_retries,
            })) => {
                assert_eq!(retry_count, 2);
                assert_eq!(max_retries, 2);
            }
            other => panic!("expected MaxRetriesExceeded, got {:?}", other.map(|_| ())),
        }

        // The refused attempt left the counter alone
        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retry_makes_no_publish_calls() {
        let db = Database::in_memory().await.unwrap();
        let mut post = failed_post("user-1");
        post.max_retries = 0;
        db.create_post(&post).await.unwrap();

        let discord = MockPublisher::succeeding(Platform::Discord);
        let discord_calls = discord.call_log();
        let controller = controller(
            db.clone(),
            MockPublisher::succeeding(Platform::Twitter),
            discord,
        );

        let result = controller.retry(&post.id).await;
        assert!(matches!(
            result,
            Err(CrosscastError::Retry(RetryError::MaxRetriesExceeded { .. }))
        ));
        assert_eq!(discord_calls.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_retry_non_failed_post_is_not_retryable() {
        let db = Database::in_memory().await.unwrap();
        let mut post = failed_post("user-1");
        post.status = PostStatus::Published;
        db.create_post(&post).await.unwrap();

        let controller = controller(
            db.clone(),
            MockPublisher::succeeding(Platform::Twitter),
            MockPublisher::succeeding(Platform::Discord),
        );

        let result = controller.retry(&post.id).await;
        match result {
            Err(CrosscastError::Retry(RetryError::NotRetryable { status })) => {
                assert_eq!(status, "published");
            }
            other => panic!("expected NotRetryable, got {:?}", other.map(|_| ())),
        }

        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn test_retry_missing_post() {
        let db = Database::in_memory().await.unwrap();
        let controller = controller(
            db,
            MockPublisher::succeeding(Platform::Twitter),
            MockPublisher::succeeding(Platform::Discord),
        );

        let result = controller.retry("no-such-id").await;
        assert!(matches!(
            result,
            Err(CrosscastError::Retry(RetryError::PostNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_retry_nothing_to_retry() {
        let db = Database::in_memory().await.unwrap();
        let mut post = failed_post("user-1");
        // Failed status but every platform actually succeeded
        post.results.insert(
            Platform::Discord,
            PublishResult::ok(
                Platform::Discord,
                RemotePost {
                    id: "d-1".to_string(),
                    url: None,
                },
            ),
        );
        db.create_post(&post).await.unwrap();

        let controller = controller(
            db,
            MockPublisher::succeeding(Platform::Twitter),
            MockPublisher::succeeding(Platform::Discord),
        );

        let result = controller.retry(&post.id).await;
        assert!(matches!(
            result,
            Err(CrosscastError::Retry(RetryError::NothingToRetry))
        ));
    }

    #[tokio::test]
    async fn test_retry_treats_missing_entry_as_failed() {
        let db = Database::in_memory().await.unwrap();
        let mut post = failed_post("user-1");
        // Discord has no result entry at all
        post.results.remove(&Platform::Discord);
        db.create_post(&post).await.unwrap();

        let discord = MockPublisher::succeeding(Platform::Discord);
        let discord_calls = discord.call_log();
        let controller = controller(
            db,
            MockPublisher::succeeding(Platform::Twitter),
            discord,
        );

        let retried = controller.retry(&post.id).await.unwrap();
        assert_eq!(discord_calls.lock().unwrap().len(), 1);
        assert_eq!(retried.status, PostStatus::Published);
    }
}
