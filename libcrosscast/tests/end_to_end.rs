//! End-to-end workflow tests for the publish pipeline
//!
//! These tests wire the real token store, refresh manager, orchestrator, and
//! retry controller together over a temp-file database, with mock publishers
//! and a mock token endpoint standing in for the network.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use libcrosscast::db::Database;
use libcrosscast::error::CredentialError;
use libcrosscast::oauth::{TokenEndpoint, TokenRefreshManager, TokenResponse};
use libcrosscast::platforms::mock::{MapResolver, MockPublisher};
use libcrosscast::platforms::PublisherSet;
use libcrosscast::publish::{Orchestrator, PublishService, DEFAULT_PLATFORM_TIMEOUT};
use libcrosscast::retry::RetryController;
use libcrosscast::types::{Credential, Platform, PostStatus, PublishErrorKind};
use libcrosscast::{TokenCipher, TokenStore};
use tempfile::TempDir;

async fn create_test_db() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path.to_string_lossy()).await?;
    Ok((temp_dir, db))
}

fn publisher_set(twitter: MockPublisher, discord: MockPublisher) -> PublisherSet {
    PublisherSet {
        linkedin: Arc::new(MockPublisher::succeeding(Platform::LinkedIn)),
        instagram: Arc::new(MockPublisher::succeeding(Platform::Instagram)),
        twitter: Arc::new(twitter),
        discord: Arc::new(discord),
    }
}

fn post_content() -> BTreeMap<Platform, String> {
    let mut content = BTreeMap::new();
    content.insert(Platform::Twitter, "release day".to_string());
    content.insert(Platform::Discord, "release day, with more room".to_string());
    content
}

#[tokio::test]
async fn test_complete_publish_workflow() -> Result<()> {
    let (_temp_dir, db) = create_test_db().await?;

    let orchestrator = Orchestrator::new(
        publisher_set(
            MockPublisher::succeeding(Platform::Twitter),
            MockPublisher::succeeding(Platform::Discord),
        ),
        Arc::new(MapResolver::new(&Platform::ALL)),
        DEFAULT_PLATFORM_TIMEOUT,
    );
    let service = PublishService::new(db.clone(), orchestrator);

    let post = service
        .create_post(
            "user-1",
            post_content(),
            vec![],
            vec![Platform::Twitter, Platform::Discord],
            3,
        )
        .await?;
    assert_eq!(post.status, PostStatus::Draft);

    let published = service.publish(&post.id).await?;
    assert_eq!(published.status, PostStatus::Published);
    assert!(published.published_at.is_some());
    assert_eq!(published.results.len(), 2);
    assert!(published.results.values().all(|r| r.success));

    // The outcome survives a fresh read from the database
    let stored = db.get_post(&post.id).await?.unwrap();
    assert_eq!(stored.status, PostStatus::Published);
    assert!(stored.results[&Platform::Twitter].post_id.is_some());
    Ok(())
}

#[tokio::test]
async fn test_partial_failure_then_retry_to_success() -> Result<()> {
    let (_temp_dir, db) = create_test_db().await?;
    let resolver = Arc::new(MapResolver::new(&Platform::ALL));

    // First attempt: discord is down
    let first = Orchestrator::new(
        publisher_set(
            MockPublisher::succeeding(Platform::Twitter),
            MockPublisher::failing(
                Platform::Discord,
                PublishErrorKind::NetworkError,
                "connection reset",
            ),
        ),
        resolver.clone(),
        DEFAULT_PLATFORM_TIMEOUT,
    );
    let service = PublishService::new(db.clone(), first);

    let post = service
        .create_post(
            "user-1",
            post_content(),
            vec![],
            vec![Platform::Twitter, Platform::Discord],
            3,
        )
        .await?;
    let failed = service.publish(&post.id).await?;
    assert_eq!(failed.status, PostStatus::Failed);
    assert!(failed.results[&Platform::Twitter].success);
    let twitter_result = failed.results[&Platform::Twitter].clone();

    // Retry: discord has recovered
    let twitter_retry = MockPublisher::succeeding(Platform::Twitter);
    let twitter_calls = twitter_retry.call_log();
    let second = Orchestrator::new(
        publisher_set(twitter_retry, MockPublisher::succeeding(Platform::Discord)),
        resolver,
        DEFAULT_PLATFORM_TIMEOUT,
    );
    let controller = RetryController::new(db.clone(), second);

    let retried = controller.retry(&post.id).await?;
    assert_eq!(retried.status, PostStatus::Published);
    assert_eq!(retried.retry_count, 1);
    // Twitter was not re-published and its original result is intact
    assert_eq!(twitter_calls.lock().unwrap().len(), 0);
    assert_eq!(retried.results[&Platform::Twitter], twitter_result);
    Ok(())
}

struct CountingEndpoint {
    refresh_calls: AtomicUsize,
}

#[async_trait]
impl TokenEndpoint for CountingEndpoint {
    async fn exchange_code(
        &self,
        _platform: Platform,
        _code: &str,
        _pkce_verifier: Option<&str>,
    ) -> std::result::Result<TokenResponse, CredentialError> {
        unreachable!("exchange is not exercised here")
    }

    async fn refresh(
        &self,
        _platform: Platform,
        _refresh_token: &str,
    ) -> std::result::Result<TokenResponse, CredentialError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(TokenResponse {
            access_token: "refreshed-token".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
        })
    }
}

#[tokio::test]
async fn test_expired_token_is_refreshed_once_before_publishing() -> Result<()> {
    let (_temp_dir, db) = create_test_db().await?;

    let store = TokenStore::new(db.clone(), TokenCipher::new("end-to-end-master-key")?);
    store
        .store(
            "user-1",
            Platform::Twitter,
            &Credential {
                access_token: "stale-token".to_string(),
                refresh_token: Some("refresh-1".to_string()),
                expires_at: Some(chrono::Utc::now().timestamp() - 1),
                provider_user_id: None,
            },
        )
        .await?;

    let endpoint = CountingEndpoint {
        refresh_calls: AtomicUsize::new(0),
    };
    let manager = Arc::new(TokenRefreshManager::new(store, endpoint, 300));

    let twitter = MockPublisher::succeeding(Platform::Twitter);
    let twitter_calls = twitter.call_log();
    let orchestrator = Orchestrator::new(
        publisher_set(twitter, MockPublisher::succeeding(Platform::Discord)),
        manager.clone(),
        DEFAULT_PLATFORM_TIMEOUT,
    );
    let service = PublishService::new(db, orchestrator);

    let post = service
        .create_post(
            "user-1",
            post_content(),
            vec![],
            vec![Platform::Twitter],
            3,
        )
        .await?;
    let published = service.publish(&post.id).await?;

    assert_eq!(published.status, PostStatus::Published);
    // Exactly one refresh, and the publisher saw the new token
    let calls = twitter_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].access_token, "refreshed-token");
    Ok(())
}

#[tokio::test]
async fn test_unconnected_platform_fails_without_blocking_siblings() -> Result<()> {
    let (_temp_dir, db) = create_test_db().await?;

    // Only twitter is connected; discord resolution comes back empty
    let orchestrator = Orchestrator::new(
        publisher_set(
            MockPublisher::succeeding(Platform::Twitter),
            MockPublisher::succeeding(Platform::Discord),
        ),
        Arc::new(MapResolver::new(&[Platform::Twitter])),
        DEFAULT_PLATFORM_TIMEOUT,
    );
    let service = PublishService::new(db, orchestrator);

    let post = service
        .create_post(
            "user-1",
            post_content(),
            vec![],
            vec![Platform::Twitter, Platform::Discord],
            3,
        )
        .await?;
    let outcome = service.publish(&post.id).await?;

    assert_eq!(outcome.status, PostStatus::Failed);
    assert!(outcome.results[&Platform::Twitter].success);
    assert_eq!(
        outcome.results[&Platform::Discord].error_kind,
        Some(PublishErrorKind::AuthError)
    );
    Ok(())
}

#[tokio::test]
async fn test_retry_budget_is_exhausted() -> Result<()> {
    let (_temp_dir, db) = create_test_db().await?;
    let resolver = Arc::new(MapResolver::new(&Platform::ALL));

    let broken = || {
        Orchestrator::new(
            publisher_set(
                MockPublisher::succeeding(Platform::Twitter),
                MockPublisher::failing(
                    Platform::Discord,
                    PublishErrorKind::NetworkError,
                    "still down",
                ),
            ),
            resolver.clone(),
            DEFAULT_PLATFORM_TIMEOUT,
        )
    };

    let service = PublishService::new(db.clone(), broken());
    let post = service
        .create_post(
            "user-1",
            post_content(),
            vec![],
            vec![Platform::Twitter, Platform::Discord],
            2,
        )
        .await?;
    service.publish(&post.id).await?;

    let controller = RetryController::new(db.clone(), broken());
    assert_eq!(controller.retry(&post.id).await?.retry_count, 1);
    assert_eq!(controller.retry(&post.id).await?.retry_count, 2);

    // Budget spent: the third retry is refused and the counter stays put
    assert!(controller.retry(&post.id).await.is_err());
    let stored = db.get_post(&post.id).await?.unwrap();
    assert_eq!(stored.retry_count, 2);
    assert_eq!(stored.status, PostStatus::Failed);
    Ok(())
}
