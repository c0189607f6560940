//! Mock publisher for testing
//!
//! A configurable publisher that simulates successes, classified failures,
//! and latency, and records every call for verification. Used by the
//! orchestrator and retry tests to exercise fan-out logic without platform
//! credentials or network access.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use std::collections::HashMap;

use crate::error::{CredentialError, CrosscastError};
use crate::platforms::Publisher;
use crate::publish::CredentialResolver;
use crate::types::{Credential, Platform, PublishError, PublishErrorKind, RemotePost};

/// One recorded publish call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub access_token: String,
    pub content: String,
    pub images: Vec<String>,
}

/// Configuration for mock publisher behavior
#[derive(Clone)]
pub struct MockBehavior {
    pub platform: Platform,
    /// Error returned from publish; None means success.
    pub failure: Option<(PublishErrorKind, String)>,
    /// Delay before completing (simulates network latency)
    pub delay: Duration,
    /// Every publish call, for verification
    pub calls: Arc<Mutex<Vec<RecordedCall>>>,
}

pub struct MockPublisher {
    behavior: MockBehavior,
}

impl MockPublisher {
    pub fn new(behavior: MockBehavior) -> Self {
        Self { behavior }
    }

    /// A publisher that always succeeds.
    pub fn succeeding(platform: Platform) -> Self {
        Self::new(MockBehavior {
            platform,
            failure: None,
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// A publisher that always fails with the given classification.
    pub fn failing(platform: Platform, kind: PublishErrorKind, message: &str) -> Self {
        Self::new(MockBehavior {
            platform,
            failure: Some((kind, message.to_string())),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// A publisher that succeeds after the given delay.
    pub fn slow(platform: Platform, delay: Duration) -> Self {
        Self::new(MockBehavior {
            platform,
            failure: None,
            delay,
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn call_count(&self) -> usize {
        self.behavior.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.behavior.calls.lock().unwrap().clone()
    }

    /// Handle onto the call log that survives moving the publisher into a
    /// `PublisherSet`.
    pub fn call_log(&self) -> Arc<Mutex<Vec<RecordedCall>>> {
        self.behavior.calls.clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn platform(&self) -> Platform {
        self.behavior.platform
    }

    async fn publish(
        &self,
        credential: &Credential,
        content: &str,
        images: &[String],
    ) -> Result<RemotePost, PublishError> {
        self.behavior.calls.lock().unwrap().push(RecordedCall {
            access_token: credential.access_token.clone(),
            content: content.to_string(),
            images: images.to_vec(),
        });

        if !self.behavior.delay.is_zero() {
            sleep(self.behavior.delay).await;
        }

        match &self.behavior.failure {
            Some((kind, message)) => Err(PublishError::new(*kind, message.clone())),
            None => {
                let id = format!("{}-mock-{}", self.behavior.platform, uuid::Uuid::new_v4());
                Ok(RemotePost {
                    url: Some(format!("https://example.com/{}", id)),
                    id,
                })
            }
        }
    }
}

/// Credential resolver backed by a fixed map, with optional per-platform
/// failures. Stands in for the token refresh manager in tests.
pub struct MapResolver {
    credentials: HashMap<Platform, Credential>,
    failures: HashMap<Platform, String>,
}

impl MapResolver {
    /// A resolver with a canned credential for each listed platform.
    pub fn new(platforms: &[Platform]) -> Self {
        let credentials = platforms
            .iter()
            .map(|&p| {
                (
                    p,
                    Credential {
                        access_token: format!("{}-token", p),
                        refresh_token: None,
                        expires_at: None,
                        provider_user_id: Some("remote-1".to_string()),
                    },
                )
            })
            .collect();
        Self {
            credentials,
            failures: HashMap::new(),
        }
    }

    /// Make resolution fail for one platform.
    pub fn failing_for(mut self, platform: Platform, message: &str) -> Self {
        self.credentials.remove(&platform);
        self.failures.insert(platform, message.to_string());
        self
    }
}

#[async_trait]
impl CredentialResolver for MapResolver {
    async fn resolve(
        &self,
        _user_id: &str,
        platform: Platform,
    ) -> crate::error::Result<Option<Credential>> {
        if let Some(message) = self.failures.get(&platform) {
            return Err(CrosscastError::Credential(
                CredentialError::ReauthorizationRequired(message.clone()),
            ));
        }
        Ok(self.credentials.get(&platform).cloned())
    }
}
