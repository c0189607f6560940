//! Core types for Crosscast

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A target social platform.
///
/// Closed enum: publisher dispatch and content maps match exhaustively on
/// this type, so adding a platform is a compile-time-checked change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    LinkedIn,
    Instagram,
    Twitter,
    Discord,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::LinkedIn,
        Platform::Instagram,
        Platform::Twitter,
        Platform::Discord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::LinkedIn => "linkedin",
            Platform::Instagram => "instagram",
            Platform::Twitter => "twitter",
            Platform::Discord => "discord",
        }
    }

    /// Documented per-platform character limit for post bodies.
    pub fn character_limit(&self) -> usize {
        match self {
            Platform::LinkedIn => 3000,
            Platform::Instagram => 2200,
            Platform::Twitter => 280,
            Platform::Discord => 4000,
        }
    }

    /// Whether a post on this platform may be image-only (empty caption).
    pub fn allows_image_only(&self) -> bool {
        matches!(self, Platform::Instagram)
    }

    /// Whether this platform's publisher requires an image.
    pub fn requires_image(&self) -> bool {
        matches!(self, Platform::Instagram)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linkedin" => Ok(Platform::LinkedIn),
            "instagram" => Ok(Platform::Instagram),
            "twitter" | "x" => Ok(Platform::Twitter),
            "discord" => Ok(Platform::Discord),
            _ => Err(format!(
                "Unknown platform: '{}'. Valid options: linkedin, instagram, twitter, discord",
                s
            )),
        }
    }
}

/// Lifecycle status of a post.
///
/// Legal transitions: draft -> scheduled -> publishing -> published | failed,
/// and failed -> publishing via retry. Nothing else.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Publishing,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    pub fn can_transition(&self, next: PostStatus) -> bool {
        use PostStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Draft, Publishing)
                | (Scheduled, Publishing)
                | (Publishing, Published)
                | (Publishing, Failed)
                | (Failed, Publishing)
        )
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "publishing" => Ok(PostStatus::Publishing),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            _ => Err(format!("Unknown post status: '{}'", s)),
        }
    }
}

/// Platform-independent classification of a publish failure.
///
/// The retry controller and orchestrator branch on these kinds, so they must
/// stay stable across platforms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishErrorKind {
    AuthError,
    RateLimitExceeded,
    ContentTooLong,
    InvalidMedia,
    NetworkError,
    UnknownError,
}

impl PublishErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishErrorKind::AuthError => "AUTH_ERROR",
            PublishErrorKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            PublishErrorKind::ContentTooLong => "CONTENT_TOO_LONG",
            PublishErrorKind::InvalidMedia => "INVALID_MEDIA",
            PublishErrorKind::NetworkError => "NETWORK_ERROR",
            PublishErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for PublishErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A publisher-level failure. Always caught and converted into a
/// [`PublishResult`] entry; never escapes the orchestrator.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PublishError {
    pub kind: PublishErrorKind,
    pub message: String,
}

impl PublishError {
    pub fn new(kind: PublishErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Identifier (and URL, when the platform provides one) of a remote post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePost {
    pub id: String,
    pub url: Option<String>,
}

/// Outcome of one publish attempt on one platform.
///
/// Immutable once written for a given attempt; a retry overwrites only the
/// entries for platforms it re-attempted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishResult {
    pub platform: Platform,
    pub success: bool,
    pub post_id: Option<String>,
    pub post_url: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<PublishErrorKind>,
    pub timestamp: i64,
}

impl PublishResult {
    pub fn ok(platform: Platform, remote: RemotePost) -> Self {
        Self {
            platform,
            success: true,
            post_id: Some(remote.id),
            post_url: remote.url,
            error: None,
            error_kind: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn err(platform: Platform, error: PublishError) -> Self {
        Self {
            platform,
            success: false,
            post_id: None,
            post_url: None,
            error: Some(error.message),
            error_kind: Some(error.kind),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Decrypted OAuth credential for one (user, platform) pair.
///
/// For Discord the access token holds the webhook URL and `expires_at` is
/// `None` (webhooks do not expire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub provider_user_id: Option<String>,
}

/// A credential as read back from the token store, carrying the row's
/// `updated_at` for the optimistic refresh check.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub credential: Credential,
    pub updated_at: i64,
}

/// A logical post fanned out to one or more platforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub content: BTreeMap<Platform, String>,
    pub images: Vec<String>,
    pub platforms: Vec<Platform>,
    pub status: PostStatus,
    pub results: BTreeMap<Platform, PublishResult>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub published_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

impl Post {
    pub fn new(
        user_id: String,
        content: BTreeMap<Platform, String>,
        images: Vec<String>,
        platforms: Vec<Platform>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            content,
            images,
            platforms,
            status: PostStatus::Draft,
            results: BTreeMap::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Targeted platforms whose stored result is missing or unsuccessful.
    pub fn failed_platforms(&self) -> Vec<Platform> {
        self.platforms
            .iter()
            .copied()
            .filter(|p| self.results.get(p).map(|r| !r.success).unwrap_or(true))
            .collect()
    }
}
