//! Database operations for Crosscast
//!
//! Posts and credentials live in SQLite. Structured post fields (content map,
//! platform list, result map) are stored as JSON text columns; token columns
//! hold encrypted blobs and are never written in plaintext.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use crate::error::{DbError, Result};
use crate::types::{Platform, Post, PostStatus, PublishResult};

/// Raw credential row as stored. Token columns are still encrypted here;
/// decryption happens in the token store.
#[derive(Debug, Clone)]
pub struct CredentialRow {
    pub user_id: String,
    pub platform: Platform,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub provider_user_id: Option<String>,
    pub updated_at: i64,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Use forward slashes for SQLite URL (works on both Windows and Unix)
        // and mode=rwc so the database file is created if missing
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// In-memory database, for tests and ephemeral use.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;
        Ok(Self { pool })
    }

    /// Create a new post
    pub async fn create_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, user_id, content, images, platforms, status, results,
                               retry_count, max_retries, last_error, published_at,
                               created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.user_id)
        .bind(to_json(&post.content)?)
        .bind(to_json(&post.images)?)
        .bind(to_json(&post.platforms)?)
        .bind(post.status.as_str())
        .bind(to_json(&post.results)?)
        .bind(post.retry_count as i64)
        .bind(post.max_retries as i64)
        .bind(&post.last_error)
        .bind(post.published_at)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Get a post by ID
    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, content, images, platforms, status, results,
                   retry_count, max_retries, last_error, published_at,
                   created_at, updated_at
            FROM posts WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(row_to_post).transpose()
    }

    /// Update post status only, bumping updated_at.
    pub async fn update_post_status(&self, post_id: &str, status: PostStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts SET status = ?, updated_at = ? WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Persist the outcome of a publish or retry attempt: status, result map,
    /// retry counter, last error, and published timestamp.
    pub async fn update_post_outcome(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts
            SET status = ?, results = ?, retry_count = ?, last_error = ?,
                published_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(post.status.as_str())
        .bind(to_json(&post.results)?)
        .bind(post.retry_count as i64)
        .bind(&post.last_error)
        .bind(post.published_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(&post.id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// List a user's posts, newest first, optionally filtered by status.
    pub async fn list_posts(
        &self,
        user_id: &str,
        status: Option<PostStatus>,
        limit: usize,
    ) -> Result<Vec<Post>> {
        let rows = if let Some(status) = status {
            sqlx::query(
                r#"
                SELECT id, user_id, content, images, platforms, status, results,
                       retry_count, max_retries, last_error, published_at,
                       created_at, updated_at
                FROM posts WHERE user_id = ? AND status = ?
                ORDER BY created_at DESC LIMIT ?
                "#,
            )
            .bind(user_id)
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                SELECT id, user_id, content, images, platforms, status, results,
                       retry_count, max_retries, last_error, published_at,
                       created_at, updated_at
                FROM posts WHERE user_id = ?
                ORDER BY created_at DESC LIMIT ?
                "#,
            )
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(row_to_post).collect()
    }

    /// Insert or replace the credential for a (user, platform) pair.
    ///
    /// `created_at` is preserved on replace; `updated_at` always advances.
    pub async fn upsert_credential(&self, row: &CredentialRow) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO credentials (user_id, platform, access_token, refresh_token,
                                     expires_at, provider_user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, platform) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                provider_user_id = excluded.provider_user_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.user_id)
        .bind(row.platform.as_str())
        .bind(&row.access_token)
        .bind(&row.refresh_token)
        .bind(row.expires_at)
        .bind(&row.provider_user_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Get the stored credential row for a (user, platform) pair, if any.
    pub async fn get_credential(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<CredentialRow>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, platform, access_token, refresh_token, expires_at,
                   provider_user_id, updated_at
            FROM credentials WHERE user_id = ? AND platform = ?
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(row_to_credential).transpose()
    }

    /// Conditionally replace tokens after a refresh.
    ///
    /// The update only lands if the row's `updated_at` still matches the
    /// value read before refreshing. Returns false when another writer got
    /// there first, in which case the caller re-reads instead of clobbering
    /// the newer tokens.
    pub async fn swap_credential_tokens(
        &self,
        user_id: &str,
        platform: Platform,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<i64>,
        expected_updated_at: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET access_token = ?, refresh_token = ?, expires_at = ?, updated_at = ?
            WHERE user_id = ? AND platform = ? AND updated_at = ?
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(user_id)
        .bind(platform.as_str())
        .bind(expected_updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete the credential for a (user, platform) pair. Returns whether a
    /// row was removed.
    pub async fn delete_credential(&self, user_id: &str, platform: Platform) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM credentials WHERE user_id = ? AND platform = ?
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Platforms a user has stored credentials for.
    pub async fn list_connected_platforms(&self, user_id: &str) -> Result<Vec<Platform>> {
        let rows = sqlx::query(
            r#"
            SELECT platform FROM credentials WHERE user_id = ? ORDER BY platform
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                let raw: String = r.get("platform");
                Platform::from_str(&raw).map_err(DbError::CorruptRecord).map_err(Into::into)
            })
            .collect()
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| DbError::CorruptRecord(format!("JSON encode failed: {}", e)).into())
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str, column: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| DbError::CorruptRecord(format!("bad {} column: {}", column, e)).into())
}

fn row_to_post(r: sqlx::sqlite::SqliteRow) -> Result<Post> {
    let content: BTreeMap<Platform, String> = from_json(&r.get::<String, _>("content"), "content")?;
    let images: Vec<String> = from_json(&r.get::<String, _>("images"), "images")?;
    let platforms: Vec<Platform> = from_json(&r.get::<String, _>("platforms"), "platforms")?;
    let results: BTreeMap<Platform, PublishResult> =
        from_json(&r.get::<String, _>("results"), "results")?;
    let status = PostStatus::from_str(&r.get::<String, _>("status"))
        .map_err(DbError::CorruptRecord)?;

    Ok(Post {
        id: r.get("id"),
        user_id: r.get("user_id"),
        content,
        images,
        platforms,
        status,
        results,
        retry_count: r.get::<i64, _>("retry_count") as u32,
        max_retries: r.get::<i64, _>("max_retries") as u32,
        last_error: r.get("last_error"),
        published_at: r.get("published_at"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn row_to_credential(r: sqlx::sqlite::SqliteRow) -> Result<CredentialRow> {
    let platform = Platform::from_str(&r.get::<String, _>("platform"))
        .map_err(DbError::CorruptRecord)?;

    Ok(CredentialRow {
        user_id: r.get("user_id"),
        platform,
        access_token: r.get("access_token"),
        refresh_token: r.get("refresh_token"),
        expires_at: r.get("expires_at"),
        provider_user_id: r.get("provider_user_id"),
        updated_at: r.get("updated_at"),
    })
}
