//! OAuth authorization flows and token refresh
//!
//! Covers the authorization-code flow for LinkedIn, Instagram, and Twitter
//! (Twitter additionally requires PKCE) and the refresh lifecycle for stored
//! tokens. Discord is webhook-based and never passes through here.
//!
//! Refresh policy: a token whose remaining lifetime is inside the buffer
//! window (default 5 minutes) is exchanged before use, and the stored expiry
//! is itself recorded as `now + expires_in - buffer` so the next staleness
//! check works from the same basis. Refresh is attempted at most once per
//! call; a 4xx from the token endpoint means the grant is dead and the user
//! must reauthorize.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{OAuthApp, OAuthConfig};
use crate::error::{CredentialError, Result};
use crate::token_store::TokenStore;
use crate::types::{Credential, Platform};

pub const DEFAULT_REFRESH_BUFFER_SECS: i64 = 300;

const PKCE_VERIFIER_LEN: usize = 64;

/// PKCE verifier/challenge pair for Twitter's authorization flow.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    /// Generate a fresh verifier and its S256 challenge.
    pub fn generate() -> Self {
        let verifier: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PKCE_VERIFIER_LEN)
            .map(char::from)
            .collect();
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
        Self {
            verifier,
            challenge,
        }
    }
}

/// Random state parameter for CSRF protection of the authorize redirect.
pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Raw token endpoint response, shared by exchange and refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// The platform's token endpoint, abstracted so the refresh manager can be
/// exercised without network access.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange_code(
        &self,
        platform: Platform,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> std::result::Result<TokenResponse, CredentialError>;

    async fn refresh(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> std::result::Result<TokenResponse, CredentialError>;
}

/// Real token endpoint client backed by reqwest.
pub struct HttpTokenEndpoint {
    http: reqwest::Client,
    oauth: OAuthConfig,
}

impl HttpTokenEndpoint {
    pub fn new(http: reqwest::Client, oauth: OAuthConfig) -> Self {
        Self { http, oauth }
    }

    fn app(&self, platform: Platform) -> std::result::Result<&OAuthApp, CredentialError> {
        let app = match platform {
            Platform::LinkedIn => self.oauth.linkedin.as_ref(),
            Platform::Instagram => self.oauth.instagram.as_ref(),
            Platform::Twitter => self.oauth.twitter.as_ref(),
            Platform::Discord => None,
        };
        app.ok_or_else(|| CredentialError::ProviderNotConfigured(platform.to_string()))
    }

    fn token_url(platform: Platform) -> std::result::Result<&'static str, CredentialError> {
        match platform {
            Platform::LinkedIn => Ok("https://www.linkedin.com/oauth/v2/accessToken"),
            Platform::Instagram => Ok("https://api.instagram.com/oauth/access_token"),
            Platform::Twitter => Ok("https://api.twitter.com/2/oauth2/token"),
            Platform::Discord => Err(CredentialError::ProviderNotConfigured(
                "discord (webhook-based, no token endpoint)".to_string(),
            )),
        }
    }

    /// Build the authorization URL the user is sent to.
    ///
    /// Twitter requires the PKCE challenge here; the matching verifier must
    /// be supplied again on [`exchange_code`](TokenEndpoint::exchange_code).
    pub fn authorize_url(
        &self,
        platform: Platform,
        state: &str,
        pkce: Option<&Pkce>,
    ) -> std::result::Result<Url, CredentialError> {
        let app = self.app(platform)?;

        let (base, scope) = match platform {
            Platform::LinkedIn => (
                "https://www.linkedin.com/oauth/v2/authorization",
                "openid profile w_member_social",
            ),
            Platform::Instagram => (
                "https://api.instagram.com/oauth/authorize",
                "instagram_business_basic,instagram_business_content_publish",
            ),
            Platform::Twitter => (
                "https://twitter.com/i/oauth2/authorize",
                "tweet.read tweet.write users.read offline.access",
            ),
            Platform::Discord => {
                return Err(CredentialError::ProviderNotConfigured(
                    "discord (webhook-based, no authorize flow)".to_string(),
                ))
            }
        };

        let mut url = Url::parse(base)
            .map_err(|e| CredentialError::Encryption(format!("bad authorize URL: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &app.client_id)
                .append_pair("redirect_uri", &app.redirect_uri)
                .append_pair("state", state)
                .append_pair("scope", scope);

            if platform == Platform::Twitter {
                let pkce = pkce.ok_or_else(|| {
                    CredentialError::ProviderNotConfigured(
                        "twitter authorization requires PKCE".to_string(),
                    )
                })?;
                query
                    .append_pair("code_challenge", &pkce.challenge)
                    .append_pair("code_challenge_method", "S256");
            }
        }

        Ok(url)
    }

    async fn post_token_request(
        &self,
        platform: Platform,
        form: &[(&str, &str)],
    ) -> std::result::Result<TokenResponse, CredentialError> {
        let app = self.app(platform)?;
        let url = Self::token_url(platform)?;

        let mut request = self.http.post(url).form(form);
        // Twitter authenticates the app via HTTP Basic rather than form fields
        if platform == Platform::Twitter {
            request = request.basic_auth(&app.client_id, Some(&app.client_secret));
        }

        let response = request
            .send()
            .await
            .map_err(|e| CredentialError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            // 5xx: the endpoint is unwell, not the grant
            return Err(CredentialError::Network(format!(
                "token endpoint returned {}",
                status
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| CredentialError::Network(format!("bad token response: {}", e)))
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(
        &self,
        platform: Platform,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> std::result::Result<TokenResponse, CredentialError> {
        let app = self.app(platform)?.clone();

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", app.redirect_uri.as_str()),
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret.as_str()),
        ];
        if let Some(verifier) = pkce_verifier {
            form.push(("code_verifier", verifier));
        }

        self.post_token_request(platform, &form).await
    }

    async fn refresh(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> std::result::Result<TokenResponse, CredentialError> {
        let app = self.app(platform)?.clone();

        let form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret.as_str()),
        ];

        self.post_token_request(platform, &form).await
    }
}

type RefreshLockKey = (String, Platform);

/// Decides when stored tokens are stale and exchanges them for fresh ones.
///
/// At most one refresh per (user, platform) is in flight within this process
/// (per-key async mutex), and the final write is a compare-and-swap on the
/// row's `updated_at`, so a refresh that raced another writer never clobbers
/// the newer tokens.
pub struct TokenRefreshManager<E: TokenEndpoint> {
    store: TokenStore,
    endpoint: E,
    buffer_secs: i64,
    refresh_locks: Mutex<HashMap<RefreshLockKey, Arc<Mutex<()>>>>,
}

impl<E: TokenEndpoint> TokenRefreshManager<E> {
    pub fn new(store: TokenStore, endpoint: E, buffer_secs: i64) -> Self {
        Self {
            store,
            endpoint,
            buffer_secs,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a token with this expiry needs refreshing before use.
    /// Non-expiring credentials (Discord webhooks) are never stale.
    pub fn is_expiring_soon(&self, expires_at: Option<i64>) -> bool {
        match expires_at {
            Some(at) => at - chrono::Utc::now().timestamp() < self.buffer_secs,
            None => false,
        }
    }

    /// Get a credential fit for immediate use, refreshing first if it is
    /// inside the expiry buffer. Returns `Ok(None)` when the user has no
    /// credential for the platform.
    pub async fn get_valid(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<Credential>> {
        let Some(stored) = self.store.get(user_id, platform).await? else {
            return Ok(None);
        };

        if !self.is_expiring_soon(stored.credential.expires_at) {
            return Ok(Some(stored.credential));
        }

        debug!(user_id, platform = %platform, "token expiring soon, refreshing");
        Ok(Some(self.refresh(user_id, platform).await?))
    }

    /// Exchange the stored refresh token for fresh tokens and persist them.
    ///
    /// A missing refresh token is a permanent failure; the caller must send
    /// the user back through authorization, not retry.
    pub async fn refresh(&self, user_id: &str, platform: Platform) -> Result<Credential> {
        let lock = self.lock_for(user_id, platform).await;
        let _guard = lock.lock().await;

        // Re-read under the lock: a refresh that finished while we waited
        // already did the work.
        let stored = self
            .store
            .get(user_id, platform)
            .await?
            .ok_or_else(|| CredentialError::ReauthorizationRequired(platform.to_string()))?;

        if !self.is_expiring_soon(stored.credential.expires_at) {
            return Ok(stored.credential);
        }

        let refresh_token = stored.credential.refresh_token.clone().ok_or_else(|| {
            CredentialError::ReauthorizationRequired(format!(
                "{} issued no refresh token",
                platform
            ))
        })?;

        let response = self.endpoint.refresh(platform, &refresh_token).await?;

        let refreshed = Credential {
            access_token: response.access_token,
            // Some platforms only rotate access tokens
            refresh_token: response.refresh_token.or(Some(refresh_token)),
            expires_at: response
                .expires_in
                .map(|s| chrono::Utc::now().timestamp() + s - self.buffer_secs),
            provider_user_id: stored.credential.provider_user_id.clone(),
        };

        let swapped = self
            .store
            .swap_tokens(user_id, platform, &refreshed, stored.updated_at)
            .await?;

        if swapped {
            info!(user_id, platform = %platform, "refreshed access token");
            return Ok(refreshed);
        }

        // Another writer refreshed the row first; use what it stored.
        warn!(user_id, platform = %platform, "refresh raced another writer, using stored tokens");
        let current = self
            .store
            .get(user_id, platform)
            .await?
            .ok_or_else(|| CredentialError::ReauthorizationRequired(platform.to_string()))?;
        Ok(current.credential)
    }

    /// Complete an authorization-code exchange and store the credential.
    pub async fn complete_authorization(
        &self,
        user_id: &str,
        platform: Platform,
        code: &str,
        pkce_verifier: Option<&str>,
        provider_user_id: Option<String>,
    ) -> Result<Credential> {
        let response = self
            .endpoint
            .exchange_code(platform, code, pkce_verifier)
            .await?;

        let credential = Credential {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: response
                .expires_in
                .map(|s| chrono::Utc::now().timestamp() + s - self.buffer_secs),
            provider_user_id,
        };

        self.store.store(user_id, platform, &credential).await?;
        info!(user_id, platform = %platform, "stored credential from code exchange");
        Ok(credential)
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    async fn lock_for(&self, user_id: &str, platform: Platform) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry((user_id.to_string(), platform))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
