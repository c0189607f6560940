//! Instagram publisher (Graph API content publishing)
//!
//! Two-step flow: create a media container from the image URL and caption,
//! then publish the container. Instagram is image-first: a post without an
//! image is rejected in validation before any network call.

use async_trait::async_trait;
use tracing::debug;

use crate::platforms::{status_error, transport_error, Publisher};
use crate::types::{Credential, Platform, PublishError, PublishErrorKind, RemotePost};

const GRAPH_BASE: &str = "https://graph.instagram.com/v21.0";

pub struct InstagramPublisher {
    http: reqwest::Client,
    graph_base: String,
}

impl InstagramPublisher {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base(http, GRAPH_BASE)
    }

    pub(crate) fn with_base(http: reqwest::Client, graph_base: impl Into<String>) -> Self {
        Self {
            http,
            graph_base: graph_base.into(),
        }
    }

    /// Business-account id from the stored credential, falling back to a
    /// `/me` lookup when the credential predates id capture.
    async fn resolve_account_id(&self, credential: &Credential) -> Result<String, PublishError> {
        if let Some(ig_user_id) = credential.provider_user_id.as_deref() {
            return Ok(ig_user_id.to_string());
        }

        let response = self
            .http
            .get(format!("{}/me", self.graph_base))
            .query(&[
                ("fields", "id"),
                ("access_token", credential.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(Platform::Instagram, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(Platform::Instagram, status.as_u16(), &body));
        }

        let me: serde_json::Value = response
            .json()
            .await
            .map_err(|e| transport_error(Platform::Instagram, e))?;
        me["id"].as_str().map(String::from).ok_or_else(|| {
            PublishError::new(
                PublishErrorKind::AuthError,
                "instagram /me response has no account id; reconnect the account",
            )
        })
    }

    async fn graph_post(
        &self,
        url: String,
        form: &[(&str, &str)],
    ) -> Result<serde_json::Value, PublishError> {
        let response = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Instagram, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(Platform::Instagram, status.as_u16(), &body));
        }

        response
            .json()
            .await
            .map_err(|e| transport_error(Platform::Instagram, e))
    }

    fn extract_id(value: &serde_json::Value, context: &str) -> Result<String, PublishError> {
        value["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| {
                PublishError::new(
                    PublishErrorKind::UnknownError,
                    format!("instagram {} response missing id", context),
                )
            })
    }

    /// Best-effort permalink lookup; the post succeeded either way.
    async fn permalink(&self, access_token: &str, media_id: &str) -> Option<String> {
        let response = self
            .http
            .get(format!("{}/{}", self.graph_base, media_id))
            .query(&[("fields", "permalink"), ("access_token", access_token)])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let value: serde_json::Value = response.json().await.ok()?;
        value["permalink"].as_str().map(String::from)
    }
}

#[async_trait]
impl Publisher for InstagramPublisher {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn publish(
        &self,
        credential: &Credential,
        content: &str,
        images: &[String],
    ) -> Result<RemotePost, PublishError> {
        let ig_user_id = self.resolve_account_id(credential).await?;
        // Validation guarantees at least one image
        let image_url = images.first().ok_or_else(|| {
            PublishError::new(
                PublishErrorKind::InvalidMedia,
                "instagram requires an image",
            )
        })?;

        let container = self
            .graph_post(
                format!("{}/{}/media", self.graph_base, ig_user_id),
                &[
                    ("image_url", image_url.as_str()),
                    ("caption", content),
                    ("access_token", credential.access_token.as_str()),
                ],
            )
            .await?;
        let creation_id = Self::extract_id(&container, "media container")?;
        debug!(creation_id, "created instagram media container");

        let published = self
            .graph_post(
                format!("{}/{}/media_publish", self.graph_base, ig_user_id),
                &[
                    ("creation_id", creation_id.as_str()),
                    ("access_token", credential.access_token.as_str()),
                ],
            )
            .await?;
        let id = Self::extract_id(&published, "media publish")?;

        let url = self.permalink(&credential.access_token, &id).await;
        Ok(RemotePost { id, url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stored_account_id_resolves_without_network() {
        // An unroutable base makes any HTTP attempt fail loudly
        let publisher =
            InstagramPublisher::with_base(reqwest::Client::new(), "http://127.0.0.1:9");
        let credential = Credential {
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_at: None,
            provider_user_id: Some("17841400000000000".to_string()),
        };

        let id = publisher.resolve_account_id(&credential).await.unwrap();
        assert_eq!(id, "17841400000000000");
    }

    #[tokio::test]
    async fn test_missing_account_id_falls_back_to_me_lookup() {
        let publisher =
            InstagramPublisher::with_base(reqwest::Client::new(), "http://127.0.0.1:9");
        let credential = Credential {
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_at: None,
            provider_user_id: None,
        };

        let err = publisher.resolve_account_id(&credential).await.unwrap_err();
        assert_eq!(err.kind, PublishErrorKind::NetworkError);
    }

    #[test]
    fn test_validate_requires_image() {
        let publisher = InstagramPublisher::new(reqwest::Client::new());
        let err = publisher.validate("caption", &[]).unwrap_err();
        assert_eq!(err.kind, PublishErrorKind::InvalidMedia);
    }

    #[test]
    fn test_extract_id() {
        let value = serde_json::json!({"id": "17841400000000000"});
        assert_eq!(
            InstagramPublisher::extract_id(&value, "media container").unwrap(),
            "17841400000000000"
        );

        let missing = serde_json::json!({"error": "nope"});
        let err = InstagramPublisher::extract_id(&missing, "media container").unwrap_err();
        assert_eq!(err.kind, PublishErrorKind::UnknownError);
    }
}
