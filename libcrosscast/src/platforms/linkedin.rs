//! LinkedIn publisher (UGC Posts API)
//!
//! Posting with an image is a three-step dance: register an upload slot to
//! get an asset URN and upload URL, PUT the image bytes there, then create
//! the UGC post referencing the asset. Text-only posts skip straight to the
//! last step.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::platforms::{fetch_image, status_error, transport_error, Publisher};
use crate::types::{Credential, Platform, PublishError, PublishErrorKind, RemotePost};

const API_BASE: &str = "https://api.linkedin.com/v2";

pub struct LinkedInPublisher {
    http: reqwest::Client,
    api_base: String,
}

impl LinkedInPublisher {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base(http, API_BASE)
    }

    pub(crate) fn with_base(http: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
        }
    }

    /// Author URN from the stored member id, falling back to the OpenID
    /// userinfo endpoint when the credential predates id capture.
    async fn resolve_author_urn(&self, credential: &Credential) -> Result<String, PublishError> {
        if let Some(person_id) = credential.provider_user_id.as_deref() {
            return Ok(format!("urn:li:person:{}", person_id));
        }

        let response = self
            .http
            .get(format!("{}/userinfo", self.api_base))
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(|e| transport_error(Platform::LinkedIn, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(Platform::LinkedIn, status.as_u16(), &body));
        }

        let userinfo: serde_json::Value = response
            .json()
            .await
            .map_err(|e| transport_error(Platform::LinkedIn, e))?;
        let person_id = userinfo["sub"].as_str().ok_or_else(|| {
            PublishError::new(
                PublishErrorKind::AuthError,
                "linkedin userinfo response has no member id; reconnect the account",
            )
        })?;
        Ok(format!("urn:li:person:{}", person_id))
    }

    /// Register an upload slot and push the image bytes into it.
    /// Returns the asset URN to reference from the post body.
    async fn upload_image(
        &self,
        access_token: &str,
        author_urn: &str,
        image_url: &str,
    ) -> Result<String, PublishError> {
        let register_body = json!({
            "registerUploadRequest": {
                "recipes": ["urn:li:digitalmediaRecipe:feedshare-image"],
                "owner": author_urn,
                "serviceRelationships": [{
                    "relationshipType": "OWNER",
                    "identifier": "urn:li:userGeneratedContent"
                }]
            }
        });

        let response = self
            .http
            .post(format!("{}/assets?action=registerUpload", self.api_base))
            .bearer_auth(access_token)
            .json(&register_body)
            .send()
            .await
            .map_err(|e| transport_error(Platform::LinkedIn, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(Platform::LinkedIn, status.as_u16(), &body));
        }

        let registered: serde_json::Value = response
            .json()
            .await
            .map_err(|e| transport_error(Platform::LinkedIn, e))?;

        let upload_url = registered["value"]["uploadMechanism"]
            ["com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest"]["uploadUrl"]
            .as_str()
            .ok_or_else(|| {
                PublishError::new(
                    PublishErrorKind::UnknownError,
                    "linkedin registerUpload response missing uploadUrl",
                )
            })?
            .to_string();
        let asset_urn = registered["value"]["asset"]
            .as_str()
            .ok_or_else(|| {
                PublishError::new(
                    PublishErrorKind::UnknownError,
                    "linkedin registerUpload response missing asset",
                )
            })?
            .to_string();

        let bytes = fetch_image(&self.http, Platform::LinkedIn, image_url).await?;

        let upload = self
            .http
            .put(&upload_url)
            .bearer_auth(access_token)
            .body(bytes)
            .send()
            .await
            .map_err(|e| transport_error(Platform::LinkedIn, e))?;

        if !upload.status().is_success() {
            return Err(PublishError::new(
                PublishErrorKind::InvalidMedia,
                format!("linkedin image upload returned {}", upload.status()),
            ));
        }

        debug!(asset = %asset_urn, "uploaded linkedin image");
        Ok(asset_urn)
    }
}

#[async_trait]
impl Publisher for LinkedInPublisher {
    fn platform(&self) -> Platform {
        Platform::LinkedIn
    }

    async fn publish(
        &self,
        credential: &Credential,
        content: &str,
        images: &[String],
    ) -> Result<RemotePost, PublishError> {
        let author_urn = self.resolve_author_urn(credential).await?;

        let media = match images.first() {
            Some(image_url) => {
                let asset = self
                    .upload_image(&credential.access_token, &author_urn, image_url)
                    .await?;
                Some(asset)
            }
            None => None,
        };

        let share_content = match &media {
            Some(asset) => json!({
                "shareCommentary": { "text": content },
                "shareMediaCategory": "IMAGE",
                "media": [{ "status": "READY", "media": asset }]
            }),
            None => json!({
                "shareCommentary": { "text": content },
                "shareMediaCategory": "NONE"
            }),
        };

        let body = json!({
            "author": author_urn,
            "lifecycleState": "PUBLISHED",
            "specificContent": { "com.linkedin.ugc.ShareContent": share_content },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" }
        });

        let response = self
            .http
            .post(format!("{}/ugcPosts", self.api_base))
            .bearer_auth(&credential.access_token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(Platform::LinkedIn, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(Platform::LinkedIn, status.as_u16(), &body));
        }

        let created: serde_json::Value = response
            .json()
            .await
            .map_err(|e| transport_error(Platform::LinkedIn, e))?;
        let id = created["id"]
            .as_str()
            .ok_or_else(|| {
                PublishError::new(
                    PublishErrorKind::UnknownError,
                    "linkedin ugcPosts response missing id",
                )
            })?
            .to_string();

        let url = Some(format!("https://www.linkedin.com/feed/update/{}", id));
        Ok(RemotePost { id, url })
    }
}
