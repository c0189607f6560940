//! Twitter publisher (v2 tweets API)
//!
//! An optional image is uploaded to the v1.1 media endpoint first; the
//! returned media id is attached to the tweet body. The access token must
//! have been issued through the PKCE authorization flow with tweet.write
//! scope.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::platforms::{fetch_image, status_error, transport_error, Publisher};
use crate::types::{Credential, Platform, PublishError, PublishErrorKind, RemotePost};

const TWEETS_URL: &str = "https://api.twitter.com/2/tweets";
const MEDIA_UPLOAD_URL: &str = "https://upload.twitter.com/1.1/media/upload.json";

pub struct TwitterPublisher {
    http: reqwest::Client,
}

impl TwitterPublisher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn upload_media(
        &self,
        access_token: &str,
        image_url: &str,
    ) -> Result<String, PublishError> {
        let bytes = fetch_image(&self.http, Platform::Twitter, image_url).await?;

        let part = reqwest::multipart::Part::bytes(bytes).file_name("image");
        let form = reqwest::multipart::Form::new().part("media", part);

        let response = self
            .http
            .post(MEDIA_UPLOAD_URL)
            .bearer_auth(access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Twitter, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(Platform::Twitter, status.as_u16(), &body));
        }

        let uploaded: serde_json::Value = response
            .json()
            .await
            .map_err(|e| transport_error(Platform::Twitter, e))?;
        let media_id = uploaded["media_id_string"]
            .as_str()
            .ok_or_else(|| {
                PublishError::new(
                    PublishErrorKind::InvalidMedia,
                    "twitter media upload response missing media_id_string",
                )
            })?
            .to_string();

        debug!(media_id, "uploaded twitter media");
        Ok(media_id)
    }
}

#[async_trait]
impl Publisher for TwitterPublisher {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    async fn publish(
        &self,
        credential: &Credential,
        content: &str,
        images: &[String],
    ) -> Result<RemotePost, PublishError> {
        let mut body = json!({ "text": content });

        if let Some(image_url) = images.first() {
            let media_id = self
                .upload_media(&credential.access_token, image_url)
                .await?;
            body["media"] = json!({ "media_ids": [media_id] });
        }

        let response = self
            .http
            .post(TWEETS_URL)
            .bearer_auth(&credential.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Twitter, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(Platform::Twitter, status.as_u16(), &body));
        }

        let created: serde_json::Value = response
            .json()
            .await
            .map_err(|e| transport_error(Platform::Twitter, e))?;
        let id = created["data"]["id"]
            .as_str()
            .ok_or_else(|| {
                PublishError::new(
                    PublishErrorKind::UnknownError,
                    "twitter tweets response missing data.id",
                )
            })?
            .to_string();

        let url = Some(format!("https://twitter.com/i/web/status/{}", id));
        Ok(RemotePost { id, url })
    }
}
