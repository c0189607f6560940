//! Discord publisher (webhook delivery)
//!
//! Discord posts go through a user-configured webhook URL stored as the
//! credential's access token; there is no OAuth lifecycle and the credential
//! never expires. An image rides along as an embed, keeping message text and
//! attached media separate.

use async_trait::async_trait;
use serde_json::json;

use crate::platforms::{status_error, transport_error, Publisher};
use crate::types::{Credential, Platform, PublishError, PublishErrorKind, RemotePost};

pub const WEBHOOK_PREFIX: &str = "https://discord.com/api/webhooks/";

pub struct DiscordPublisher {
    http: reqwest::Client,
}

impl DiscordPublisher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Publisher for DiscordPublisher {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    async fn publish(
        &self,
        credential: &Credential,
        content: &str,
        images: &[String],
    ) -> Result<RemotePost, PublishError> {
        let webhook_url = &credential.access_token;
        if !webhook_url.starts_with(WEBHOOK_PREFIX) {
            return Err(PublishError::new(
                PublishErrorKind::AuthError,
                "stored discord credential is not a webhook URL; reconnect the integration",
            ));
        }

        let mut body = json!({ "content": content });
        if let Some(image_url) = images.first() {
            body["embeds"] = json!([{ "image": { "url": image_url } }]);
        }

        // wait=true makes the webhook return the created message instead of 204
        let response = self
            .http
            .post(format!("{}?wait=true", webhook_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Discord, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(Platform::Discord, status.as_u16(), &body));
        }

        let message: serde_json::Value = response
            .json()
            .await
            .map_err(|e| transport_error(Platform::Discord, e))?;
        let id = message["id"]
            .as_str()
            .ok_or_else(|| {
                PublishError::new(
                    PublishErrorKind::UnknownError,
                    "discord webhook response missing message id",
                )
            })?
            .to_string();

        // Webhook messages have no stable public URL
        Ok(RemotePost { id, url: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_webhook_credential() {
        let publisher = DiscordPublisher::new(reqwest::Client::new());
        let credential = Credential {
            access_token: "not-a-webhook-url".to_string(),
            refresh_token: None,
            expires_at: None,
            provider_user_id: None,
        };

        let err = publisher
            .publish(&credential, "hello", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind, PublishErrorKind::AuthError);
        assert!(err.message.contains("webhook"));
    }

    #[test]
    fn test_validate_enforces_discord_limit() {
        let publisher = DiscordPublisher::new(reqwest::Client::new());
        assert!(publisher.validate(&"x".repeat(4000), &[]).is_ok());

        let err = publisher.validate(&"x".repeat(4001), &[]).unwrap_err();
        assert_eq!(err.kind, PublishErrorKind::ContentTooLong);
    }
}
