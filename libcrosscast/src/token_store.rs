//! Encrypted credential storage
//!
//! The token store owns the `credentials` table. Both token strings are
//! sealed with the [`TokenCipher`] before they hit the database and opened on
//! the way out; nothing above this layer ever sees a blob, nothing below it
//! ever sees a plaintext token.

use tracing::{debug, error};

use crate::crypto::TokenCipher;
use crate::db::{CredentialRow, Database};
use crate::error::Result;
use crate::types::{Credential, Platform, StoredCredential};

#[derive(Clone)]
pub struct TokenStore {
    db: Database,
    cipher: TokenCipher,
}

impl TokenStore {
    pub fn new(db: Database, cipher: TokenCipher) -> Self {
        Self { db, cipher }
    }

    /// Encrypt and upsert the credential for a (user, platform) pair.
    pub async fn store(
        &self,
        user_id: &str,
        platform: Platform,
        credential: &Credential,
    ) -> Result<()> {
        let access_token = self.cipher.seal(&credential.access_token)?;
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.seal(t))
            .transpose()?;

        self.db
            .upsert_credential(&CredentialRow {
                user_id: user_id.to_string(),
                platform,
                access_token,
                refresh_token,
                expires_at: credential.expires_at,
                provider_user_id: credential.provider_user_id.clone(),
                updated_at: 0, // assigned by the upsert
            })
            .await?;

        debug!(user_id, platform = %platform, "stored credential");
        Ok(())
    }

    /// Fetch and decrypt the credential for a (user, platform) pair.
    ///
    /// Returns `Ok(None)` when no row exists. A row that fails to decrypt
    /// (rotated master key, tampered blob) is an error, not absence; callers
    /// decide whether that means re-authorization.
    pub async fn get(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<StoredCredential>> {
        let Some(row) = self.db.get_credential(user_id, platform).await? else {
            return Ok(None);
        };

        let access_token = self.cipher.open(&row.access_token).inspect_err(|e| {
            error!(user_id, platform = %platform, %e, "credential decryption failed");
        })?;
        let refresh_token = row
            .refresh_token
            .as_deref()
            .map(|b| self.cipher.open(b))
            .transpose()?;

        Ok(Some(StoredCredential {
            credential: Credential {
                access_token,
                refresh_token,
                expires_at: row.expires_at,
                provider_user_id: row.provider_user_id,
            },
            updated_at: row.updated_at,
        }))
    }

    /// Conditionally replace token fields after a refresh.
    ///
    /// Uses the row's `updated_at` as an optimistic version: if another
    /// refresh landed since `expected_updated_at` was read, the swap is
    /// refused and this returns false.
    pub async fn swap_tokens(
        &self,
        user_id: &str,
        platform: Platform,
        credential: &Credential,
        expected_updated_at: i64,
    ) -> Result<bool> {
        let access_token = self.cipher.seal(&credential.access_token)?;
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.seal(t))
            .transpose()?;

        self.db
            .swap_credential_tokens(
                user_id,
                platform,
                &access_token,
                refresh_token.as_deref(),
                credential.expires_at,
                expected_updated_at,
            )
            .await
    }

    /// Remove the credential for a (user, platform) pair. Returns whether a
    /// row existed.
    pub async fn delete(&self, user_id: &str, platform: Platform) -> Result<bool> {
        let removed = self.db.delete_credential(user_id, platform).await?;
        if removed {
            debug!(user_id, platform = %platform, "deleted credential");
        }
        Ok(removed)
    }

    /// Platforms a user has stored credentials for.
    pub async fn connected_platforms(&self, user_id: &str) -> Result<Vec<Platform>> {
        self.db.list_connected_platforms(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CredentialError, CrosscastError};

    async fn test_store() -> TokenStore {
        let db = Database::in_memory().await.unwrap();
        let cipher = TokenCipher::new("test-master-key-for-unit-tests").unwrap();
        TokenStore::new(db, cipher)
    }

    fn test_credential() -> Credential {
        Credential {
            access_token: "plaintext-access".to_string(),
            refresh_token: Some("plaintext-refresh".to_string()),
            expires_at: Some(chrono::Utc::now().timestamp() + 3600),
            provider_user_id: Some("remote-42".to_string()),
        }
    }

    #[tokio::test]
    async fn test_store_and_get_roundtrip() {
        let store = test_store().await;

        store
            .store("user-1", Platform::Twitter, &test_credential())
            .await
            .unwrap();

        let stored = store
            .get("user-1", Platform::Twitter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.credential.access_token, "plaintext-access");
        assert_eq!(
            stored.credential.refresh_token,
            Some("plaintext-refresh".to_string())
        );
        assert_eq!(
            stored.credential.provider_user_id,
            Some("remote-42".to_string())
        );
        assert!(stored.updated_at > 0);
    }

    #[tokio::test]
    async fn test_tokens_are_encrypted_at_rest() {
        let db = Database::in_memory().await.unwrap();
        let cipher = TokenCipher::new("test-master-key-for-unit-tests").unwrap();
        let store = TokenStore::new(db.clone(), cipher);

        store
            .store("user-1", Platform::Twitter, &test_credential())
            .await
            .unwrap();

        // Read the raw row beneath the store: no plaintext token anywhere.
        let raw = db
            .get_credential("user-1", Platform::Twitter)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(raw.access_token, "plaintext-access");
        assert!(!raw.access_token.contains("plaintext"));
        assert!(!raw.refresh_token.unwrap().contains("plaintext"));
    }

    #[tokio::test]
    async fn test_get_absent_returns_none() {
        let store = test_store().await;
        let result = store.get("user-1", Platform::LinkedIn).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_get_with_wrong_master_key_fails() {
        let db = Database::in_memory().await.unwrap();
        let store = TokenStore::new(
            db.clone(),
            TokenCipher::new("first-master-key-value!").unwrap(),
        );
        store
            .store("user-1", Platform::Twitter, &test_credential())
            .await
            .unwrap();

        let rotated = TokenStore::new(
            db,
            TokenCipher::new("second-master-key-value").unwrap(),
        );
        let result = rotated.get("user-1", Platform::Twitter).await;
        assert!(matches!(
            result,
            Err(CrosscastError::Credential(CredentialError::DecryptionFailed))
        ));
    }

    #[tokio::test]
    async fn test_store_without_refresh_token() {
        let store = test_store().await;

        // Discord webhooks: access token only, no expiry
        let credential = Credential {
            access_token: "https://discord.com/api/webhooks/1/abc".to_string(),
            refresh_token: None,
            expires_at: None,
            provider_user_id: None,
        };
        store
            .store("user-1", Platform::Discord, &credential)
            .await
            .unwrap();

        let stored = store
            .get("user-1", Platform::Discord)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.credential.refresh_token.is_none());
        assert!(stored.credential.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_swap_tokens_respects_version() {
        let store = test_store().await;
        store
            .store("user-1", Platform::Twitter, &test_credential())
            .await
            .unwrap();
        let stored = store
            .get("user-1", Platform::Twitter)
            .await
            .unwrap()
            .unwrap();

        let mut new_credential = test_credential();
        new_credential.access_token = "refreshed-access".to_string();

        assert!(store
            .swap_tokens("user-1", Platform::Twitter, &new_credential, stored.updated_at)
            .await
            .unwrap());

        // A second swap against the old version is refused
        assert!(!store
            .swap_tokens("user-1", Platform::Twitter, &new_credential, stored.updated_at - 7)
            .await
            .unwrap());

        let current = store
            .get("user-1", Platform::Twitter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.credential.access_token, "refreshed-access");
    }

    #[tokio::test]
    async fn test_delete_and_connected_platforms() {
        let store = test_store().await;
        store
            .store("user-1", Platform::Twitter, &test_credential())
            .await
            .unwrap();
        store
            .store("user-1", Platform::Discord, &test_credential())
            .await
            .unwrap();

        let connected = store.connected_platforms("user-1").await.unwrap();
        assert_eq!(connected, vec![Platform::Discord, Platform::Twitter]);

        assert!(store.delete("user-1", Platform::Twitter).await.unwrap());
        assert!(!store.delete("user-1", Platform::Twitter).await.unwrap());

        let connected = store.connected_platforms("user-1").await.unwrap();
        assert_eq!(connected, vec![Platform::Discord]);
    }
}
