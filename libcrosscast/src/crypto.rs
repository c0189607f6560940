//! Token encryption for the credential store
//!
//! Tokens are sealed with age passphrase encryption before they touch the
//! database. The age format is self-describing: the blob carries the scrypt
//! salt, work factor, nonce, and authentication tag alongside the ciphertext,
//! so a row can always be decrypted with nothing but the master key. Blobs
//! are base64-encoded for storage in TEXT columns.

use std::io::{Read, Write};

use base64::Engine;

use crate::error::CredentialError;

type Result<T> = std::result::Result<T, CredentialError>;

const MIN_KEY_LENGTH: usize = 16;

/// Seals and opens token blobs with a master key held in memory.
#[derive(Clone)]
pub struct TokenCipher {
    master_key: String,
}

impl TokenCipher {
    /// Create a cipher from the master key.
    ///
    /// Rejects keys shorter than 16 characters; scrypt stretching does not
    /// rescue a trivially guessable passphrase.
    pub fn new(master_key: impl Into<String>) -> Result<Self> {
        let master_key = master_key.into();
        if master_key.len() < MIN_KEY_LENGTH {
            return Err(CredentialError::WeakKey);
        }
        Ok(Self { master_key })
    }

    /// Read the master key from `CROSSCAST_MASTER_KEY`.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("CROSSCAST_MASTER_KEY").map_err(|_| {
            CredentialError::Encryption("CROSSCAST_MASTER_KEY is not set".to_string())
        })?;
        Self::new(key)
    }

    /// Encrypt a token, returning a base64 blob safe for a TEXT column.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let encryptor = age::Encryptor::with_user_passphrase(age::secrecy::Secret::new(
            self.master_key.clone(),
        ));

        let mut encrypted = vec![];
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        writer
            .write_all(plaintext.as_bytes())
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;
        writer
            .finish()
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        Ok(base64::engine::general_purpose::STANDARD.encode(encrypted))
    }

    /// Decrypt a blob produced by [`seal`](Self::seal).
    ///
    /// A wrong key or tampered blob fails the MAC check and surfaces as
    /// `DecryptionFailed`; the plaintext is never partially revealed.
    pub fn open(&self, blob: &str) -> Result<String> {
        let encrypted = base64::engine::general_purpose::STANDARD
            .decode(blob)
            .map_err(|_| CredentialError::DecryptionFailed)?;

        let decryptor = match age::Decryptor::new(&encrypted[..]) {
            Ok(age::Decryptor::Passphrase(d)) => d,
            Ok(_) => {
                return Err(CredentialError::Encryption(
                    "Invalid encryption format (expected passphrase)".to_string(),
                ))
            }
            Err(_) => return Err(CredentialError::DecryptionFailed),
        };

        let mut decrypted = vec![];
        let mut reader = decryptor
            .decrypt(&age::secrecy::Secret::new(self.master_key.clone()), None)
            .map_err(|e| {
                let message = e.to_string().to_lowercase();
                if message.contains("decryption") || message.contains("mac") {
                    CredentialError::DecryptionFailed
                } else {
                    CredentialError::Encryption(e.to_string())
                }
            })?;

        reader
            .read_to_end(&mut decrypted)
            .map_err(|_| CredentialError::DecryptionFailed)?;

        String::from_utf8(decrypted).map_err(|_| CredentialError::DecryptionFailed)
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never reveal the key, even in debug output
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}
