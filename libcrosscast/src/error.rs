//! Error types for Crosscast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrosscastError>;

#[derive(Error, Debug)]
pub enum CrosscastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Retry error: {0}")]
    Retry(#[from] RetryError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CrosscastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CrosscastError::InvalidInput(_) => 3,
            CrosscastError::Credential(CredentialError::ReauthorizationRequired(_)) => 2,
            CrosscastError::Credential(CredentialError::DecryptionFailed) => 2,
            CrosscastError::Credential(_) => 1,
            CrosscastError::Config(_) => 1,
            CrosscastError::Database(_) => 1,
            CrosscastError::Retry(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Reauthorization required: {0}")]
    ReauthorizationRequired(String),

    #[error("Token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("Network error reaching token endpoint: {0}")]
    Network(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: wrong or rotated encryption passphrase")]
    DecryptionFailed,

    #[error("Encryption master key must be at least 16 characters")]
    WeakKey,

    #[error("No OAuth app configured for platform: {0}")]
    ProviderNotConfigured(String),
}

impl CredentialError {
    /// Permanent failures require the user to reauthorize; retrying is pointless.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, CredentialError::Network(_))
    }
}

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Post not found: {0}")]
    PostNotFound(String),

    #[error("Post is not retryable (status: {status})")]
    NotRetryable { status: String },

    #[error("Max retries exceeded ({retry_count}/{max_retries})")]
    MaxRetriesExceeded { retry_count: u32, max_retries: u32 },

    #[error("Nothing to retry: no failed platforms in result map")]
    NothingToRetry,
}
