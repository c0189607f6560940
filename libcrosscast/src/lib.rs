//! Crosscast - publish once, post everywhere
//!
//! This library provides the core of a multi-platform publishing pipeline:
//! encrypted OAuth credential storage, token refresh with an expiry buffer,
//! concurrent fan-out to platform publishers with per-platform failure
//! isolation, and bounded retry of the failed subset.

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod logging;
pub mod oauth;
pub mod platforms;
pub mod publish;
pub mod retry;
pub mod token_store;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use crypto::TokenCipher;
pub use db::Database;
pub use error::{CrosscastError, Result};
pub use oauth::{HttpTokenEndpoint, TokenRefreshManager};
pub use publish::{Orchestrator, PublishService};
pub use retry::RetryController;
pub use token_store::TokenStore;
pub use types::{Credential, Platform, Post, PostStatus, PublishResult};

/// Build the shared HTTP client with the explicit per-call timeout.
pub fn http_client(timeout_secs: u64) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
}
