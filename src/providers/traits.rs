//! Collaborator trait definitions

use async_trait::async_trait;
use thiserror::Error;

use super::{UsageLimitStatus, UsageSnapshot};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Authentication rejected with status {0}")]
    Auth(u16),
    #[error("Cursor API returned status: {0}")]
    Api(u16),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// Worth one retry with a freshly read credential.
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Auth(_))
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => FetchError::Auth(status),
            _ => FetchError::Api(status),
        }
    }
}

/// Session credential for the usage API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    pub access_token: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Trait for fetching usage data
#[async_trait]
pub trait UsageFetcher: Send + Sync {
    /// Fetch premium request counts and the current invoice
    async fn fetch_usage_snapshot(&self, credential: &Credential) -> Result<UsageSnapshot, FetchError>;

    /// Fetch whether usage-based pricing is enabled and its limit
    async fn fetch_usage_limit_status(
        &self,
        credential: &Credential,
    ) -> Result<UsageLimitStatus, FetchError>;
}

/// Trait for reading the stored session credential
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Current credential, or `None` when the user is signed out
    async fn get_credential(&self) -> Option<Credential>;
}
