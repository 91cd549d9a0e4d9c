// File: promobot-common/src/traits/mod.rs
//
// Interfaces for the external collaborators this layer talks to but does
// not implement: AI text generation, durable object storage, and the
// durable slots credentials are persisted into.

use async_trait::async_trait;

use crate::error::Error;
use crate::models::platform::TokenSet;

/// AI text-generation collaborator. Responses may be plain text or a JSON
/// document; callers tolerate either and fall back to deterministic string
/// construction when generation fails.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, Error>;
}

/// Where a mirrored artifact ended up.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Durable location (e.g. an s3:// URL) recorded on the asset row.
    pub location: String,
    /// Public retrieval URL, when the store issues one at upload time.
    pub retrieval_url: Option<String>,
}

/// Durable object-storage collaborator.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream the resource at `source_url` into owned storage under the
    /// given category/extension and return its new location.
    async fn store(
        &self,
        source_url: &str,
        category: &str,
        extension: &str,
    ) -> Result<StoredObject, Error>;

    /// Issue a time-limited retrieval URL for a previously stored object.
    async fn retrieval_url(&self, location: &str, ttl_seconds: u64) -> Result<String, Error>;
}

/// Durable slot for a long-lived refresh token, keyed by account label.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn load(&self, account: &str) -> Result<Option<String>, Error>;
    async fn save(&self, account: &str, refresh_token: &str) -> Result<(), Error>;
}

/// Sink for refreshed token sets. The platform layer never persists
/// credentials itself; whoever owns the account rows implements this.
#[async_trait]
pub trait TokenSink: Send + Sync {
    async fn persist(&self, platform: &str, tokens: &TokenSet) -> Result<(), Error>;
}
