// File: src/platforms/mod.rs

use async_trait::async_trait;

use promobot_common::Error;
use promobot_common::models::{
    MetricsQuery, MetricsResult, Platform, PostContent, PostResult, TokenSet,
};

/// Capability set every social platform implements.
///
/// `authenticate` acquires or refreshes credentials, returning the new
/// token set when a refresh happened so the caller can persist it.
/// `test_connection` never fails; it reports a boolean health signal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SocialPlatform: Send {
    fn platform(&self) -> Platform;

    /// Whether a pre-request credential refresh is due.
    fn token_expired(&self) -> bool;

    async fn authenticate(&mut self) -> Result<Option<TokenSet>, Error>;

    async fn post_content(&mut self, content: PostContent) -> Result<PostResult, Error>;

    async fn fetch_metrics(&mut self, query: MetricsQuery) -> Result<Vec<MetricsResult>, Error>;

    async fn test_connection(&mut self) -> bool;

    /// Drain the token set produced by the most recent implicit refresh
    /// (one that happened inside a request), if any.
    fn take_token_update(&mut self) -> Option<TokenSet>;
}

// Re-export submodules
pub mod heygen;
pub mod manager;
pub mod reddit;
pub mod twitter;
