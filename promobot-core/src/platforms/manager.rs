// File: src/platforms/manager.rs
//
// Registry of configured platform accounts, keyed by platform name. The
// platform set is sealed: construction goes through the Platform enum, so
// an unknown name fails validation before anything is instantiated.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use promobot_common::Error;
use promobot_common::models::{
    MetricsQuery, MetricsResult, Platform, PlatformConfig, PostContent, PostResult,
};
use promobot_common::traits::{RefreshTokenStore, TokenSink};

use crate::http::HttpTransport;
use crate::platforms::SocialPlatform;
use crate::platforms::reddit::RedditPlatform;
use crate::platforms::twitter::TwitterPlatform;

pub struct PlatformManager {
    transport: Arc<dyn HttpTransport>,
    platforms: HashMap<String, Box<dyn SocialPlatform>>,
    token_store: Option<Arc<dyn RefreshTokenStore>>,
    token_sink: Option<Arc<dyn TokenSink>>,
}

impl PlatformManager {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            platforms: HashMap::new(),
            token_store: None,
            token_sink: None,
        }
    }

    pub fn with_token_store(mut self, store: Arc<dyn RefreshTokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Every token set produced by a refresh is pushed through the sink so
    /// the owning rows stay current.
    pub fn with_token_sink(mut self, sink: Arc<dyn TokenSink>) -> Self {
        self.token_sink = Some(sink);
        self
    }

    /// Configure an account. The platform name must parse into the sealed
    /// platform set.
    pub fn add_account(&mut self, config: PlatformConfig) -> Result<(), Error> {
        let platform: Platform = config
            .platform_name
            .parse()
            .map_err(Error::Validation)?;

        let instance: Box<dyn SocialPlatform> = match platform {
            Platform::Twitter => Box::new(TwitterPlatform::new(
                config,
                Arc::clone(&self.transport),
            )),
            Platform::Reddit => Box::new(RedditPlatform::new(
                config,
                Arc::clone(&self.transport),
                self.token_store.clone(),
            )),
        };
        debug!("registered platform account for {platform}");
        self.platforms.insert(platform.to_string(), instance);
        Ok(())
    }

    pub fn is_configured(&self, platform_name: &str) -> bool {
        self.platforms.contains_key(&platform_name.to_lowercase())
    }

    fn get_mut(&mut self, platform_name: &str) -> Result<&mut Box<dyn SocialPlatform>, Error> {
        self.platforms
            .get_mut(&platform_name.to_lowercase())
            .ok_or_else(|| {
                Error::Validation(format!(
                    "No configured account for platform: {platform_name}"
                ))
            })
    }

    async fn drain_tokens(&mut self, platform_name: &str) -> Result<(), Error> {
        let Some(sink) = self.token_sink.clone() else {
            return Ok(());
        };
        let key = platform_name.to_lowercase();
        if let Some(platform) = self.platforms.get_mut(&key) {
            if let Some(tokens) = platform.take_token_update() {
                sink.persist(&key, &tokens).await?;
            }
        }
        Ok(())
    }

    /// Publish content, refreshing expired credentials first. Any token
    /// set produced along the way is persisted through the sink.
    pub async fn post(
        &mut self,
        platform_name: &str,
        content: PostContent,
    ) -> Result<PostResult, Error> {
        let sink = self.token_sink.clone();
        let platform = self.get_mut(platform_name)?;
        if platform.token_expired() {
            if let Some(tokens) = platform.authenticate().await? {
                if let Some(sink) = &sink {
                    sink.persist(&platform_name.to_lowercase(), &tokens).await?;
                }
            }
        }
        let result = platform.post_content(content).await;
        self.drain_tokens(platform_name).await?;
        result
    }

    pub async fn fetch_metrics(
        &mut self,
        platform_name: &str,
        query: MetricsQuery,
    ) -> Result<Vec<MetricsResult>, Error> {
        let sink = self.token_sink.clone();
        let platform = self.get_mut(platform_name)?;
        if platform.token_expired() {
            if let Some(tokens) = platform.authenticate().await? {
                if let Some(sink) = &sink {
                    sink.persist(&platform_name.to_lowercase(), &tokens).await?;
                }
            }
        }
        let result = platform.fetch_metrics(query).await;
        self.drain_tokens(platform_name).await?;
        result
    }

    /// Health check; unknown or unconfigured platforms report false.
    pub async fn test_connection(&mut self, platform_name: &str) -> bool {
        match self.get_mut(platform_name) {
            Ok(platform) => platform.test_connection().await,
            Err(_) => false,
        }
    }
}
