// File: src/platforms/twitter/client.rs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, error};

use promobot_common::Error;
use promobot_common::models::{
    MetricsQuery, MetricsResult, Platform, PlatformConfig, PostBody, PostContent, PostResult,
    TokenSet,
};

use crate::http::{
    CredentialRefresh, HttpRequest, HttpTransport, RetryPolicy, send_with_retry,
};
use crate::platforms::SocialPlatform;
use crate::platforms::twitter::auth::{DEFAULT_API_BASE, refresh_access_token};

/// Twitter/X integration over the v2 endpoints.
pub struct TwitterPlatform {
    config: PlatformConfig,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    pending_tokens: Option<TokenSet>,
}

/// Credential hook handed to the retry engine: refreshes through the token
/// endpoint, folds the result into the config, and parks the new set for
/// the caller to persist.
struct TwitterRefresher<'a> {
    config: &'a mut PlatformConfig,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    pending: &'a mut Option<TokenSet>,
}

#[async_trait]
impl CredentialRefresh for TwitterRefresher<'_> {
    async fn refresh_credentials(&mut self) -> Result<String, Error> {
        let tokens = refresh_access_token(self.transport.as_ref(), &self.policy, self.config).await?;
        self.config.apply_tokens(&tokens);
        let access = tokens.access_token.expose().to_string();
        *self.pending = Some(tokens);
        Ok(access)
    }
}

fn format_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn metrics_map(raw: &serde_json::Value) -> HashMap<String, serde_json::Value> {
    raw.as_object()
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

impl TwitterPlatform {
    pub fn new(mut config: PlatformConfig, transport: Arc<dyn HttpTransport>) -> Self {
        if config.api_base_url.is_none() {
            config.api_base_url = Some(DEFAULT_API_BASE.to_string());
        }
        let policy = RetryPolicy::default();
        Self {
            config,
            transport,
            policy,
            pending_tokens: None,
        }
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    fn api_base(&self) -> String {
        self.config
            .api_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
    }

    fn access_token(&self, purpose: &str) -> Result<String, Error> {
        self.config
            .access_token
            .as_ref()
            .map(|t| t.expose().to_string())
            .ok_or_else(|| Error::Auth(format!("Missing access_token for {purpose}")))
    }

    async fn send(&mut self, request: HttpRequest, expected: &[u16]) -> Result<crate::http::HttpResponse, Error> {
        let policy = RetryPolicy {
            expected_statuses: expected.to_vec(),
            ..self.policy.clone()
        };
        let mut refresher = TwitterRefresher {
            config: &mut self.config,
            transport: Arc::clone(&self.transport),
            policy: RetryPolicy::expecting(&[200]),
            pending: &mut self.pending_tokens,
        };
        send_with_retry(self.transport.as_ref(), &policy, request, &mut refresher).await
    }
}

#[async_trait]
impl SocialPlatform for TwitterPlatform {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    fn token_expired(&self) -> bool {
        self.config.is_token_expired()
    }

    async fn authenticate(&mut self) -> Result<Option<TokenSet>, Error> {
        if self.config.refresh_token.is_some() && self.config.is_token_expired() {
            let tokens =
                refresh_access_token(self.transport.as_ref(), &RetryPolicy::expecting(&[200]), &self.config)
                    .await?;
            self.config.apply_tokens(&tokens);
            return Ok(Some(tokens));
        }
        if self.config.access_token.is_none() {
            return Err(Error::Auth(
                "No access token present. Complete the authorization-code flow first.".into(),
            ));
        }
        Ok(None)
    }

    async fn post_content(&mut self, content: PostContent) -> Result<PostResult, Error> {
        let text = match content.body {
            PostBody::Plain(text) => text,
            PostBody::Submission(_) => {
                return Err(Error::Validation(
                    "twitter takes plain text; structured submissions are a reddit shape".into(),
                ));
            }
        };
        if !content.media_urls.is_empty() {
            return Err(Error::Validation("media posting not supported yet".into()));
        }
        if content.scheduled_for.is_some() {
            return Err(Error::Validation(
                "scheduled posting not supported; pass None for scheduled_for".into(),
            ));
        }
        let token = self.access_token("posting")?;

        let url = format!("{}/2/tweets", self.api_base());
        let request = HttpRequest::post(url)
            .bearer(token)
            .json(serde_json::json!({ "text": text }))
            .timeout(self.config.default_timeout);

        let response = self.send(request, &[201, 200]).await?;
        let data = response.json_value()?;
        let tweet_id = data
            .pointer("/data/id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                error!("unexpected tweet create response: {data}");
                Error::Api(format!("Unexpected tweet create response: {data}"))
            })?;

        debug!("posted tweet {tweet_id}");
        Ok(PostResult {
            platform: self.config.platform_name.clone(),
            post_id: tweet_id.clone(),
            url: Some(format!("https://twitter.com/i/web/status/{tweet_id}")),
            created_at: Utc::now(),
            raw_response: Some(data),
        })
    }

    async fn fetch_metrics(&mut self, query: MetricsQuery) -> Result<Vec<MetricsResult>, Error> {
        let token = self.access_token("metrics")?;
        let base = self.api_base();
        let mut results = Vec::new();

        if let Some(post_id) = &query.post_id {
            let request = HttpRequest::get(format!("{base}/2/tweets/{post_id}"))
                .query_param("tweet.fields", "public_metrics,created_at")
                .bearer(token)
                .timeout(self.config.default_timeout);
            let response = self.send(request, &[200]).await?;
            let payload = response.json_value()?;
            let metrics = payload
                .pointer("/data/public_metrics")
                .cloned()
                .unwrap_or_default();
            results.push(MetricsResult {
                platform: self.config.platform_name.clone(),
                post_id: Some(post_id.clone()),
                metrics: metrics_map(&metrics),
                fetched_at: Utc::now(),
                raw_response: Some(payload),
            });
            return Ok(results);
        }

        // Account-level: resolve the user id, then walk recent tweets.
        let me_request = HttpRequest::get(format!("{base}/2/users/me"))
            .bearer(token.clone())
            .timeout(self.config.default_timeout);
        let me = self.send(me_request, &[200]).await?.json_value()?;
        let user_id = me
            .pointer("/data/id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Api(format!("Could not determine user id: {me}")))?;

        let mut request = HttpRequest::get(format!("{base}/2/users/{user_id}/tweets"))
            .query_param("max_results", "100")
            .query_param("tweet.fields", "public_metrics,created_at")
            .bearer(token)
            .timeout(self.config.default_timeout);
        if let Some(since) = query.since {
            request = request.query_param("start_time", format_rfc3339(since));
        }
        if let Some(until) = query.until {
            request = request.query_param("end_time", format_rfc3339(until));
        }

        let payload = self.send(request, &[200]).await?.json_value()?;
        if let Some(items) = payload.get("data").and_then(|v| v.as_array()) {
            for item in items {
                let metrics = item.get("public_metrics").cloned().unwrap_or_default();
                results.push(MetricsResult {
                    platform: self.config.platform_name.clone(),
                    post_id: item.get("id").and_then(|v| v.as_str()).map(str::to_string),
                    metrics: metrics_map(&metrics),
                    fetched_at: Utc::now(),
                    raw_response: Some(item.clone()),
                });
            }
        }
        Ok(results)
    }

    async fn test_connection(&mut self) -> bool {
        let Ok(token) = self.access_token("connection test") else {
            return false;
        };
        let request = HttpRequest::get(format!("{}/2/users/me", self.api_base()))
            .bearer(token)
            .timeout(self.config.default_timeout);
        match self.send(request, &[200]).await {
            Ok(_) => true,
            Err(e) => {
                debug!("twitter connection test failed: {e}");
                false
            }
        }
    }

    fn take_token_update(&mut self) -> Option<TokenSet> {
        self.pending_tokens.take()
    }
}
