// File: src/platforms/reddit/client.rs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::debug;

use promobot_common::Error;
use promobot_common::models::{
    MetricsQuery, MetricsResult, Platform, PlatformConfig, PostBody, PostContent, PostResult,
    RedditSubmission, SubmissionKind, TokenSet,
};
use promobot_common::traits::RefreshTokenStore;

use crate::http::{
    CredentialRefresh, HttpRequest, HttpResponse, HttpTransport, RetryPolicy, send_with_retry,
};
use crate::platforms::SocialPlatform;
use crate::platforms::reddit::auth::{
    DEFAULT_API_BASE, RedditAuthFlow, exchange_refresh_token, user_agent,
};

/// Reddit integration over the OAuth API, authenticated purely through a
/// long-lived refresh token.
pub struct RedditPlatform {
    config: PlatformConfig,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    token_store: Option<Arc<dyn RefreshTokenStore>>,
    /// Key into the refresh-token store; extra["account"] or "default".
    account: String,
    pending_tokens: Option<TokenSet>,
}

struct RedditRefresher<'a> {
    config: &'a mut PlatformConfig,
    transport: Arc<dyn HttpTransport>,
    pending: &'a mut Option<TokenSet>,
}

#[async_trait]
impl CredentialRefresh for RedditRefresher<'_> {
    async fn refresh_credentials(&mut self) -> Result<String, Error> {
        let tokens = exchange_refresh_token(
            self.transport.as_ref(),
            &RetryPolicy::expecting(&[200]),
            self.config,
        )
        .await?;
        self.config.apply_tokens(&tokens);
        let access = tokens.access_token.expose().to_string();
        *self.pending = Some(tokens);
        Ok(access)
    }
}

/// First error tuple out of an api_type=json response body, if any.
fn first_api_error(payload: &Value) -> Option<(String, String)> {
    let errors = payload.pointer("/json/errors")?.as_array()?;
    let first = errors.first()?.as_array()?;
    let code = first.first()?.as_str()?.to_string();
    let message = first
        .get(1)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Some((code, message))
}

impl RedditPlatform {
    pub fn new(
        mut config: PlatformConfig,
        transport: Arc<dyn HttpTransport>,
        token_store: Option<Arc<dyn RefreshTokenStore>>,
    ) -> Self {
        if config.api_base_url.is_none() {
            config.api_base_url = Some(DEFAULT_API_BASE.to_string());
        }
        let account = config
            .extra
            .get("account")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        Self {
            config,
            transport,
            policy: RetryPolicy::default(),
            token_store,
            account,
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

    /// Finish the authorization flow: exchange the callback code, persist
    /// the refresh token into the durable slot, and adopt the tokens.
    pub async fn complete_authorization(&mut self, code: &str) -> Result<TokenSet, Error> {
        let flow = RedditAuthFlow::new(Arc::clone(&self.transport));
        let tokens = flow.exchange_code(&self.config, code, None).await?;
        if let (Some(store), Some(refresh)) = (&self.token_store, &tokens.refresh_token) {
            store.save(&self.account, refresh.expose()).await?;
        }
        self.config.apply_tokens(&tokens);
        Ok(tokens)
    }

    async fn send(
        &mut self,
        request: HttpRequest,
        expected: &[u16],
    ) -> Result<HttpResponse, Error> {
        let policy = RetryPolicy {
            expected_statuses: expected.to_vec(),
            ..self.policy.clone()
        };
        let mut refresher = RedditRefresher {
            config: &mut self.config,
            transport: Arc::clone(&self.transport),
            pending: &mut self.pending_tokens,
        };
        send_with_retry(self.transport.as_ref(), &policy, request, &mut refresher).await
    }

    async fn ensure_session(&mut self) -> Result<(), Error> {
        if self.config.access_token.is_none() || self.config.is_token_expired() {
            self.authenticate().await?;
        }
        Ok(())
    }

    fn bearer_request(&self, request: HttpRequest) -> Result<HttpRequest, Error> {
        let token = self
            .config
            .access_token
            .as_ref()
            .ok_or_else(|| Error::Auth("No Reddit session; call authenticate first".into()))?;
        Ok(request
            .bearer(token.expose())
            .header("User-Agent", user_agent(&self.config))
            .timeout(self.config.default_timeout))
    }

    async fn submit(&mut self, submission: &RedditSubmission) -> Result<PostResult, Error> {
        let mut form = vec![
            ("sr".to_string(), submission.subreddit.clone()),
            ("title".to_string(), submission.title.clone()),
            ("api_type".to_string(), "json".to_string()),
        ];
        match &submission.kind {
            SubmissionKind::Text(text) => {
                form.push(("kind".to_string(), "self".to_string()));
                form.push(("text".to_string(), text.clone()));
            }
            SubmissionKind::Link(url) => {
                form.push(("kind".to_string(), "link".to_string()));
                form.push(("url".to_string(), url.clone()));
            }
        }

        let request = self
            .bearer_request(HttpRequest::post(format!("{}/api/submit", self.api_base())))?
            .form(form);
        let response = self.send(request, &[200]).await?;
        let payload = response.json_value()?;

        if let Some((code, message)) = first_api_error(&payload) {
            return Err(match code.as_str() {
                "SUBREDDIT_NOEXIST" => Error::Validation(format!(
                    "Subreddit r/{} not found",
                    submission.subreddit
                )),
                "SUBREDDIT_NOTALLOWED" | "NOT_AUTHOR" | "USER_BLOCKED" => Error::Authorization(
                    format!("Not allowed to post in r/{}: {message}", submission.subreddit),
                ),
                _ => Error::Api(format!("Failed to submit post: {code}: {message}")),
            });
        }

        let data = payload.pointer("/json/data").cloned().unwrap_or(Value::Null);
        let post_id = data
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Api(format!("Unexpected submit response: {payload}")))?;
        let url = data
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "https://www.reddit.com/r/{}/comments/{}/",
                    submission.subreddit, post_id
                )
            });

        debug!("submitted reddit post {post_id} to r/{}", submission.subreddit);
        Ok(PostResult {
            platform: self.config.platform_name.clone(),
            post_id,
            url: Some(url),
            created_at: Utc::now(),
            raw_response: Some(payload),
        })
    }

    /// Reply under a post (`t3_*`) or comment (`t1_*`) fullname.
    pub async fn reply(&mut self, parent_fullname: &str, body: &str) -> Result<Value, Error> {
        if !parent_fullname.starts_with("t3_") && !parent_fullname.starts_with("t1_") {
            return Err(Error::Validation(format!(
                "parent fullname must start with t3_ (post) or t1_ (comment), got '{parent_fullname}'"
            )));
        }
        self.ensure_session().await?;

        let request = self
            .bearer_request(HttpRequest::post(format!("{}/api/comment", self.api_base())))?
            .form(vec![
                ("thing_id".to_string(), parent_fullname.to_string()),
                ("text".to_string(), body.to_string()),
                ("api_type".to_string(), "json".to_string()),
            ]);
        let response = self.send(request, &[200]).await?;
        let payload = response.json_value()?;

        if let Some((code, message)) = first_api_error(&payload) {
            return Err(match code.as_str() {
                "DELETED_COMMENT" | "DELETED_LINK" | "NO_THING_ID" => {
                    Error::Validation(format!("Reply target {parent_fullname} not found"))
                }
                "THREAD_LOCKED" | "SUBREDDIT_NOTALLOWED" => Error::Authorization(format!(
                    "Not allowed to reply to {parent_fullname}: {message}"
                )),
                _ => Error::Api(format!("Failed to reply: {code}: {message}")),
            });
        }

        let thing = payload
            .pointer("/json/data/things/0/data")
            .cloned()
            .ok_or_else(|| Error::Api(format!("Unexpected comment response: {payload}")))?;
        Ok(json!({
            "id": thing.get("id").cloned().unwrap_or(Value::Null),
            "fullname": thing.get("name").cloned().unwrap_or(Value::Null),
            "permalink": thing.get("permalink").cloned().unwrap_or(Value::Null),
            "body": thing.get("body").cloned().unwrap_or(Value::Null),
        }))
    }

    pub async fn reply_to_post(&mut self, post_id: &str, body: &str) -> Result<Value, Error> {
        let fullname = if post_id.starts_with("t3_") {
            post_id.to_string()
        } else {
            format!("t3_{post_id}")
        };
        self.reply(&fullname, body).await
    }

    pub async fn reply_to_comment(&mut self, comment_id: &str, body: &str) -> Result<Value, Error> {
        let fullname = if comment_id.starts_with("t1_") {
            comment_id.to_string()
        } else {
            format!("t1_{comment_id}")
        };
        self.reply(&fullname, body).await
    }

    /// Current listing of a subreddit. `sort` is one of hot/new/top/rising.
    pub async fn list_posts(
        &mut self,
        subreddit: &str,
        sort: &str,
        limit: u32,
    ) -> Result<Vec<Value>, Error> {
        if !matches!(sort, "hot" | "new" | "top" | "rising") {
            return Err(Error::Validation(format!(
                "Invalid sort option: {sort}. Use hot, new, top, or rising"
            )));
        }
        self.ensure_session().await?;

        let request = self
            .bearer_request(HttpRequest::get(format!(
                "{}/r/{subreddit}/{sort}",
                self.api_base()
            )))?
            .query_param("limit", limit.to_string());
        let response = self.send(request, &[200]).await?;
        let payload = response.json_value()?;

        let children = payload
            .pointer("/data/children")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::with_capacity(children.len());
        for child in children {
            let Some(post) = child.get("data") else {
                continue;
            };
            let is_self = post.get("is_self").and_then(|v| v.as_bool()).unwrap_or(false);
            results.push(json!({
                "id": post.get("id").cloned().unwrap_or(Value::Null),
                "fullname": post.get("name").cloned().unwrap_or(Value::Null),
                "title": post.get("title").cloned().unwrap_or(Value::Null),
                "author": post.get("author").cloned().unwrap_or(Value::Null),
                "subreddit": post.get("subreddit").cloned().unwrap_or(Value::Null),
                "score": post.get("score").cloned().unwrap_or(Value::Null),
                "num_comments": post.get("num_comments").cloned().unwrap_or(Value::Null),
                "created_utc": post.get("created_utc").cloned().unwrap_or(Value::Null),
                "is_self": is_self,
                "url": if is_self { Value::Null } else { post.get("url").cloned().unwrap_or(Value::Null) },
                "selftext": if is_self { post.get("selftext").cloned().unwrap_or(Value::Null) } else { Value::Null },
            }));
        }
        Ok(results)
    }
}

#[async_trait]
impl SocialPlatform for RedditPlatform {
    fn platform(&self) -> Platform {
        Platform::Reddit
    }

    fn token_expired(&self) -> bool {
        self.config.access_token.is_none() || self.config.is_token_expired()
    }

    async fn authenticate(&mut self) -> Result<Option<TokenSet>, Error> {
        // Fall back to the durable slot when the in-memory config has no
        // refresh token.
        if self.config.refresh_token.is_none() {
            if let Some(store) = &self.token_store {
                if let Some(stored) = store.load(&self.account).await? {
                    self.config.refresh_token = Some(stored.into());
                }
            }
        }
        if self.config.refresh_token.is_none() {
            return Err(Error::Auth(
                "No Reddit refresh token available. Authorize the account first via the \
                 authorization URL flow."
                    .into(),
            ));
        }

        let tokens = exchange_refresh_token(
            self.transport.as_ref(),
            &RetryPolicy::expecting(&[200]),
            &self.config,
        )
        .await?;
        self.config.apply_tokens(&tokens);

        // Lightweight identity probe validates the session before use.
        let probe = self
            .bearer_request(HttpRequest::get(format!("{}/api/v1/me", self.api_base())))?;
        let response = send_with_retry(
            self.transport.as_ref(),
            &RetryPolicy::expecting(&[200, 401, 403]),
            probe,
            &mut crate::http::NoRefresh,
        )
        .await?;
        match response.status {
            200 => {}
            401 => {
                return Err(Error::Auth(
                    "Invalid Reddit credentials or expired token".into(),
                ));
            }
            403 => return Err(Error::Authorization("Reddit authorization failed".into())),
            other => {
                return Err(Error::Api(format!(
                    "Unexpected status {other} from identity probe"
                )));
            }
        }

        Ok(Some(tokens))
    }

    async fn post_content(&mut self, content: PostContent) -> Result<PostResult, Error> {
        if content.scheduled_for.is_some() {
            return Err(Error::Validation(
                "Reddit does not support scheduled posts via API".into(),
            ));
        }
        if !content.media_urls.is_empty() {
            return Err(Error::Validation(
                "Media uploads not yet implemented for Reddit".into(),
            ));
        }
        let submission = match content.body {
            PostBody::Submission(submission) => submission,
            PostBody::Plain(_) => {
                return Err(Error::Validation(
                    "reddit takes a structured submission (subreddit, title, text or url)".into(),
                ));
            }
        };
        self.ensure_session().await?;
        self.submit(&submission).await
    }

    async fn fetch_metrics(&mut self, query: MetricsQuery) -> Result<Vec<MetricsResult>, Error> {
        let Some(post_id) = &query.post_id else {
            // Reddit exposes only current counters, not a history window.
            return Err(Error::Validation(
                "Reddit does not support fetching metrics by time range".into(),
            ));
        };
        self.ensure_session().await?;

        let fullname = if post_id.starts_with("t3_") {
            post_id.clone()
        } else {
            format!("t3_{post_id}")
        };
        let request = self
            .bearer_request(HttpRequest::get(format!("{}/api/info", self.api_base())))?
            .query_param("id", &fullname);
        let response = self.send(request, &[200]).await?;
        let payload = response.json_value()?;

        let post = payload
            .pointer("/data/children/0/data")
            .cloned()
            .ok_or_else(|| {
                Error::Api(format!("Failed to fetch metrics for post {post_id}: not found"))
            })?;

        let mut metrics = HashMap::new();
        for key in [
            "score",
            "upvote_ratio",
            "num_comments",
            "num_crossposts",
            "total_awards_received",
        ] {
            if let Some(value) = post.get(key) {
                metrics.insert(key.to_string(), value.clone());
            }
        }

        Ok(vec![MetricsResult {
            platform: self.config.platform_name.clone(),
            post_id: Some(post_id.clone()),
            metrics,
            fetched_at: Utc::now(),
            raw_response: Some(post),
        }])
    }

    async fn test_connection(&mut self) -> bool {
        match self.authenticate().await {
            Ok(_) => true,
            Err(e) => {
                debug!("reddit connection test failed: {e}");
                false
            }
        }
    }

    fn take_token_update(&mut self) -> Option<TokenSet> {
        self.pending_tokens.take()
    }
}
