// File: promobot-common/src/models/platform.rs

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::secret::Secret;

/// The set of social platforms this layer knows how to drive.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Reddit,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Twitter => write!(f, "twitter"),
            Platform::Reddit => write!(f, "reddit"),
        }
    }
}

impl FromStr for Platform {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "twitter" | "x" => Ok(Platform::Twitter),
            "reddit" => Ok(Platform::Reddit),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}

/// Per-account configuration a platform implementation operates on.
///
/// Owned by the caller. A platform only ever writes the token fields, and
/// only as the result of a refresh; the same values are handed back as a
/// [`TokenSet`] so the caller can persist them.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub platform_name: String,
    pub api_base_url: Option<String>,

    pub client_id: Option<String>,
    pub client_secret: Option<Secret>,

    pub access_token: Option<Secret>,
    pub refresh_token: Option<Secret>,
    pub token_expires_at: Option<DateTime<Utc>>,

    pub rate_limit_per_minute: u32,
    pub default_timeout: Duration,
    pub webhook_url: Option<String>,

    /// Free-form extras per platform (user agent, redirect URI, ...).
    pub extra: HashMap<String, String>,
}

/// Margin under which a token is treated as already expired, so a refresh
/// happens before the request rather than racing the provider clock.
const EXPIRY_SKEW_SECONDS: i64 = 60;

impl PlatformConfig {
    pub fn new(platform_name: &str) -> Self {
        Self {
            platform_name: platform_name.to_lowercase(),
            api_base_url: None,
            client_id: None,
            client_secret: None,
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
            rate_limit_per_minute: 60,
            default_timeout: Duration::from_secs(15),
            webhook_url: None,
            extra: HashMap::new(),
        }
    }

    /// Resolve a configuration from `{PREFIX}_*` environment variables.
    ///
    /// Recognized: CLIENT_ID, CLIENT_SECRET, ACCESS_TOKEN, REFRESH_TOKEN,
    /// API_BASE_URL, WEBHOOK_URL, RATE_LIMIT_PER_MINUTE,
    /// DEFAULT_TIMEOUT_SECONDS. The prefix defaults to the upper-cased
    /// platform name.
    pub fn from_env(platform_name: &str, prefix: Option<&str>) -> Self {
        let key_prefix = prefix
            .map(str::to_uppercase)
            .unwrap_or_else(|| platform_name.to_uppercase());
        let env = |name: &str| std::env::var(format!("{key_prefix}_{name}")).ok();

        let mut cfg = Self::new(platform_name);
        cfg.api_base_url = env("API_BASE_URL");
        cfg.client_id = env("CLIENT_ID");
        cfg.client_secret = env("CLIENT_SECRET").map(Secret::from);
        cfg.access_token = env("ACCESS_TOKEN").map(Secret::from);
        cfg.refresh_token = env("REFRESH_TOKEN").map(Secret::from);
        cfg.webhook_url = env("WEBHOOK_URL");
        if let Some(limit) = env("RATE_LIMIT_PER_MINUTE").and_then(|v| v.parse().ok()) {
            cfg.rate_limit_per_minute = limit;
        }
        if let Some(secs) = env("DEFAULT_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
            cfg.default_timeout = Duration::from_secs(secs);
        }
        cfg
    }

    /// Whether the access token is expired or expires within the skew margin.
    /// A config with no recorded expiry is treated as not expired.
    pub fn is_token_expired(&self) -> bool {
        match self.token_expires_at {
            Some(expires) => Utc::now() >= expires - chrono::Duration::seconds(EXPIRY_SKEW_SECONDS),
            None => false,
        }
    }

    /// Fold a refresh result back into the config.
    pub fn apply_tokens(&mut self, tokens: &TokenSet) {
        self.access_token = Some(tokens.access_token.clone());
        if let Some(refresh) = &tokens.refresh_token {
            self.refresh_token = Some(refresh.clone());
        }
        if let Some(expires_at) = tokens.expires_at {
            self.token_expires_at = Some(expires_at);
        }
    }
}

/// The outcome of a token exchange or refresh, returned explicitly so the
/// caller can persist whichever token set the last successful refresh
/// produced.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: Secret,
    pub refresh_token: Option<Secret>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    pub fn from_expires_in(
        access_token: Secret,
        refresh_token: Option<Secret>,
        expires_in: Option<u64>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: expires_in.map(|s| Utc::now() + chrono::Duration::seconds(s as i64)),
        }
    }
}

/// A published (or scheduled) post, as reported by the provider.
#[derive(Debug, Clone, Serialize)]
pub struct PostResult {
    pub platform: String,
    pub post_id: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub raw_response: Option<Value>,
}

/// Normalized metrics for a post, or for the account when `post_id` is None.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResult {
    pub platform: String,
    pub post_id: Option<String>,
    pub metrics: HashMap<String, Value>,
    pub fetched_at: DateTime<Utc>,
    pub raw_response: Option<Value>,
}

/// What to publish. Platforms that take free text use `Plain`; Reddit takes
/// a structured submission instead of encoding subreddit/title/body into a
/// command string.
#[derive(Debug, Clone)]
pub enum PostBody {
    Plain(String),
    Submission(RedditSubmission),
}

#[derive(Debug, Clone)]
pub struct RedditSubmission {
    pub subreddit: String,
    pub title: String,
    pub kind: SubmissionKind,
}

#[derive(Debug, Clone)]
pub enum SubmissionKind {
    /// Self post with a text body.
    Text(String),
    /// Link post.
    Link(String),
}

#[derive(Debug, Clone)]
pub struct PostContent {
    pub body: PostBody,
    pub media_urls: Vec<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl PostContent {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            body: PostBody::Plain(text.into()),
            media_urls: Vec::new(),
            scheduled_for: None,
        }
    }

    pub fn submission(submission: RedditSubmission) -> Self {
        Self {
            body: PostBody::Submission(submission),
            media_urls: Vec::new(),
            scheduled_for: None,
        }
    }
}

/// Metrics window. `post_id` wins over the time range; platforms that do
/// not support a range query reject `since`/`until` with a validation error.
#[derive(Debug, Clone, Default)]
pub struct MetricsQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub post_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_round_trips_through_str() {
        assert_eq!("twitter".parse::<Platform>().unwrap(), Platform::Twitter);
        assert_eq!("X".parse::<Platform>().unwrap(), Platform::Twitter);
        assert_eq!("Reddit".parse::<Platform>().unwrap(), Platform::Reddit);
        assert!("myspace".parse::<Platform>().is_err());
        assert_eq!(Platform::Reddit.to_string(), "reddit");
    }

    #[test]
    fn platform_name_is_lowercased() {
        let cfg = PlatformConfig::new("Twitter");
        assert_eq!(cfg.platform_name, "twitter");
    }

    #[test]
    fn token_expiry_honors_skew_margin() {
        let mut cfg = PlatformConfig::new("twitter");
        assert!(!cfg.is_token_expired());

        cfg.token_expires_at = Some(Utc::now() + chrono::Duration::seconds(30));
        assert!(cfg.is_token_expired());

        cfg.token_expires_at = Some(Utc::now() + chrono::Duration::seconds(300));
        assert!(!cfg.is_token_expired());
    }

    #[test]
    fn apply_tokens_keeps_old_refresh_token_when_absent() {
        let mut cfg = PlatformConfig::new("twitter");
        cfg.refresh_token = Some(Secret::new("old-refresh"));
        cfg.apply_tokens(&TokenSet::from_expires_in(
            Secret::new("new-access"),
            None,
            Some(3600),
        ));
        assert_eq!(cfg.access_token.as_ref().unwrap().expose(), "new-access");
        assert_eq!(cfg.refresh_token.as_ref().unwrap().expose(), "old-refresh");
        assert!(cfg.token_expires_at.is_some());
    }
}
