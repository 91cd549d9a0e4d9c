// File: src/platforms/reddit/auth.rs
//
// Reddit's OAuth flow never hands out a usable long-term access token;
// the code exchange yields a permanent refresh token which is exchanged
// for a short-lived access token on every authenticate. Both token calls
// use HTTP Basic client credentials.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use promobot_common::models::{PlatformConfig, TokenSet};
use promobot_common::{Error, Secret};

use crate::auth::generate_state_token;
use crate::http::{HttpRequest, HttpTransport, NoRefresh, RetryPolicy, send_with_retry};

pub const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";
const AUTHORIZATION_URL: &str = "https://www.reddit.com/api/v1/authorize";
const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

pub const DEFAULT_SCOPES: &[&str] = &["identity", "read", "submit"];
pub const DEFAULT_USER_AGENT: &str = "promobot:v0.1 (by /u/promobot)";

#[derive(Deserialize)]
struct RedditTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

fn client_credentials(config: &PlatformConfig) -> Result<(&str, &str), Error> {
    let id = config
        .client_id
        .as_deref()
        .ok_or_else(|| Error::Auth("Missing Reddit client_id".into()))?;
    let secret = config
        .client_secret
        .as_ref()
        .ok_or_else(|| Error::Auth("Missing Reddit client_secret".into()))?;
    Ok((id, secret.expose()))
}

fn resolve_redirect(config: &PlatformConfig, redirect_uri: Option<&str>) -> Result<String, Error> {
    redirect_uri
        .map(str::to_string)
        .or_else(|| config.extra.get("redirect_uri").cloned())
        .ok_or_else(|| Error::Validation("redirect_uri is required".into()))
}

pub fn user_agent(config: &PlatformConfig) -> String {
    config
        .extra
        .get("user_agent")
        .cloned()
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
}

pub struct RedditAuthFlow {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl RedditAuthFlow {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            policy: RetryPolicy::expecting(&[200]),
        }
    }

    /// Authorization URL for the permanent-duration grant. Returns the URL
    /// and the state token to round-trip.
    pub fn build_authorization_url(
        &self,
        config: &PlatformConfig,
        scopes: Option<&[&str]>,
        redirect_uri: Option<&str>,
    ) -> Result<(String, String), Error> {
        let (client_id, _) = client_credentials(config)?;
        let redirect = resolve_redirect(config, redirect_uri)?;
        let scope_str = scopes.unwrap_or(DEFAULT_SCOPES).join(" ");
        let state = generate_state_token();

        let url = format!(
            "{AUTHORIZATION_URL}?client_id={}&response_type=code&state={}&redirect_uri={}&duration=permanent&scope={}",
            urlencoding::encode(client_id),
            urlencoding::encode(&state),
            urlencoding::encode(&redirect),
            urlencoding::encode(&scope_str),
        );
        debug!("issued reddit authorization url for state {state}");
        Ok((url, state))
    }

    /// Exchange an authorization code for the long-lived refresh token
    /// (plus the first access token).
    pub async fn exchange_code(
        &self,
        config: &PlatformConfig,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenSet, Error> {
        let (client_id, client_secret) = client_credentials(config)?;
        let redirect = resolve_redirect(config, redirect_uri)?;

        let request = HttpRequest::post(TOKEN_URL)
            .basic(client_id, client_secret)
            .header("User-Agent", user_agent(config))
            .form(vec![
                ("grant_type".to_string(), "authorization_code".to_string()),
                ("code".to_string(), code.to_string()),
                ("redirect_uri".to_string(), redirect),
            ])
            .timeout(config.default_timeout);

        let response =
            send_with_retry(self.transport.as_ref(), &self.policy, request, &mut NoRefresh)
                .await
                .map_err(|e| match e {
                    Error::Auth(_) | Error::Authorization(_) => {
                        Error::Auth(format!("Reddit code exchange rejected: {e}"))
                    }
                    other => other,
                })?;

        let payload: RedditTokenResponse = response.json()?;
        if payload.refresh_token.is_none() {
            return Err(Error::Auth(
                "Reddit token response carried no refresh_token; request duration=permanent".into(),
            ));
        }
        Ok(TokenSet::from_expires_in(
            Secret::new(payload.access_token),
            payload.refresh_token.map(Secret::new),
            payload.expires_in,
        ))
    }
}

/// Trade the stored refresh token for a fresh access token.
pub async fn exchange_refresh_token(
    transport: &dyn HttpTransport,
    policy: &RetryPolicy,
    config: &PlatformConfig,
) -> Result<TokenSet, Error> {
    let (client_id, client_secret) = client_credentials(config)?;
    let refresh_token = config
        .refresh_token
        .as_ref()
        .ok_or_else(|| Error::Auth("No Reddit refresh token available".into()))?;

    let request = HttpRequest::post(TOKEN_URL)
        .basic(client_id, client_secret)
        .header("User-Agent", user_agent(config))
        .form(vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            (
                "refresh_token".to_string(),
                refresh_token.expose().to_string(),
            ),
        ])
        .timeout(config.default_timeout);

    let response = send_with_retry(transport, policy, request, &mut NoRefresh)
        .await
        .map_err(|e| match e {
            Error::Auth(_) | Error::Authorization(_) => {
                Error::Auth(format!("Invalid Reddit credentials or expired token: {e}"))
            }
            other => other,
        })?;

    let payload: RedditTokenResponse = response.json()?;
    debug!("reddit access token refreshed");
    Ok(TokenSet::from_expires_in(
        Secret::new(payload.access_token),
        payload.refresh_token.map(Secret::new),
        payload.expires_in,
    ))
}
