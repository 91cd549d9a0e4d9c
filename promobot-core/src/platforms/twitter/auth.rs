// File: src/platforms/twitter/auth.rs
//
// OAuth 2.0 authorization-code flow with PKCE against the X/Twitter v2
// endpoints. Confidential clients (a client secret is configured) use HTTP
// Basic credentials and omit the client id from the body; public clients
// carry the client id in the body.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use promobot_common::models::{PlatformConfig, TokenSet};
use promobot_common::{Error, Secret};

use crate::auth::{OAuthSession, OAuthSessionStore, PkcePair, generate_state_token};
use crate::http::{HttpRequest, HttpTransport, NoRefresh, RetryPolicy, send_with_retry};

pub const DEFAULT_API_BASE: &str = "https://api.twitter.com";
const AUTHORIZATION_URL: &str = "https://twitter.com/i/oauth2/authorize";
const TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
const REVOKE_URL: &str = "https://api.twitter.com/2/oauth2/revoke";

pub const DEFAULT_SCOPES: &[&str] = &["tweet.read", "tweet.write", "users.read", "offline.access"];

#[derive(Deserialize)]
struct TwitterTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

fn resolve_redirect(config: &PlatformConfig, redirect_uri: Option<&str>) -> Result<String, Error> {
    redirect_uri
        .map(str::to_string)
        .or_else(|| config.webhook_url.clone())
        .ok_or_else(|| {
            Error::Validation("redirect_uri is required (set webhook_url or pass one)".into())
        })
}

fn client_id(config: &PlatformConfig) -> Result<&str, Error> {
    config
        .client_id
        .as_deref()
        .ok_or_else(|| Error::Auth("Missing Twitter client_id".into()))
}

/// Confidential-client mode is in effect when a non-empty secret is set.
fn confidential_secret(config: &PlatformConfig) -> Option<&Secret> {
    config.client_secret.as_ref().filter(|s| !s.is_empty())
}

fn parse_token_response(response: &crate::http::HttpResponse) -> Result<TokenSet, Error> {
    let payload: TwitterTokenResponse = response.json()?;
    Ok(TokenSet::from_expires_in(
        Secret::new(payload.access_token),
        payload.refresh_token.map(Secret::new),
        payload.expires_in,
    ))
}

/// Stateless driver for the PKCE flow; pending verifier/state pairs live
/// in the injected session store.
pub struct TwitterAuthFlow {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl TwitterAuthFlow {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            policy: RetryPolicy::expecting(&[200]),
        }
    }

    /// Build the authorization URL with a fresh PKCE pair and state token,
    /// and register the pending session in `sessions`. Returns the URL and
    /// the state the redirect target must round-trip.
    pub fn build_authorization_url(
        &self,
        config: &PlatformConfig,
        sessions: &OAuthSessionStore,
        scopes: Option<&[&str]>,
        redirect_uri: Option<&str>,
    ) -> Result<(String, String), Error> {
        let client_id = client_id(config)?;
        let redirect = resolve_redirect(config, redirect_uri)?;
        let scopes = scopes.unwrap_or(DEFAULT_SCOPES);
        let scope_str = scopes.join(" ");

        let pkce = PkcePair::generate();
        let state = generate_state_token();

        let url = format!(
            "{AUTHORIZATION_URL}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
            urlencoding::encode(client_id),
            urlencoding::encode(&redirect),
            urlencoding::encode(&scope_str),
            urlencoding::encode(&state),
            urlencoding::encode(&pkce.challenge),
        );

        sessions.insert(OAuthSession::new(&pkce, &state));
        debug!("issued twitter authorization url for state {state}");
        Ok((url, state))
    }

    /// Exchange an authorization code + verifier for tokens.
    pub async fn exchange_code(
        &self,
        config: &PlatformConfig,
        code: &str,
        code_verifier: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenSet, Error> {
        let redirect = resolve_redirect(config, redirect_uri)?;
        let mut form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), redirect),
            ("code_verifier".to_string(), code_verifier.to_string()),
        ];

        let mut request = HttpRequest::post(TOKEN_URL).timeout(config.default_timeout);
        if let Some(secret) = confidential_secret(config) {
            request = request.basic(client_id(config)?, secret.expose());
        } else {
            form.push(("client_id".to_string(), client_id(config)?.to_string()));
        }
        request = request.form(form);

        let response =
            send_with_retry(self.transport.as_ref(), &self.policy, request, &mut NoRefresh)
                .await
                .map_err(|e| match e {
                    Error::Auth(_) | Error::Authorization(_) => {
                        Error::Auth(format!("Twitter code exchange rejected: {e}"))
                    }
                    other => other,
                })?;
        parse_token_response(&response)
    }

    /// Refresh using the stored refresh token, with the same
    /// confidential/public branching as the exchange.
    pub async fn refresh(&self, config: &PlatformConfig) -> Result<TokenSet, Error> {
        refresh_access_token(self.transport.as_ref(), &self.policy, config).await
    }

    /// Revoke the given token, or the configured access token.
    pub async fn revoke(&self, config: &PlatformConfig, token: Option<&str>) -> Result<(), Error> {
        let token_to_revoke = match token {
            Some(t) => t.to_string(),
            None => config
                .access_token
                .as_ref()
                .map(|t| t.expose().to_string())
                .ok_or_else(|| Error::Validation("No token to revoke".into()))?,
        };

        let mut form = vec![("token".to_string(), token_to_revoke)];
        let mut request = HttpRequest::post(REVOKE_URL).timeout(config.default_timeout);
        if let Some(secret) = confidential_secret(config) {
            request = request.basic(client_id(config)?, secret.expose());
        } else {
            form.push(("client_id".to_string(), client_id(config)?.to_string()));
        }
        request = request.form(form);

        send_with_retry(self.transport.as_ref(), &self.policy, request, &mut NoRefresh).await?;
        Ok(())
    }
}

/// Free-function form of the refresh so the retry engine's credential hook
/// can call it while the platform holds a mutable borrow of its config.
pub async fn refresh_access_token(
    transport: &dyn HttpTransport,
    policy: &RetryPolicy,
    config: &PlatformConfig,
) -> Result<TokenSet, Error> {
    let refresh_token = config
        .refresh_token
        .as_ref()
        .ok_or_else(|| Error::Auth("No refresh_token available".into()))?;

    let mut form = vec![
        ("grant_type".to_string(), "refresh_token".to_string()),
        (
            "refresh_token".to_string(),
            refresh_token.expose().to_string(),
        ),
    ];

    let mut request = HttpRequest::post(TOKEN_URL).timeout(config.default_timeout);
    if let Some(secret) = confidential_secret(config) {
        request = request.basic(client_id(config)?, secret.expose());
    } else {
        form.push(("client_id".to_string(), client_id(config)?.to_string()));
    }
    request = request.form(form);

    let response = send_with_retry(transport, policy, request, &mut NoRefresh)
        .await
        .map_err(|e| match e {
            Error::Auth(_) | Error::Authorization(_) => {
                Error::Auth(format!("Twitter token refresh rejected: {e}"))
            }
            other => other,
        })?;

    let payload: TwitterTokenResponse = response.json()?;
    debug!("twitter access token refreshed");
    Ok(TokenSet::from_expires_in(
        Secret::new(payload.access_token),
        payload.refresh_token.map(Secret::new),
        payload.expires_in,
    ))
}
