// tests/auth_flow_tests.rs

mod common;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use common::{ScriptedTransport, response};
use promobot_common::models::PlatformConfig;
use promobot_common::traits::RefreshTokenStore;
use promobot_common::{Error, Secret};
use promobot_core::auth::{FileRefreshTokenStore, OAuthSessionStore};
use promobot_core::http::HttpTransport;
use promobot_core::platforms::SocialPlatform;
use promobot_core::platforms::reddit::{RedditAuthFlow, RedditPlatform};
use promobot_core::platforms::twitter::TwitterAuthFlow;

fn twitter_config(with_secret: bool) -> PlatformConfig {
    let mut cfg = PlatformConfig::new("twitter");
    cfg.client_id = Some("client-123".to_string());
    if with_secret {
        cfg.client_secret = Some(Secret::new("sekrit"));
    }
    cfg.webhook_url = Some("https://app.example.com/auth/twitter/callback".to_string());
    cfg
}

fn reddit_config() -> PlatformConfig {
    let mut cfg = PlatformConfig::new("reddit");
    cfg.client_id = Some("reddit-client".to_string());
    cfg.client_secret = Some(Secret::new("reddit-secret"));
    cfg.extra.insert(
        "redirect_uri".to_string(),
        "https://app.example.com/auth/reddit/callback".to_string(),
    );
    cfg
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    for pair in query.split('&') {
        let (k, v) = pair.split_once('=')?;
        if k == name {
            return Some(urlencoding::decode(v).unwrap().into_owned());
        }
    }
    None
}

const TOKEN_JSON: &str =
    r#"{"access_token":"new-access","refresh_token":"new-refresh","expires_in":7200}"#;

#[tokio::test]
async fn authorization_url_challenge_matches_stored_verifier() {
    let transport = Arc::new(ScriptedTransport::new(vec![]));
    let flow = TwitterAuthFlow::new(transport);
    let sessions = OAuthSessionStore::new();

    let (url, state) = flow
        .build_authorization_url(&twitter_config(false), &sessions, None, None)
        .unwrap();

    assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
    assert_eq!(query_param(&url, "code_challenge_method").as_deref(), Some("S256"));
    assert_eq!(query_param(&url, "state").as_deref(), Some(state.as_str()));
    assert_eq!(
        query_param(&url, "scope").as_deref(),
        Some("tweet.read tweet.write users.read offline.access")
    );

    let challenge = query_param(&url, "code_challenge").unwrap();
    let session = sessions.take(&state).expect("session stored under state");
    let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(session.code_verifier.as_bytes()));
    assert_eq!(challenge, expected);
}

#[tokio::test]
async fn state_cannot_be_consumed_twice() {
    let transport = Arc::new(ScriptedTransport::new(vec![]));
    let flow = TwitterAuthFlow::new(transport);
    let sessions = OAuthSessionStore::new();

    let (_, state) = flow
        .build_authorization_url(&twitter_config(false), &sessions, None, None)
        .unwrap();

    assert!(sessions.take(&state).is_some());
    // A second callback with the same state must fail validation.
    assert!(sessions.take(&state).is_none());
}

#[tokio::test]
async fn confidential_exchange_uses_basic_auth_and_omits_client_id() {
    let transport = Arc::new(ScriptedTransport::new(vec![response(200, TOKEN_JSON)]));
    let flow = TwitterAuthFlow::new(Arc::clone(&transport) as Arc<dyn HttpTransport>);

    let tokens = flow
        .exchange_code(&twitter_config(true), "the-code", "the-verifier", None)
        .await
        .unwrap();

    assert_eq!(tokens.access_token.expose(), "new-access");
    assert_eq!(tokens.refresh_token.unwrap().expose(), "new-refresh");
    assert!(tokens.expires_at.is_some());

    let sent = transport.request(0);
    assert_eq!(
        sent.basic,
        Some(("client-123".to_string(), "sekrit".to_string()))
    );
    let form = sent.form.unwrap();
    assert!(form.iter().any(|(k, v)| k == "grant_type" && v == "authorization_code"));
    assert!(form.iter().any(|(k, v)| k == "code_verifier" && v == "the-verifier"));
    assert!(!form.iter().any(|(k, _)| k == "client_id"));
}

#[tokio::test]
async fn public_exchange_carries_client_id_in_body() {
    let transport = Arc::new(ScriptedTransport::new(vec![response(200, TOKEN_JSON)]));
    let flow = TwitterAuthFlow::new(Arc::clone(&transport) as Arc<dyn HttpTransport>);

    flow.exchange_code(&twitter_config(false), "the-code", "the-verifier", None)
        .await
        .unwrap();

    let sent = transport.request(0);
    assert_eq!(sent.basic, None);
    let form = sent.form.unwrap();
    assert!(form.iter().any(|(k, v)| k == "client_id" && v == "client-123"));
}

#[tokio::test]
async fn refresh_without_refresh_token_is_an_authentication_error() {
    let transport = Arc::new(ScriptedTransport::new(vec![]));
    let flow = TwitterAuthFlow::new(transport);

    let err = flow.refresh(&twitter_config(true)).await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "got {err:?}");
}

#[tokio::test]
async fn refresh_uses_stored_refresh_token() {
    let transport = Arc::new(ScriptedTransport::new(vec![response(200, TOKEN_JSON)]));
    let flow = TwitterAuthFlow::new(Arc::clone(&transport) as Arc<dyn HttpTransport>);

    let mut cfg = twitter_config(true);
    cfg.refresh_token = Some(Secret::new("old-refresh"));
    let tokens = flow.refresh(&cfg).await.unwrap();
    assert_eq!(tokens.access_token.expose(), "new-access");

    let form = transport.request(0).form.unwrap();
    assert!(form.iter().any(|(k, v)| k == "grant_type" && v == "refresh_token"));
    assert!(form.iter().any(|(k, v)| k == "refresh_token" && v == "old-refresh"));
}

#[tokio::test]
async fn reddit_authorization_url_requests_permanent_grant() {
    let transport = Arc::new(ScriptedTransport::new(vec![]));
    let flow = RedditAuthFlow::new(transport);

    let (url, state) = flow
        .build_authorization_url(&reddit_config(), None, None)
        .unwrap();

    assert!(url.starts_with("https://www.reddit.com/api/v1/authorize?"));
    assert_eq!(query_param(&url, "duration").as_deref(), Some("permanent"));
    assert_eq!(query_param(&url, "scope").as_deref(), Some("identity read submit"));
    assert_eq!(query_param(&url, "state").as_deref(), Some(state.as_str()));
}

#[tokio::test]
async fn reddit_code_exchange_persists_refresh_token_to_durable_slot() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn RefreshTokenStore> =
        Arc::new(FileRefreshTokenStore::new(dir.path().join("tokens.json")));

    let transport = Arc::new(ScriptedTransport::new(vec![response(200, TOKEN_JSON)]));
    let mut platform = RedditPlatform::new(
        reddit_config(),
        Arc::clone(&transport) as Arc<dyn HttpTransport>,
        Some(Arc::clone(&store)),
    );

    platform.complete_authorization("auth-code").await.unwrap();
    assert_eq!(
        store.load("default").await.unwrap(),
        Some("new-refresh".to_string())
    );

    let sent = transport.request(0);
    assert_eq!(
        sent.basic,
        Some(("reddit-client".to_string(), "reddit-secret".to_string()))
    );
}

#[tokio::test]
async fn reddit_authenticate_loads_refresh_token_from_slot() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn RefreshTokenStore> =
        Arc::new(FileRefreshTokenStore::new(dir.path().join("tokens.json")));
    store.save("default", "stored-refresh").await.unwrap();

    // Token exchange, then the identity probe.
    let transport = Arc::new(ScriptedTransport::new(vec![
        response(200, TOKEN_JSON),
        response(200, r#"{"name":"promobot"}"#),
    ]));
    let mut platform = RedditPlatform::new(
        reddit_config(),
        Arc::clone(&transport) as Arc<dyn HttpTransport>,
        Some(store),
    );

    let tokens = platform.authenticate().await.unwrap().unwrap();
    assert_eq!(tokens.access_token.expose(), "new-access");

    let exchange_form = transport.request(0).form.unwrap();
    assert!(
        exchange_form
            .iter()
            .any(|(k, v)| k == "refresh_token" && v == "stored-refresh")
    );
}

#[tokio::test]
async fn reddit_authenticate_without_any_token_is_an_authentication_error() {
    let transport = Arc::new(ScriptedTransport::new(vec![]));
    let mut platform = RedditPlatform::new(reddit_config(), transport, None);

    let err = platform.authenticate().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "got {err:?}");
}

#[tokio::test]
async fn reddit_probe_permission_failure_is_an_authorization_error() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        response(200, TOKEN_JSON),
        response(403, "forbidden"),
    ]));
    let mut cfg = reddit_config();
    cfg.refresh_token = Some(Secret::new("stored-refresh"));
    let mut platform = RedditPlatform::new(cfg, transport, None);

    let err = platform.authenticate().await.unwrap_err();
    assert!(matches!(err, Error::Authorization(_)), "got {err:?}");
}

#[tokio::test]
async fn reddit_probe_auth_failure_is_an_authentication_error() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        response(200, TOKEN_JSON),
        response(401, "bad token"),
    ]));
    let mut cfg = reddit_config();
    cfg.refresh_token = Some(Secret::new("stored-refresh"));
    let mut platform = RedditPlatform::new(cfg, transport, None);

    let err = platform.authenticate().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "got {err:?}");
}
