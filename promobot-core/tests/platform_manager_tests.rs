// tests/platform_manager_tests.rs

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use common::{ScriptedTransport, response};
use promobot_common::models::{PlatformConfig, PostContent, TokenSet};
use promobot_common::traits::TokenSink;
use promobot_common::{Error, Secret};
use promobot_core::platforms::manager::PlatformManager;

#[derive(Default)]
struct RecordingSink {
    persisted: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    fn access_tokens_for(&self, platform: &str) -> Vec<String> {
        self.persisted
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == platform)
            .map(|(_, t)| t.clone())
            .collect()
    }
}

#[async_trait]
impl TokenSink for RecordingSink {
    async fn persist(&self, platform: &str, tokens: &TokenSet) -> Result<(), Error> {
        self.persisted
            .lock()
            .unwrap()
            .push((platform.to_string(), tokens.access_token.expose().to_string()));
        Ok(())
    }
}

fn expired_twitter_config() -> PlatformConfig {
    let mut cfg = PlatformConfig::new("twitter");
    cfg.client_id = Some("client-123".to_string());
    cfg.access_token = Some(Secret::new("stale-access"));
    cfg.refresh_token = Some(Secret::new("old-refresh"));
    cfg.token_expires_at = Some(Utc::now() - chrono::Duration::minutes(5));
    cfg
}

#[tokio::test]
async fn unknown_platform_names_are_rejected() {
    let transport = Arc::new(ScriptedTransport::new(vec![]));
    let mut manager = PlatformManager::new(transport);

    let err = manager
        .add_account(PlatformConfig::new("myspace"))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
}

#[tokio::test]
async fn posting_to_an_unconfigured_platform_fails_validation() {
    let transport = Arc::new(ScriptedTransport::new(vec![]));
    let mut manager = PlatformManager::new(transport);

    let err = manager
        .post("twitter", PostContent::plain("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert!(!manager.test_connection("twitter").await);
}

#[tokio::test]
async fn expired_token_is_refreshed_before_posting_and_persisted() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        // Refresh exchange, then the tweet create.
        response(
            200,
            r#"{"access_token":"fresh-access","refresh_token":"fresh-refresh","expires_in":7200}"#,
        ),
        response(201, r#"{"data":{"id":"tw-1","text":"hello"}}"#),
    ]));
    let sink = Arc::new(RecordingSink::default());

    let mut manager = PlatformManager::new(Arc::clone(&transport) as Arc<_>)
        .with_token_sink(Arc::clone(&sink) as Arc<dyn TokenSink>);
    manager.add_account(expired_twitter_config()).unwrap();

    let result = manager
        .post("twitter", PostContent::plain("hello"))
        .await
        .unwrap();

    assert_eq!(result.post_id, "tw-1");
    assert_eq!(result.platform, "twitter");
    // The refreshed token set reached the sink for persistence.
    assert_eq!(sink.access_tokens_for("twitter"), vec!["fresh-access"]);
    // The actual post carried the refreshed bearer token.
    assert_eq!(
        transport.request(1).bearer.as_deref(),
        Some("fresh-access")
    );
}

#[tokio::test]
async fn media_and_scheduling_are_validation_errors() {
    let transport = Arc::new(ScriptedTransport::new(vec![]));
    let mut manager = PlatformManager::new(transport);
    let mut cfg = PlatformConfig::new("twitter");
    cfg.client_id = Some("client-123".to_string());
    cfg.access_token = Some(Secret::new("token"));
    manager.add_account(cfg).unwrap();

    let mut content = PostContent::plain("hello");
    content.media_urls.push("https://example.com/pic.png".to_string());
    let err = manager.post("twitter", content).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");

    let mut content = PostContent::plain("hello");
    content.scheduled_for = Some(Utc::now() + chrono::Duration::hours(1));
    let err = manager.post("twitter", content).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
}
