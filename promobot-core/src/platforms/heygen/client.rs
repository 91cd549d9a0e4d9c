// File: src/platforms/heygen/client.rs

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info};

use promobot_common::models::{VideoGenerationRequest, VideoJob};
use promobot_common::{Error, Secret};

use crate::http::{HttpRequest, HttpTransport, NoRefresh, RetryPolicy, send_with_retry};
use crate::repositories::VideoJobRepository;

pub const DEFAULT_API_BASE: &str = "https://api.heygen.com/v2";

/// Free-tier renders are capped at 360p; the provider rejects anything
/// larger unless test mode is set.
const FREE_TIER_WIDTH: u32 = 640;
const FREE_TIER_HEIGHT: u32 = 360;

/// Client for the video-rendering provider. Submission is fire-and-forget:
/// the returned job id is the key a later webhook event correlates on.
pub struct HeygenClient {
    api_key: Secret,
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl HeygenClient {
    pub fn new(api_key: Secret, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_API_BASE.to_string(),
            transport,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request(&self, request: HttpRequest) -> HttpRequest {
        request
            .header("X-Api-Key", self.api_key.expose())
            .header("Content-Type", "application/json")
    }

    fn build_generation_payload(request: &VideoGenerationRequest) -> Value {
        let mut video_input = serde_json::Map::new();
        if request.is_talking_photo || request.avatar_id.starts_with("talking_photo_") {
            video_input.insert(
                "character".to_string(),
                json!({
                    "type": "talking_photo",
                    "talking_photo_id": request.avatar_id,
                }),
            );
        } else {
            video_input.insert(
                "avatar".to_string(),
                json!({
                    "avatar_id": request.avatar_id,
                    "avatar_style": "normal",
                }),
            );
        }
        video_input.insert(
            "voice".to_string(),
            json!({
                "type": "text",
                "voice_id": request.voice_id,
                "input_text": request.input_text,
            }),
        );
        let background = match request.background.as_deref() {
            Some(bg) if bg.starts_with("http") => json!({
                "type": "image",
                "source": { "type": "url", "url": bg },
            }),
            Some(bg) => json!({ "type": "color", "value": bg }),
            None => json!({ "type": "color", "value": "#FFFFFF" }),
        };
        video_input.insert("background".to_string(), background);

        let mut payload = json!({
            "video_inputs": [Value::Object(video_input)],
            "test": request.free_tier,
            "caption": request.caption,
        });
        if request.free_tier {
            payload["dimension"] = json!({
                "width": FREE_TIER_WIDTH,
                "height": FREE_TIER_HEIGHT,
            });
        }
        if let Some(webhook_url) = &request.webhook_url {
            payload["webhook_url"] = json!(webhook_url);
        }
        payload
    }

    /// Submit a generation job and record it locally as `Queued`. Returns
    /// the provider job id immediately; completion arrives by webhook.
    pub async fn generate_video(
        &self,
        request: &VideoGenerationRequest,
        jobs: &dyn VideoJobRepository,
    ) -> Result<String, Error> {
        if request.input_text.trim().is_empty() {
            return Err(Error::Validation("input_text is required".into()));
        }
        if request.input_text.len() > 2000 {
            return Err(Error::Validation(
                "input_text exceeds maximum length of 2000 characters".into(),
            ));
        }
        if request.avatar_id.is_empty() {
            return Err(Error::Validation("avatar_id is required".into()));
        }

        let payload = Self::build_generation_payload(request);
        debug!("submitting video generation: {payload}");

        let http = self.request(
            HttpRequest::post(format!("{}/video/generate", self.base_url)).json(payload),
        );
        let response =
            send_with_retry(self.transport.as_ref(), &self.policy, http, &mut NoRefresh).await?;

        let body = response.json_value()?;
        let video_id = body
            .pointer("/data/video_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Api(format!("No video_id in generation response: {body}")))?;

        jobs.upsert(&VideoJob::queued(&video_id, request.publication_id))
            .await?;
        info!("video generation started, provider job id {video_id}");
        Ok(video_id)
    }

    pub async fn list_avatars(&self) -> Result<Value, Error> {
        let http = self.request(HttpRequest::get(format!("{}/avatars", self.base_url)));
        let response =
            send_with_retry(self.transport.as_ref(), &self.policy, http, &mut NoRefresh).await?;
        response.json_value()
    }

    pub async fn list_voices(&self) -> Result<Value, Error> {
        let http = self.request(HttpRequest::get(format!("{}/voices", self.base_url)));
        let response =
            send_with_retry(self.transport.as_ref(), &self.policy, http, &mut NoRefresh).await?;
        response.json_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> VideoGenerationRequest {
        VideoGenerationRequest {
            avatar_id: "avatar_1".into(),
            voice_id: Some("voice_1".into()),
            input_text: "hello".into(),
            background: None,
            caption: false,
            is_talking_photo: false,
            free_tier: true,
            webhook_url: Some("https://example.com/webhooks/heygen".into()),
            publication_id: None,
        }
    }

    #[test]
    fn payload_defaults_to_white_background_and_test_dimension() {
        let payload = HeygenClient::build_generation_payload(&base_request());
        assert_eq!(
            payload.pointer("/video_inputs/0/background/value"),
            Some(&json!("#FFFFFF"))
        );
        assert_eq!(payload.pointer("/dimension/width"), Some(&json!(640)));
        assert_eq!(payload["test"], json!(true));
        assert_eq!(payload["webhook_url"], json!("https://example.com/webhooks/heygen"));
    }

    #[test]
    fn talking_photo_ids_use_character_shape() {
        let mut request = base_request();
        request.avatar_id = "talking_photo_9".into();
        let payload = HeygenClient::build_generation_payload(&request);
        assert_eq!(
            payload.pointer("/video_inputs/0/character/type"),
            Some(&json!("talking_photo"))
        );
        assert!(payload.pointer("/video_inputs/0/avatar").is_none());
    }

    #[test]
    fn image_backgrounds_are_detected_by_scheme() {
        let mut request = base_request();
        request.background = Some("https://example.com/bg.png".into());
        let payload = HeygenClient::build_generation_payload(&request);
        assert_eq!(
            payload.pointer("/video_inputs/0/background/type"),
            Some(&json!("image"))
        );
    }
}
