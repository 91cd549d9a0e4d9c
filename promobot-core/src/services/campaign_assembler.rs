// File: src/services/campaign_assembler.rs
//
// Builds a complete draft campaign (persona, pain point, script, platform
// attachments, content rows) inside one transaction. Platform validation
// happens before the transaction opens; generator calls happen before it
// too, so the transaction only holds inserts.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use promobot_common::Error;
use promobot_common::models::{
    AssemblyOutcome, AssemblyRequest, ContentKind, ContentSource, Offer, OfferRef,
};
use promobot_common::traits::TextGenerator;

use crate::repositories::{AssemblyStore, AssemblyTx};

/// Static capability registry. Campaign assembly only accepts platforms
/// listed here.
pub fn platform_capabilities(platform: &str) -> Option<&'static [ContentKind]> {
    match platform {
        "twitter" => Some(&[ContentKind::Tweet]),
        "shorts" => Some(&[ContentKind::ShortsCaption, ContentKind::ShortsVideo]),
        _ => None,
    }
}

const TWEET_MAX_CHARS: usize = 280;
const CAPTION_MAX_CHARS: usize = 220;

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Generator output may be plain text or a JSON object; pull the named
/// field when it is JSON, otherwise use the raw text.
fn text_or_json_field(raw: &str, field: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map
            .get(field)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| raw.trim().to_string()),
        Ok(Value::String(s)) => s,
        _ => raw.trim().to_string(),
    }
}

pub struct CampaignAssembler {
    store: Arc<dyn AssemblyStore>,
    generator: Arc<dyn TextGenerator>,
}

impl CampaignAssembler {
    pub fn new(store: Arc<dyn AssemblyStore>, generator: Arc<dyn TextGenerator>) -> Self {
        Self { store, generator }
    }

    pub async fn assemble(&self, request: AssemblyRequest) -> Result<AssemblyOutcome, Error> {
        // Validate the platform list before anything touches the database.
        let platforms: Vec<String> = request
            .platforms
            .iter()
            .map(|p| p.to_lowercase())
            .collect();
        if platforms.is_empty() {
            return Err(Error::Validation(
                "at least one platform is required".into(),
            ));
        }
        for platform in &platforms {
            if platform_capabilities(platform).is_none() {
                return Err(Error::Validation(format!(
                    "Unsupported platform: {platform}"
                )));
            }
        }

        let offer = self.resolve_offer(&request).await?;
        let cta_link = request
            .cta_link
            .clone()
            .or_else(|| offer.link_url.clone())
            .filter(|s| !s.trim().is_empty());

        let persona_title = request
            .persona
            .clone()
            .unwrap_or_else(|| "general".to_string());
        let pain_point_text = match &request.pain_point {
            Some(text) => text.clone(),
            None => self.generate_pain_point(&offer).await,
        };
        let script_text = match &request.override_script_text {
            Some(text) => text.clone(),
            None => {
                self.generate_script(&offer, &pain_point_text, &persona_title, cta_link.as_deref())
                    .await
            }
        };

        let wants_twitter = platforms.iter().any(|p| p == "twitter");
        let wants_shorts = platforms.iter().any(|p| p == "shorts");

        let tweet = if wants_twitter {
            Some(match &request.override_tweet_text {
                Some(text) => (text.clone(), ContentSource::Manual),
                None => (
                    self.generate_tweet(&script_text, &offer, cta_link.as_deref())
                        .await,
                    ContentSource::Ai,
                ),
            })
        } else {
            None
        };
        let caption = if wants_shorts {
            Some(match &request.override_video_caption {
                Some(text) => (text.clone(), ContentSource::Manual),
                None => (
                    self.generate_caption(&script_text, &offer, cta_link.as_deref())
                        .await,
                    ContentSource::Ai,
                ),
            })
        } else {
            None
        };

        let mut tx = self.store.begin().await?;
        let assembled = Self::run_assembly(
            tx.as_mut(),
            &offer,
            cta_link.as_deref(),
            &persona_title,
            &pain_point_text,
            &script_text,
            &platforms,
            tweet.as_ref(),
            caption.as_ref(),
            request.generate_video && wants_shorts,
        )
        .await;

        match assembled {
            Ok(outcome) => {
                tx.commit().await?;
                debug!("assembled campaign {}", outcome.campaign_id);
                Ok(outcome)
            }
            Err(e) => {
                // Partial campaigns must never be observable.
                if let Err(rollback_err) = tx.rollback().await {
                    error!("rollback after assembly failure also failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_assembly(
        tx: &mut dyn AssemblyTx,
        offer: &Offer,
        cta_link: Option<&str>,
        persona_title: &str,
        pain_point_text: &str,
        script_text: &str,
        platforms: &[String],
        tweet: Option<&(String, ContentSource)>,
        caption: Option<&(String, ContentSource)>,
        create_video_row: bool,
    ) -> Result<AssemblyOutcome, Error> {
        let persona_id = tx.insert_persona(persona_title).await?;
        let pain_point_id = tx.insert_pain_point(pain_point_text, persona_id).await?;
        let script_id = tx.insert_script(script_text).await?;

        let campaign_id = tx
            .insert_campaign(
                &format!("Campaign for {}", offer.title),
                &format!("Campaign generated from offer: {}", offer.title),
                persona_id,
                "draft",
            )
            .await?;
        tx.link_campaign(
            campaign_id,
            offer.offer_id,
            persona_id,
            pain_point_id,
            script_id,
            cta_link,
        )
        .await?;

        for platform in platforms {
            tx.attach_platform(campaign_id, platform, true).await?;
        }

        let mut content_ids = Vec::new();
        if let Some((text, source)) = tweet {
            if !text.is_empty() {
                let id = tx
                    .insert_content(
                        campaign_id,
                        ContentKind::Tweet,
                        Some(text.as_str()),
                        None,
                        *source,
                    )
                    .await?;
                content_ids.push(id);
            }
        }
        if let Some((text, source)) = caption {
            if !text.is_empty() {
                let id = tx
                    .insert_content(
                        campaign_id,
                        ContentKind::ShortsCaption,
                        Some(text.as_str()),
                        None,
                        *source,
                    )
                    .await?;
                content_ids.push(id);
            }
        }
        if create_video_row {
            // Asset creation is deferred to webhook completion; the row
            // starts with no asset attached.
            let id = tx
                .insert_content(
                    campaign_id,
                    ContentKind::ShortsVideo,
                    None,
                    None,
                    ContentSource::Ai,
                )
                .await?;
            content_ids.push(id);
        }

        Ok(AssemblyOutcome {
            campaign_id,
            offer_id: offer.offer_id,
            persona_id,
            pain_point_id,
            script_id,
            content_ids,
        })
    }

    async fn resolve_offer(&self, request: &AssemblyRequest) -> Result<Offer, Error> {
        match &request.offer {
            OfferRef::Existing(offer_id) => self
                .store
                .get_offer(*offer_id)
                .await?
                .ok_or_else(|| Error::Validation("Offer not found".into())),
            OfferRef::New { title, description } => {
                if title.is_none() && description.is_none() {
                    return Err(Error::Validation(
                        "Provide offer_id or offer_title/offer_description".into(),
                    ));
                }
                let description = description.clone().unwrap_or_default();
                let title = title
                    .clone()
                    .unwrap_or_else(|| truncate_chars(&description, 200));
                self.store
                    .create_offer(&title, &description, request.cta_link.as_deref())
                    .await
            }
        }
    }

    async fn generate_pain_point(&self, offer: &Offer) -> String {
        let prompt = format!(
            "Name the single biggest pain point the target audience of this offer has. \
             Offer: {}. Details: {}. Answer with one short sentence.",
            offer.title, offer.description
        );
        match self.generator.generate(&prompt).await {
            Ok(raw) => text_or_json_field(&raw, "pain_point"),
            Err(e) => {
                warn!("pain point generation failed ({e}); using fallback");
                format!("Getting real value out of {} takes too much effort", offer.title)
            }
        }
    }

    async fn generate_script(
        &self,
        offer: &Offer,
        pain_point: &str,
        persona: &str,
        cta_link: Option<&str>,
    ) -> String {
        let prompt = format!(
            "Write a short marketing video script for the persona '{persona}' \
             addressing this pain point: {pain_point}. The script promotes: {}.",
            offer.title
        );
        match self.generator.generate(&prompt).await {
            Ok(raw) => text_or_json_field(&raw, "script"),
            Err(e) => {
                warn!("script generation failed ({e}); using fallback");
                let base = if offer.description.trim().is_empty() {
                    offer.title.trim()
                } else {
                    offer.description.trim()
                };
                match cta_link {
                    Some(cta) => format!("{base}\n\nLearn more: {cta}"),
                    None => format!("{base}\n\nLearn more."),
                }
            }
        }
    }

    async fn generate_tweet(
        &self,
        script_text: &str,
        offer: &Offer,
        cta_link: Option<&str>,
    ) -> String {
        let prompt = format!(
            "Condense this script into a single engaging tweet under 280 characters\
             {}: {script_text}",
            cta_link
                .map(|c| format!(", ending with the link {c}"))
                .unwrap_or_default()
        );
        match self.generator.generate(&prompt).await {
            Ok(raw) => truncate_chars(&text_or_json_field(&raw, "tweet"), TWEET_MAX_CHARS),
            Err(e) => {
                warn!("tweet generation failed ({e}); using fallback");
                let base = truncate_chars(script_text.trim(), 240);
                let base = if base.is_empty() {
                    truncate_chars(&offer.title, 240)
                } else {
                    base
                };
                let tweet = match cta_link {
                    Some(cta) => format!("{base} {cta}"),
                    None => base,
                };
                truncate_chars(tweet.trim(), TWEET_MAX_CHARS)
            }
        }
    }

    async fn generate_caption(
        &self,
        script_text: &str,
        offer: &Offer,
        cta_link: Option<&str>,
    ) -> String {
        let prompt = format!(
            "Write a short-form video caption (max 220 characters) for this script: \
             {script_text}"
        );
        match self.generator.generate(&prompt).await {
            Ok(raw) => truncate_chars(&text_or_json_field(&raw, "caption"), CAPTION_MAX_CHARS),
            Err(e) => {
                warn!("caption generation failed ({e}); using fallback");
                let base = if script_text.trim().is_empty() {
                    if offer.description.trim().is_empty() {
                        offer.title.trim()
                    } else {
                        offer.description.trim()
                    }
                } else {
                    script_text.trim()
                };
                let mut caption = truncate_chars(base, 160).trim().to_string();
                if let Some(cta) = cta_link {
                    caption = format!("{caption}\n{cta}");
                }
                truncate_chars(caption.trim(), CAPTION_MAX_CHARS)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_registry_rejects_unknown_platforms() {
        assert!(platform_capabilities("twitter").is_some());
        assert_eq!(
            platform_capabilities("shorts"),
            Some(&[ContentKind::ShortsCaption, ContentKind::ShortsVideo][..])
        );
        assert!(platform_capabilities("myspace").is_none());
    }

    #[test]
    fn json_generator_output_is_tolerated() {
        assert_eq!(
            text_or_json_field(r#"{"pain_point":"slow reporting"}"#, "pain_point"),
            "slow reporting"
        );
        assert_eq!(text_or_json_field("plain text answer", "pain_point"), "plain text answer");
        assert_eq!(
            text_or_json_field(r#"{"other":"x"}"#, "pain_point"),
            r#"{"other":"x"}"#
        );
        assert_eq!(text_or_json_field(r#""quoted""#, "pain_point"), "quoted");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 280), "short");
    }
}
