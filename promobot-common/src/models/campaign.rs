// File: promobot-common/src/models/campaign.rs

use serde::{Deserialize, Serialize};

/// The offer a campaign is assembled around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: i64,
    pub title: String,
    pub description: String,
    pub link_url: Option<String>,
}

/// Resolve an existing offer by id, or create one from the given fields.
#[derive(Debug, Clone)]
pub enum OfferRef {
    Existing(i64),
    New {
        title: Option<String>,
        description: Option<String>,
    },
}

/// The kinds of content row a platform attachment can produce.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ContentKind {
    Tweet,
    ShortsCaption,
    ShortsVideo,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Tweet => "tweet",
            ContentKind::ShortsCaption => "shorts_caption",
            ContentKind::ShortsVideo => "shorts_video",
        }
    }
}

/// Whether a content row came from the generator or a caller override.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ContentSource {
    Ai,
    Manual,
}

impl ContentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentSource::Ai => "ai",
            ContentSource::Manual => "manual",
        }
    }
}

/// Everything the assembler needs to build one campaign.
#[derive(Debug, Clone)]
pub struct AssemblyRequest {
    pub offer: OfferRef,
    pub cta_link: Option<String>,
    pub persona: Option<String>,
    pub pain_point: Option<String>,
    pub override_script_text: Option<String>,
    pub override_tweet_text: Option<String>,
    pub override_video_caption: Option<String>,
    pub platforms: Vec<String>,
    pub generate_video: bool,
}

/// Ids of every row the assembly transaction created.
#[derive(Debug, Clone, Serialize)]
pub struct AssemblyOutcome {
    pub campaign_id: i64,
    pub offer_id: i64,
    pub persona_id: i64,
    pub pain_point_id: i64,
    pub script_id: i64,
    pub content_ids: Vec<i64>,
}
