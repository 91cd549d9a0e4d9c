// File: promobot-common/src/models/video.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Local lifecycle of a rendering job. Terminal states are absorbing.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum VideoJobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl VideoJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoJobStatus::Completed | VideoJobStatus::Failed)
    }

    /// Transitions run one direction only; nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: VideoJobStatus) -> bool {
        match self {
            VideoJobStatus::Queued => next != VideoJobStatus::Queued,
            VideoJobStatus::Processing => next.is_terminal(),
            VideoJobStatus::Completed | VideoJobStatus::Failed => false,
        }
    }

    /// Normalize the provider's status vocabulary. Unrecognized values map
    /// to `Processing` so a job is never prematurely marked failed.
    pub fn from_provider(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "completed" | "success" | "succeeded" | "finished" => VideoJobStatus::Completed,
            "failed" | "error" => VideoJobStatus::Failed,
            "queued" => VideoJobStatus::Queued,
            _ => VideoJobStatus::Processing,
        }
    }

    /// Derive a status from an event-type string when the payload carries
    /// no explicit status field.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        let et = event_type.to_lowercase();
        if et.contains("complete") || et.contains("succeed") || et.contains("finish") {
            Some(VideoJobStatus::Completed)
        } else if et.contains("fail") || et.contains("error") {
            Some(VideoJobStatus::Failed)
        } else if et.contains("process") || et.contains("pending") {
            Some(VideoJobStatus::Processing)
        } else {
            None
        }
    }
}

impl fmt::Display for VideoJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoJobStatus::Queued => write!(f, "queued"),
            VideoJobStatus::Processing => write!(f, "processing"),
            VideoJobStatus::Completed => write!(f, "completed"),
            VideoJobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for VideoJobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(VideoJobStatus::Queued),
            "processing" => Ok(VideoJobStatus::Processing),
            "completed" => Ok(VideoJobStatus::Completed),
            "failed" => Ok(VideoJobStatus::Failed),
            _ => Err(format!("Unknown video job status: {}", s)),
        }
    }
}

/// A rendering job tracked locally. Created when a generation request is
/// submitted; mutated only by the webhook reconciler (or a manual probe).
#[derive(Debug, Clone, Serialize)]
pub struct VideoJob {
    /// Provider-assigned id; the correlation key for webhook events.
    pub provider_job_id: String,
    pub status: VideoJobStatus,
    pub asset_id: Option<i64>,
    pub publication_id: Option<i64>,
    pub asset_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoJob {
    pub fn queued(provider_job_id: impl Into<String>, publication_id: Option<i64>) -> Self {
        let now = Utc::now();
        Self {
            provider_job_id: provider_job_id.into(),
            status: VideoJobStatus::Queued,
            asset_id: None,
            publication_id,
            asset_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What to render. Mirrors the provider's generate API surface: an avatar
/// (or talking photo) reads `input_text` with the given voice over a color
/// or image background.
#[derive(Debug, Clone)]
pub struct VideoGenerationRequest {
    pub avatar_id: String,
    pub voice_id: Option<String>,
    pub input_text: String,
    pub background: Option<String>,
    pub caption: bool,
    pub is_talking_photo: bool,
    /// Free tier forces test mode and a 360p dimension cap.
    pub free_tier: bool,
    pub webhook_url: Option<String>,
    pub publication_id: Option<i64>,
}
