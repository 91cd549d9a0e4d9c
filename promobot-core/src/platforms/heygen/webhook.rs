// File: src/platforms/heygen/webhook.rs
//
// Inbound webhook events drive the rendering-job state machine:
// queued -> processing -> completed | failed, terminal states absorbing.
// A completed job is only marked completed after its output has been
// mirrored into owned storage and an asset row exists for it.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{error, info, warn};

use promobot_common::models::{VideoJob, VideoJobStatus};
use promobot_common::traits::ObjectStore;
use promobot_common::{Error, Secret};

use crate::repositories::{AssetRepository, VideoJobRepository};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over the raw request body, hex-encoded. Comparison runs in
/// constant time via the mac's own verify.
pub fn verify_webhook_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// What the webhook endpoint reports back to the provider.
#[derive(Debug, Clone)]
pub struct WebhookOutcome {
    pub job_id: String,
    pub status: VideoJobStatus,
    pub message: String,
}

pub struct WebhookReconciler {
    jobs: Arc<dyn VideoJobRepository>,
    assets: Arc<dyn AssetRepository>,
    storage: Arc<dyn ObjectStore>,
    /// Shared webhook secret. When None, unsigned events are accepted
    /// (explicit degraded mode).
    secret: Option<Secret>,
}

fn extract_job_id(payload: &Value) -> Option<String> {
    for pointer in ["/video_id", "/event_data/video_id", "/data/video_id"] {
        if let Some(id) = payload.pointer(pointer).and_then(|v| v.as_str()) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    None
}

fn extract_event_type(payload: &Value) -> Option<String> {
    payload
        .get("event_type")
        .or_else(|| payload.get("type"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn extract_output_url(payload: &Value) -> Option<String> {
    for pointer in ["/video_url", "/url", "/result/url", "/event_data/url"] {
        if let Some(url) = payload.pointer(pointer).and_then(|v| v.as_str()) {
            if !url.is_empty() {
                return Some(url.to_string());
            }
        }
    }
    None
}

fn extract_error(payload: &Value) -> Option<String> {
    for pointer in ["/error", "/event_data/msg", "/message"] {
        if let Some(msg) = payload.pointer(pointer).and_then(|v| v.as_str()) {
            if !msg.is_empty() {
                return Some(msg.to_string());
            }
        }
    }
    None
}

fn derive_status(payload: &Value) -> VideoJobStatus {
    let explicit = payload
        .get("status")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    if let Some(status) = explicit {
        return VideoJobStatus::from_provider(status);
    }
    extract_event_type(payload)
        .and_then(|et| VideoJobStatus::from_event_type(&et))
        .unwrap_or(VideoJobStatus::Processing)
}

impl WebhookReconciler {
    pub fn new(
        jobs: Arc<dyn VideoJobRepository>,
        assets: Arc<dyn AssetRepository>,
        storage: Arc<dyn ObjectStore>,
        secret: Option<Secret>,
    ) -> Self {
        Self {
            jobs,
            assets,
            storage,
            secret,
        }
    }

    /// Manual status probe. Reads the local record only; the provider has
    /// no status endpoint worth polling, completion arrives by webhook.
    pub async fn job_status(&self, provider_job_id: &str) -> Result<Option<VideoJob>, Error> {
        self.jobs.get_by_provider_id(provider_job_id).await
    }

    /// Process one delivery. `Err(Auth)` means bad/missing signature,
    /// `Err(Validation)` an unparseable body; everything else is resolved
    /// into a [`WebhookOutcome`] so the provider always gets an answer.
    pub async fn process(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, Error> {
        if let Some(secret) = &self.secret {
            let valid = signature
                .map(|sig| verify_webhook_signature(body, sig, secret.expose()))
                .unwrap_or(false);
            if !valid {
                error!("invalid or missing webhook signature");
                return Err(Error::Auth("Invalid webhook signature".into()));
            }
        } else {
            warn!("no webhook secret configured; accepting unsigned event");
        }

        let payload: Value = serde_json::from_slice(body)
            .map_err(|_| Error::Validation("Invalid JSON payload".into()))?;

        let job_id = extract_job_id(&payload)
            .ok_or_else(|| Error::Validation("No video_id in webhook payload".into()))?;
        let status = derive_status(&payload);
        info!("webhook for job {job_id}: status {status}");

        // Submission and delivery are unordered; a webhook may land before
        // the submitter recorded the job. Create the row rather than drop
        // the event.
        let existing = self.jobs.get_by_provider_id(&job_id).await?;
        let current = match existing {
            Some(job) => job,
            None => {
                info!("webhook for unknown job {job_id}; creating record");
                let job = VideoJob::queued(&job_id, None);
                self.jobs.upsert(&job).await?;
                job
            }
        };

        if current.status.is_terminal() {
            // Replayed (or conflicting) terminal event: the first result
            // stands, nothing is re-downloaded or duplicated.
            return Ok(WebhookOutcome {
                job_id,
                status: current.status,
                message: "Job already in a terminal state; event ignored".into(),
            });
        }
        if !current.status.can_transition_to(status) && current.status != status {
            return Ok(WebhookOutcome {
                job_id,
                status: current.status,
                message: format!(
                    "Ignoring {status} event for job in state {}",
                    current.status
                ),
            });
        }

        match status {
            VideoJobStatus::Completed => self.complete_job(&job_id, &payload).await,
            VideoJobStatus::Failed => {
                let detail = extract_error(&payload);
                self.jobs
                    .set_status(&job_id, VideoJobStatus::Failed, detail.as_deref())
                    .await?;
                Ok(WebhookOutcome {
                    job_id,
                    status: VideoJobStatus::Failed,
                    message: "Webhook processed".into(),
                })
            }
            other => {
                self.jobs.set_status(&job_id, other, None).await?;
                Ok(WebhookOutcome {
                    job_id,
                    status: other,
                    message: "Webhook processed".into(),
                })
            }
        }
    }

    /// Mirror the artifact, record the asset, then flip to completed.
    /// Any mirroring failure marks the job failed with the error retained
    /// rather than leaving it processing forever.
    async fn complete_job(&self, job_id: &str, payload: &Value) -> Result<WebhookOutcome, Error> {
        let Some(output_url) = extract_output_url(payload) else {
            error!("completed event for job {job_id} carried no output url");
            self.jobs
                .set_status(
                    job_id,
                    VideoJobStatus::Failed,
                    Some("completed event carried no output url"),
                )
                .await?;
            return Ok(WebhookOutcome {
                job_id: job_id.to_string(),
                status: VideoJobStatus::Failed,
                message: "Completed event had no output URL".into(),
            });
        };

        info!("mirroring artifact for job {job_id} from {output_url}");
        let stored = match self.storage.store(&output_url, "videos", "mp4").await {
            Ok(stored) => stored,
            Err(e) => {
                error!("artifact mirror failed for job {job_id}: {e}");
                self.jobs
                    .set_status(
                        job_id,
                        VideoJobStatus::Failed,
                        Some(&format!("artifact mirror failed: {e}")),
                    )
                    .await?;
                return Ok(WebhookOutcome {
                    job_id: job_id.to_string(),
                    status: VideoJobStatus::Failed,
                    message: "Artifact download/store failed".into(),
                });
            }
        };

        let asset_id = self
            .assets
            .insert_asset("video", &stored.location, stored.retrieval_url.as_deref())
            .await?;
        let asset_url = stored.retrieval_url.unwrap_or_else(|| stored.location.clone());
        self.jobs
            .complete_with_asset(job_id, asset_id, &asset_url)
            .await?;

        info!("job {job_id} completed with asset {asset_id}");
        Ok(WebhookOutcome {
            job_id: job_id.to_string(),
            status: VideoJobStatus::Completed,
            message: "Webhook processed".into(),
        })
    }
}
