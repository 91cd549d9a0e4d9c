// tests/webhook_tests.rs

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use promobot_common::models::{VideoJob, VideoJobStatus};
use promobot_common::traits::{ObjectStore, StoredObject};
use promobot_common::{Error, Secret};
use promobot_core::platforms::heygen::WebhookReconciler;
use promobot_core::repositories::{AssetRepository, VideoJobRepository};

#[derive(Default)]
struct MemoryVideoJobRepository {
    jobs: DashMap<String, VideoJob>,
}

#[async_trait]
impl VideoJobRepository for MemoryVideoJobRepository {
    async fn upsert(&self, job: &VideoJob) -> Result<(), Error> {
        match self.jobs.get_mut(&job.provider_job_id) {
            Some(mut existing) => {
                if existing.publication_id.is_none() {
                    existing.publication_id = job.publication_id;
                }
                existing.updated_at = Utc::now();
            }
            None => {
                self.jobs.insert(job.provider_job_id.clone(), job.clone());
            }
        }
        Ok(())
    }

    async fn get_by_provider_id(&self, provider_job_id: &str) -> Result<Option<VideoJob>, Error> {
        Ok(self.jobs.get(provider_job_id).map(|j| j.clone()))
    }

    async fn set_status(
        &self,
        provider_job_id: &str,
        status: VideoJobStatus,
        error: Option<&str>,
    ) -> Result<(), Error> {
        if let Some(mut job) = self.jobs.get_mut(provider_job_id) {
            if !job.status.is_terminal() {
                job.status = status;
                job.error = error.map(str::to_string);
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn complete_with_asset(
        &self,
        provider_job_id: &str,
        asset_id: i64,
        asset_url: &str,
    ) -> Result<(), Error> {
        if let Some(mut job) = self.jobs.get_mut(provider_job_id) {
            if !job.status.is_terminal() {
                job.status = VideoJobStatus::Completed;
                job.asset_id = Some(asset_id);
                job.asset_url = Some(asset_url.to_string());
                job.error = None;
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryAssetRepository {
    assets: Mutex<Vec<(i64, String, String)>>,
    next_id: AtomicI64,
}

impl MemoryAssetRepository {
    fn count(&self) -> usize {
        self.assets.lock().unwrap().len()
    }

    fn first_location(&self) -> Option<String> {
        self.assets.lock().unwrap().first().map(|(_, _, l)| l.clone())
    }
}

#[async_trait]
impl AssetRepository for MemoryAssetRepository {
    async fn insert_asset(
        &self,
        kind: &str,
        location: &str,
        _url: Option<&str>,
    ) -> Result<i64, Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.assets
            .lock()
            .unwrap()
            .push((id, kind.to_string(), location.to_string()));
        Ok(id)
    }
}

struct MemoryObjectStore {
    fail: bool,
    downloads: AtomicUsize,
}

impl MemoryObjectStore {
    fn working() -> Self {
        Self {
            fail: false,
            downloads: AtomicUsize::new(0),
        }
    }

    fn broken() -> Self {
        Self {
            fail: true,
            downloads: AtomicUsize::new(0),
        }
    }

    fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn store(
        &self,
        source_url: &str,
        category: &str,
        extension: &str,
    ) -> Result<StoredObject, Error> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Storage(format!("cannot reach {source_url}")));
        }
        Ok(StoredObject {
            location: format!("s3://test-bucket/{category}/mirrored.{extension}"),
            retrieval_url: None,
        })
    }

    async fn retrieval_url(&self, location: &str, _ttl_seconds: u64) -> Result<String, Error> {
        Ok(format!("https://signed.example.com/{location}"))
    }
}

struct Harness {
    jobs: Arc<MemoryVideoJobRepository>,
    assets: Arc<MemoryAssetRepository>,
    storage: Arc<MemoryObjectStore>,
    reconciler: WebhookReconciler,
}

fn harness(secret: Option<&str>, storage: MemoryObjectStore) -> Harness {
    let jobs = Arc::new(MemoryVideoJobRepository::default());
    let assets = Arc::new(MemoryAssetRepository::default());
    let storage = Arc::new(storage);
    let reconciler = WebhookReconciler::new(
        Arc::clone(&jobs) as Arc<dyn VideoJobRepository>,
        Arc::clone(&assets) as Arc<dyn AssetRepository>,
        Arc::clone(&storage) as Arc<dyn ObjectStore>,
        secret.map(Secret::new),
    );
    Harness {
        jobs,
        assets,
        storage,
        reconciler,
    }
}

fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

async fn seed_job(harness: &Harness, provider_id: &str) {
    harness
        .jobs
        .upsert(&VideoJob::queued(provider_id, Some(7)))
        .await
        .unwrap();
}

#[tokio::test]
async fn completed_event_with_url_mirrors_artifact_and_completes_job() {
    let h = harness(None, MemoryObjectStore::working());
    seed_job(&h, "vid-1").await;

    let body = br#"{"video_id":"vid-1","status":"completed","video_url":"https://cdn.example.com/out.mp4"}"#;
    let outcome = h.reconciler.process(body, None).await.unwrap();

    assert_eq!(outcome.status, VideoJobStatus::Completed);
    let job = h.jobs.get_by_provider_id("vid-1").await.unwrap().unwrap();
    assert_eq!(job.status, VideoJobStatus::Completed);
    assert!(job.asset_id.is_some());
    assert_eq!(h.assets.count(), 1);
    assert!(!h.assets.first_location().unwrap().is_empty());
}

#[tokio::test]
async fn completed_event_without_url_fails_the_job() {
    let h = harness(None, MemoryObjectStore::working());
    seed_job(&h, "vid-2").await;

    let body = br#"{"video_id":"vid-2","status":"completed"}"#;
    let outcome = h.reconciler.process(body, None).await.unwrap();

    assert_eq!(outcome.status, VideoJobStatus::Failed);
    let job = h.jobs.get_by_provider_id("vid-2").await.unwrap().unwrap();
    assert_eq!(job.status, VideoJobStatus::Failed);
    assert!(job.error.unwrap().contains("no output url"));
    assert_eq!(h.assets.count(), 0);
}

#[tokio::test]
async fn mirror_failure_marks_job_failed_with_error_retained() {
    let h = harness(None, MemoryObjectStore::broken());
    seed_job(&h, "vid-3").await;

    let body = br#"{"video_id":"vid-3","status":"completed","url":"https://cdn.example.com/out.mp4"}"#;
    let outcome = h.reconciler.process(body, None).await.unwrap();

    assert_eq!(outcome.status, VideoJobStatus::Failed);
    let job = h.jobs.get_by_provider_id("vid-3").await.unwrap().unwrap();
    assert!(job.error.unwrap().contains("artifact mirror failed"));
    assert_eq!(h.assets.count(), 0);
}

#[tokio::test]
async fn replayed_terminal_event_is_a_no_op() {
    let h = harness(None, MemoryObjectStore::working());
    seed_job(&h, "vid-4").await;

    let body = br#"{"video_id":"vid-4","status":"completed","video_url":"https://cdn.example.com/out.mp4"}"#;
    let first = h.reconciler.process(body, None).await.unwrap();
    let second = h.reconciler.process(body, None).await.unwrap();

    assert_eq!(first.status, VideoJobStatus::Completed);
    assert_eq!(second.status, VideoJobStatus::Completed);
    // No second download, no duplicate asset row.
    assert_eq!(h.storage.download_count(), 1);
    assert_eq!(h.assets.count(), 1);
}

#[tokio::test]
async fn webhook_for_unknown_job_creates_the_record() {
    let h = harness(None, MemoryObjectStore::working());

    let body = br#"{"video_id":"early-bird","status":"processing"}"#;
    let outcome = h.reconciler.process(body, None).await.unwrap();

    assert_eq!(outcome.status, VideoJobStatus::Processing);
    let job = h.jobs.get_by_provider_id("early-bird").await.unwrap().unwrap();
    assert_eq!(job.status, VideoJobStatus::Processing);
}

#[tokio::test]
async fn status_regressions_are_ignored() {
    let h = harness(None, MemoryObjectStore::working());
    seed_job(&h, "vid-5").await;
    h.jobs
        .set_status("vid-5", VideoJobStatus::Processing, None)
        .await
        .unwrap();

    let body = br#"{"video_id":"vid-5","status":"queued"}"#;
    let outcome = h.reconciler.process(body, None).await.unwrap();

    assert_eq!(outcome.status, VideoJobStatus::Processing);
    let job = h.jobs.get_by_provider_id("vid-5").await.unwrap().unwrap();
    assert_eq!(job.status, VideoJobStatus::Processing);
}

#[tokio::test]
async fn status_derived_from_event_type_when_missing() {
    let h = harness(None, MemoryObjectStore::working());
    seed_job(&h, "vid-6").await;

    let body =
        br#"{"event_type":"avatar_video.success","video_id":"vid-6","url":"https://cdn.example.com/o.mp4"}"#;
    let outcome = h.reconciler.process(body, None).await.unwrap();
    assert_eq!(outcome.status, VideoJobStatus::Completed);
}

#[tokio::test]
async fn valid_signature_is_accepted_and_invalid_rejected() {
    let secret = "webhook-secret";
    let h = harness(Some(secret), MemoryObjectStore::working());
    seed_job(&h, "vid-7").await;

    let body = br#"{"video_id":"vid-7","status":"processing"}"#;
    let signature = sign(body, secret);

    assert!(h.reconciler.process(body, Some(&signature)).await.is_ok());

    let err = h
        .reconciler
        .process(body, Some("deadbeef"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "got {err:?}");

    let err = h.reconciler.process(body, None).await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "got {err:?}");
}

#[tokio::test]
async fn unsigned_events_accepted_only_without_secret() {
    let h = harness(None, MemoryObjectStore::working());
    seed_job(&h, "vid-8").await;

    let body = br#"{"video_id":"vid-8","status":"processing"}"#;
    assert!(h.reconciler.process(body, None).await.is_ok());
}

#[tokio::test]
async fn unparseable_body_is_a_validation_error() {
    let h = harness(None, MemoryObjectStore::working());

    let err = h.reconciler.process(b"not json at all", None).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");

    let err = h
        .reconciler
        .process(br#"{"status":"completed"}"#, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
}
