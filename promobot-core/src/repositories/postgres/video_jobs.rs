use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};

use promobot_common::Error;
use promobot_common::models::{VideoJob, VideoJobStatus};

#[async_trait]
pub trait VideoJobRepository: Send + Sync {
    /// Insert the job, or refresh the non-status fields when a row for the
    /// provider id already exists (a webhook can race the submission).
    async fn upsert(&self, job: &VideoJob) -> Result<(), Error>;

    async fn get_by_provider_id(&self, provider_job_id: &str) -> Result<Option<VideoJob>, Error>;

    /// Write a status, skipping rows already in a terminal state.
    async fn set_status(
        &self,
        provider_job_id: &str,
        status: VideoJobStatus,
        error: Option<&str>,
    ) -> Result<(), Error>;

    /// Terminal completion write: records the mirrored asset and flips the
    /// status in one statement, also skipping already-terminal rows.
    async fn complete_with_asset(
        &self,
        provider_job_id: &str,
        asset_id: i64,
        asset_url: &str,
    ) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct PostgresVideoJobRepository {
    pool: Pool<Postgres>,
}

impl PostgresVideoJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_job(r: &sqlx::postgres::PgRow) -> Result<VideoJob, Error> {
    Ok(VideoJob {
        provider_job_id: r.try_get("provider_job_id")?,
        status: VideoJobStatus::from_str(&r.try_get::<String, _>("status")?)
            .map_err(Error::Platform)?,
        asset_id: r.try_get("asset_id")?,
        publication_id: r.try_get("publication_id")?,
        asset_url: r.try_get("asset_url")?,
        error: r.try_get("error")?,
        created_at: r.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: r.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl VideoJobRepository for PostgresVideoJobRepository {
    async fn upsert(&self, job: &VideoJob) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO video_jobs (
                provider_job_id,
                status,
                asset_id,
                publication_id,
                asset_url,
                error,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (provider_job_id) DO UPDATE
               SET publication_id = COALESCE(EXCLUDED.publication_id, video_jobs.publication_id),
                   updated_at     = EXCLUDED.updated_at
            "#,
        )
        .bind(&job.provider_job_id)
        .bind(job.status.to_string())
        .bind(job.asset_id)
        .bind(job.publication_id)
        .bind(&job.asset_url)
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_provider_id(&self, provider_job_id: &str) -> Result<Option<VideoJob>, Error> {
        let row = sqlx::query(
            r#"
            SELECT provider_job_id, status, asset_id, publication_id,
                   asset_url, error, created_at, updated_at
            FROM video_jobs
            WHERE provider_job_id = $1
            "#,
        )
        .bind(provider_job_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_job(&r)?)),
            None => Ok(None),
        }
    }

    async fn set_status(
        &self,
        provider_job_id: &str,
        status: VideoJobStatus,
        error: Option<&str>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE video_jobs
            SET status = $1,
                error = $2,
                updated_at = $3
            WHERE provider_job_id = $4
              AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(status.to_string())
        .bind(error)
        .bind(Utc::now())
        .bind(provider_job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_with_asset(
        &self,
        provider_job_id: &str,
        asset_id: i64,
        asset_url: &str,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE video_jobs
            SET status = 'completed',
                asset_id = $1,
                asset_url = $2,
                error = NULL,
                updated_at = $3
            WHERE provider_job_id = $4
              AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(asset_id)
        .bind(asset_url)
        .bind(Utc::now())
        .bind(provider_job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
