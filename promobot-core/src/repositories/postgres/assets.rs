use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};

use promobot_common::Error;

#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Record a mirrored artifact; returns the new asset id.
    async fn insert_asset(
        &self,
        kind: &str,
        location: &str,
        url: Option<&str>,
    ) -> Result<i64, Error>;
}

#[derive(Clone)]
pub struct PostgresAssetRepository {
    pool: Pool<Postgres>,
}

impl PostgresAssetRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssetRepository for PostgresAssetRepository {
    async fn insert_asset(
        &self,
        kind: &str,
        location: &str,
        url: Option<&str>,
    ) -> Result<i64, Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO assets (type, location, url, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING asset_id
            "#,
        )
        .bind(kind)
        .bind(location)
        .bind(url.unwrap_or(location))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("asset_id")?)
    }
}
