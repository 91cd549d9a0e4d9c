//! Campaign assembly storage: a domain-shaped transaction over the
//! minimal execute / insert-returning-id / commit / rollback surface.
//! Every insert the assembler performs goes through one [`AssemblyTx`],
//! so either all of a campaign's rows land or none do.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row, Transaction};

use promobot_common::Error;
use promobot_common::models::{ContentKind, ContentSource, Offer};

#[async_trait]
pub trait AssemblyTx: Send {
    async fn insert_persona(&mut self, title: &str) -> Result<i64, Error>;

    async fn insert_pain_point(&mut self, text: &str, persona_id: i64) -> Result<i64, Error>;

    async fn insert_script(&mut self, text: &str) -> Result<i64, Error>;

    async fn insert_campaign(
        &mut self,
        name: &str,
        description: &str,
        persona_id: i64,
        status: &str,
    ) -> Result<i64, Error>;

    /// Wire the campaign to its offer/persona/pain-point/script rows.
    async fn link_campaign(
        &mut self,
        campaign_id: i64,
        offer_id: i64,
        persona_id: i64,
        pain_point_id: i64,
        script_id: i64,
        cta_link: Option<&str>,
    ) -> Result<(), Error>;

    async fn attach_platform(
        &mut self,
        campaign_id: i64,
        platform: &str,
        enabled: bool,
    ) -> Result<(), Error>;

    async fn insert_content(
        &mut self,
        campaign_id: i64,
        kind: ContentKind,
        text: Option<&str>,
        asset_id: Option<i64>,
        source: ContentSource,
    ) -> Result<i64, Error>;

    async fn commit(self: Box<Self>) -> Result<(), Error>;

    async fn rollback(self: Box<Self>) -> Result<(), Error>;
}

#[async_trait]
pub trait AssemblyStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn AssemblyTx>, Error>;

    async fn get_offer(&self, offer_id: i64) -> Result<Option<Offer>, Error>;

    async fn create_offer(
        &self,
        title: &str,
        description: &str,
        link_url: Option<&str>,
    ) -> Result<Offer, Error>;
}

#[derive(Clone)]
pub struct PostgresAssemblyStore {
    pool: Pool<Postgres>,
}

impl PostgresAssemblyStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssemblyStore for PostgresAssemblyStore {
    async fn begin(&self) -> Result<Box<dyn AssemblyTx>, Error> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresAssemblyTx { tx }))
    }

    async fn get_offer(&self, offer_id: i64) -> Result<Option<Offer>, Error> {
        let row = sqlx::query(
            r#"
            SELECT offer_id, title, description, link_url
            FROM offers
            WHERE offer_id = $1
            "#,
        )
        .bind(offer_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(r) = row {
            Ok(Some(Offer {
                offer_id: r.try_get("offer_id")?,
                title: r.try_get("title")?,
                description: r
                    .try_get::<Option<String>, _>("description")?
                    .unwrap_or_default(),
                link_url: r.try_get("link_url")?,
            }))
        } else {
            Ok(None)
        }
    }

    async fn create_offer(
        &self,
        title: &str,
        description: &str,
        link_url: Option<&str>,
    ) -> Result<Offer, Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO offers (title, description, link_url, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING offer_id
            "#,
        )
        .bind(title)
        .bind(description)
        .bind(link_url)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(Offer {
            offer_id: row.try_get("offer_id")?,
            title: title.to_string(),
            description: description.to_string(),
            link_url: link_url.map(str::to_string),
        })
    }
}

pub struct PostgresAssemblyTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AssemblyTx for PostgresAssemblyTx {
    async fn insert_persona(&mut self, title: &str) -> Result<i64, Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO personas (title, created_at)
            VALUES ($1, $2)
            RETURNING persona_id
            "#,
        )
        .bind(title)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("persona_id")?)
    }

    async fn insert_pain_point(&mut self, text: &str, persona_id: i64) -> Result<i64, Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO pain_points (text, persona_id, created_at)
            VALUES ($1, $2, $3)
            RETURNING pain_point_id
            "#,
        )
        .bind(text)
        .bind(persona_id)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("pain_point_id")?)
    }

    async fn insert_script(&mut self, text: &str) -> Result<i64, Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO scripts (text, status, created_at)
            VALUES ($1, 'draft', $2)
            RETURNING script_id
            "#,
        )
        .bind(text)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("script_id")?)
    }

    async fn insert_campaign(
        &mut self,
        name: &str,
        description: &str,
        persona_id: i64,
        status: &str,
    ) -> Result<i64, Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO campaigns (name, description, persona_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING campaign_id
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(persona_id)
        .bind(status)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("campaign_id")?)
    }

    async fn link_campaign(
        &mut self,
        campaign_id: i64,
        offer_id: i64,
        persona_id: i64,
        pain_point_id: i64,
        script_id: i64,
        cta_link: Option<&str>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET offer_id = $1,
                persona_id = $2,
                pain_point_id = $3,
                primary_script_id = $4,
                cta_link = $5
            WHERE campaign_id = $6
            "#,
        )
        .bind(offer_id)
        .bind(persona_id)
        .bind(pain_point_id)
        .bind(script_id)
        .bind(cta_link)
        .bind(campaign_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn attach_platform(
        &mut self,
        campaign_id: i64,
        platform: &str,
        enabled: bool,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO campaign_platforms (campaign_id, platform, enabled)
            VALUES ($1, $2, $3)
            ON CONFLICT (campaign_id, platform) DO NOTHING
            "#,
        )
        .bind(campaign_id)
        .bind(platform)
        .bind(enabled)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_content(
        &mut self,
        campaign_id: i64,
        kind: ContentKind,
        text: Option<&str>,
        asset_id: Option<i64>,
        source: ContentSource,
    ) -> Result<i64, Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO campaign_content (campaign_id, content_type, text, asset_id, source, status, created_at)
            VALUES ($1, $2, $3, $4, $5, 'draft', $6)
            RETURNING content_id
            "#,
        )
        .bind(campaign_id)
        .bind(kind.as_str())
        .bind(text)
        .bind(asset_id)
        .bind(source.as_str())
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("content_id")?)
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), Error> {
        self.tx.rollback().await?;
        Ok(())
    }
}
