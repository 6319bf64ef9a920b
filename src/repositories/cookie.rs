use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::{Row, types::Json};
use uuid::Uuid;

use crate::{
    error::Result,
    models::cookie::{CookieBundle, CookieRecord, CookieVersion, WebsiteCookieBundle},
};

/// Data-access contract for uploaded cookie bundles.
#[async_trait]
pub trait CookieRepository: Send + Sync {
    /// Stores a new flat bundle.
    async fn insert_bundle(&self, uploaded_by: Uuid, cookies: Vec<CookieRecord>) -> Result<CookieBundle>;

    /// The most recently uploaded flat bundle.
    async fn latest_bundle(&self) -> Result<Option<CookieBundle>>;

    /// Finds a flat bundle by ID.
    async fn find_bundle(&self, id: Uuid) -> Result<Option<CookieBundle>>;

    /// Lists flat bundles, newest first.
    async fn list_bundles(&self, limit: i64) -> Result<Vec<CookieBundle>>;

    /// Creates the website's bundle or rolls it forward one version.
    async fn save_website_bundle(
        &self,
        website: &str,
        cookies: Vec<CookieRecord>,
        uploaded_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<WebsiteCookieBundle>;

    /// Finds the bundle for an already-normalized website.
    async fn find_website_bundle(&self, website: &str) -> Result<Option<WebsiteCookieBundle>>;

    /// Lists every website bundle, by website.
    async fn list_website_bundles(&self) -> Result<Vec<WebsiteCookieBundle>>;

    /// Deletes a website bundle; returns whether one existed.
    async fn delete_website_bundle(&self, website: &str) -> Result<bool>;
}

/// PostgreSQL-backed `CookieRepository`; cookie arrays live in JSONB columns.
#[derive(Clone)]
pub struct PgCookieRepository {
    pool: Pool,
}

impl PgCookieRepository {
    /// Creates a repository over `pool`.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn row_to_bundle(row: &Row) -> Result<CookieBundle> {
    let cookies: Json<Vec<CookieRecord>> = row.try_get("cookies")?;
    Ok(CookieBundle {
        id: row.try_get("id")?,
        uploaded_by: row.try_get("uploaded_by")?,
        cookies: cookies.0,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_website_bundle(row: &Row) -> Result<WebsiteCookieBundle> {
    let cookies: Json<Vec<CookieRecord>> = row.try_get("cookies")?;
    let previous_versions: Json<Vec<CookieVersion>> = row.try_get("previous_versions")?;
    Ok(WebsiteCookieBundle {
        website: row.try_get("website")?,
        cookies: cookies.0,
        version: row.try_get("version")?,
        previous_versions: previous_versions.0,
        uploaded_by: row.try_get("uploaded_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const WEBSITE_BUNDLE_COLUMNS: &str =
    "website, cookies, version, previous_versions, uploaded_by, created_at, updated_at";

#[async_trait]
impl CookieRepository for PgCookieRepository {
    async fn insert_bundle(&self, uploaded_by: Uuid, cookies: Vec<CookieRecord>) -> Result<CookieBundle> {
        let client = self.pool.get().await?;
        let id = Uuid::new_v4();
        let row = client
            .query_one(
                r#"
                INSERT INTO cookie_bundles (id, uploaded_by, cookies)
                VALUES ($1, $2, $3)
                RETURNING id, uploaded_by, cookies, created_at
                "#,
                &[&id, &uploaded_by, &Json(&cookies)],
            )
            .await?;
        row_to_bundle(&row)
    }

    async fn latest_bundle(&self) -> Result<Option<CookieBundle>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id, uploaded_by, cookies, created_at
                FROM cookie_bundles
                ORDER BY created_at DESC
                LIMIT 1
                "#,
                &[],
            )
            .await?;
        row.as_ref().map(row_to_bundle).transpose()
    }

    async fn find_bundle(&self, id: Uuid) -> Result<Option<CookieBundle>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, uploaded_by, cookies, created_at FROM cookie_bundles WHERE id = $1",
                &[&id],
            )
            .await?;
        row.as_ref().map(row_to_bundle).transpose()
    }

    async fn list_bundles(&self, limit: i64) -> Result<Vec<CookieBundle>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT id, uploaded_by, cookies, created_at
                FROM cookie_bundles
                ORDER BY created_at DESC
                LIMIT $1
                "#,
                &[&limit],
            )
            .await?;
        rows.iter().map(row_to_bundle).collect()
    }

    async fn save_website_bundle(
        &self,
        website: &str,
        cookies: Vec<CookieRecord>,
        uploaded_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<WebsiteCookieBundle> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // A concurrent first upload blocks here until the other insert commits.
        let fresh = WebsiteCookieBundle::new(website.to_string(), cookies.clone(), uploaded_by, now);
        let inserted = tx
            .execute(
                r#"
                INSERT INTO website_cookie_bundles
                    (website, cookies, version, previous_versions, uploaded_by, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (website) DO NOTHING
                "#,
                &[
                    &website,
                    &Json(&fresh.cookies),
                    &fresh.version,
                    &Json(&fresh.previous_versions),
                    &fresh.uploaded_by,
                    &fresh.created_at,
                    &fresh.updated_at,
                ],
            )
            .await?;

        let bundle = if inserted == 1 {
            fresh
        } else {
            let row = tx
                .query_one(
                    &format!(
                        "SELECT {WEBSITE_BUNDLE_COLUMNS} FROM website_cookie_bundles \
                         WHERE website = $1 FOR UPDATE"
                    ),
                    &[&website],
                )
                .await?;
            let mut bundle = row_to_website_bundle(&row)?;
            bundle.roll_forward(cookies, uploaded_by, now);
            tx.execute(
                r#"
                UPDATE website_cookie_bundles
                SET cookies = $2, version = $3, previous_versions = $4,
                    uploaded_by = $5, updated_at = $6
                WHERE website = $1
                "#,
                &[
                    &website,
                    &Json(&bundle.cookies),
                    &bundle.version,
                    &Json(&bundle.previous_versions),
                    &bundle.uploaded_by,
                    &bundle.updated_at,
                ],
            )
            .await?;
            bundle
        };

        tx.commit().await?;
        Ok(bundle)
    }

    async fn find_website_bundle(&self, website: &str) -> Result<Option<WebsiteCookieBundle>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {WEBSITE_BUNDLE_COLUMNS} FROM website_cookie_bundles WHERE website = $1"),
                &[&website],
            )
            .await?;
        row.as_ref().map(row_to_website_bundle).transpose()
    }

    async fn list_website_bundles(&self) -> Result<Vec<WebsiteCookieBundle>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!("SELECT {WEBSITE_BUNDLE_COLUMNS} FROM website_cookie_bundles ORDER BY website ASC"),
                &[],
            )
            .await?;
        rows.iter().map(row_to_website_bundle).collect()
    }

    async fn delete_website_bundle(&self, website: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM website_cookie_bundles WHERE website = $1", &[&website])
            .await?;
        Ok(deleted > 0)
    }
}
