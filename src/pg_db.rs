use crate::db::{ComicStore, StoreError};
use crate::models::{ComicRecord, ThumbnailRecord};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use log::info;
use tokio_postgres::NoTls;

/// PostgreSQL-backed [`ComicStore`]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Create the connection pool and make sure the tables exist
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        info!("Creating PostgreSQL connection pool...");

        let mut cfg = Config::new();
        cfg.url = Some(database_url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let store = Self { pool };
        store.create_tables().await?;
        info!("PostgreSQL connection pool created successfully");
        Ok(store)
    }

    async fn client(&self) -> Result<deadpool_postgres::Client, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }

    pub async fn create_tables(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS comics (
                    slug TEXT PRIMARY KEY,
                    source_url TEXT NOT NULL,
                    image_url TEXT[] NOT NULL,
                    total_images INTEGER NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                CREATE TABLE IF NOT EXISTS thumbnails (
                    filename TEXT PRIMARY KEY,
                    source_url TEXT NOT NULL,
                    cdn_url TEXT NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );",
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ComicStore for PgStore {
    async fn get_comic(&self, slug: &str) -> Result<Option<ComicRecord>, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT slug, source_url, image_url, total_images, updated_at FROM comics WHERE slug = $1",
                &[&slug],
            )
            .await?;

        Ok(row.map(|row| ComicRecord {
            slug: row.get(0),
            source_url: row.get(1),
            image_url: row.get(2),
            total_images: row.get(3),
            updated_at: row.get(4),
        }))
    }

    async fn upsert_comic(&self, record: &ComicRecord) -> Result<(), StoreError> {
        if record.image_url.is_empty() {
            return Err(StoreError::Other(format!(
                "refusing to store empty image list for {}",
                record.slug
            )));
        }
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO comics (slug, source_url, image_url, total_images, updated_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (slug) DO UPDATE SET
                    source_url = EXCLUDED.source_url,
                    image_url = EXCLUDED.image_url,
                    total_images = EXCLUDED.total_images,
                    updated_at = EXCLUDED.updated_at",
                &[
                    &record.slug,
                    &record.source_url,
                    &record.image_url,
                    &record.total_images,
                    &record.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_thumbnail(&self, filename: &str) -> Result<Option<ThumbnailRecord>, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT filename, source_url, cdn_url, updated_at FROM thumbnails WHERE filename = $1",
                &[&filename],
            )
            .await?;

        Ok(row.map(|row| ThumbnailRecord {
            filename: row.get(0),
            source_url: row.get(1),
            cdn_url: row.get(2),
            updated_at: row.get(3),
        }))
    }

    async fn upsert_thumbnail(&self, record: &ThumbnailRecord) -> Result<(), StoreError> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO thumbnails (filename, source_url, cdn_url, updated_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (filename) DO UPDATE SET
                    source_url = EXCLUDED.source_url,
                    cdn_url = EXCLUDED.cdn_url,
                    updated_at = EXCLUDED.updated_at",
                &[
                    &record.filename,
                    &record.source_url,
                    &record.cdn_url,
                    &record.updated_at,
                ],
            )
            .await?;
        Ok(())
    }
}
