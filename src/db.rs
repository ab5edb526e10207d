//! Persistent store: the durable tier for ingested comics and re-hosted images
//!
//! [`ComicStore`] is the seam. [`crate::pg_db::PgStore`] is the production
//! implementation; [`MemoryStore`] backs tests and runs without a database.

use crate::models::{ComicRecord, ThumbnailRecord};
use async_trait::async_trait;
use log::warn;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

pub const PERSIST_ATTEMPTS: usize = 3;
pub const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait ComicStore: Send + Sync {
    async fn get_comic(&self, slug: &str) -> Result<Option<ComicRecord>, StoreError>;

    /// Insert or replace the record for `record.slug`.
    async fn upsert_comic(&self, record: &ComicRecord) -> Result<(), StoreError>;

    async fn get_thumbnail(&self, filename: &str) -> Result<Option<ThumbnailRecord>, StoreError>;

    /// Insert or replace the record for `record.filename`.
    async fn upsert_thumbnail(&self, record: &ThumbnailRecord) -> Result<(), StoreError>;
}

/// Run a store operation up to [`PERSIST_ATTEMPTS`] times with linear backoff.
pub async fn with_retry<T, F, Fut>(label: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    with_retry_config(label, PERSIST_ATTEMPTS, PERSIST_RETRY_DELAY, &mut op).await
}

pub async fn with_retry_config<T, F, Fut>(
    label: &str,
    attempts: usize,
    delay: Duration,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!("[db] {} failed (attempt {}/{}): {}", label, attempt, attempts, e);
                tokio::time::sleep(delay * attempt as u32).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    comics: RwLock<HashMap<String, ComicRecord>>,
    thumbnails: RwLock<HashMap<String, ThumbnailRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail, to exercise degraded persistence.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn comic_count(&self) -> usize {
        self.comics.read().await.len()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Other("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ComicStore for MemoryStore {
    async fn get_comic(&self, slug: &str) -> Result<Option<ComicRecord>, StoreError> {
        Ok(self.comics.read().await.get(slug).cloned())
    }

    async fn upsert_comic(&self, record: &ComicRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        self.comics
            .write()
            .await
            .insert(record.slug.clone(), record.clone());
        Ok(())
    }

    async fn get_thumbnail(&self, filename: &str) -> Result<Option<ThumbnailRecord>, StoreError> {
        Ok(self.thumbnails.read().await.get(filename).cloned())
    }

    async fn upsert_thumbnail(&self, record: &ThumbnailRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        self.thumbnails
            .write()
            .await
            .insert(record.filename.clone(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let record = ComicRecord::new("abc", "https://example.com/abc/", vec!["u1".into()]);
        store.upsert_comic(&record).await.unwrap();
        store.upsert_comic(&record).await.unwrap();
        assert_eq!(store.comic_count().await, 1);
        let stored = store.get_comic("abc").await.unwrap().unwrap();
        assert_eq!(stored.image_url, vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn test_with_retry_recovers() {
        let calls = AtomicUsize::new(0);
        let result = with_retry_config("flaky", 3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Other("busy".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry_config("down", 3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Other("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let record = ThumbnailRecord::new("a.jpg", "https://x/a.jpg", "https://cdn/a.jpg");
        assert!(store.upsert_thumbnail(&record).await.is_err());
        assert!(store.get_thumbnail("a.jpg").await.unwrap().is_none());
    }
}
