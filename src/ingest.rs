//! Image ingestion: fetch source images, upload them, record the mapping
//!
//! Images are processed in fixed-size batches; batches run one after another
//! and the images inside a batch run concurrently. A failed image never fails
//! its batch or the comic.

use crate::db::{self, ComicStore};
use crate::error::ScrapeError;
use crate::helpers::{content_type_for, destination_path, image_extension};
use crate::http_client::EnhancedHttpClient;
use crate::models::ComicRecord;
use crate::storage::ObjectStorage;
use futures::future::join_all;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub batch_size: usize,
    /// Extra attempts per image after the first
    pub max_retries: usize,
    /// Linear backoff unit: attempt N waits N * retry_delay
    pub retry_delay: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// CDN URLs of the images that made it, in page order
    pub uploaded: Vec<String>,
    pub failed: usize,
    /// Whether a record was written
    pub persisted: bool,
    pub warning: Option<String>,
}

pub struct Ingestor {
    fetcher: Arc<EnhancedHttpClient>,
    storage: Arc<dyn ObjectStorage>,
    store: Arc<dyn ComicStore>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        fetcher: Arc<EnhancedHttpClient>,
        storage: Arc<dyn ObjectStorage>,
        store: Arc<dyn ComicStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            fetcher,
            storage,
            store,
            config,
        }
    }

    async fn upload_once(&self, slug: &str, index: usize, url: &str, referer: &str) -> Result<String, ScrapeError> {
        let fetched = self.fetcher.fetch_bytes(url, Some(referer)).await?;
        let path = destination_path(slug, index, url);
        let content_type = fetched
            .content_type
            .filter(|ct| ct.starts_with("image/"))
            .unwrap_or_else(|| content_type_for(&image_extension(url)).to_string());
        Ok(self.storage.put(fetched.bytes, &path, &content_type).await?)
    }

    /// One image with its own retry budget.
    async fn ingest_image(&self, slug: &str, index: usize, url: &str, referer: &str) -> Option<String> {
        let attempts = self.config.max_retries + 1;
        for attempt in 1..=attempts {
            match self.upload_once(slug, index, url, referer).await {
                Ok(cdn_url) => return Some(cdn_url),
                Err(e) if attempt < attempts => {
                    warn!(
                        "[ingest] slug={} image {} attempt {}/{} failed: {}",
                        slug, index + 1, attempt, attempts, e
                    );
                    tokio::time::sleep(self.config.retry_delay * attempt as u32).await;
                }
                Err(e) => {
                    error!("[ingest] slug={} image {} dropped: {}", slug, index + 1, e);
                }
            }
        }
        None
    }

    /// Upload every image of `slug` and upsert its record when at least one
    /// upload succeeded. Persistence failures degrade to `persisted: false`.
    pub async fn ingest(&self, slug: &str, source_url: &str, image_urls: &[String]) -> IngestOutcome {
        let batch_size = self.config.batch_size.max(1);
        let mut slots: Vec<Option<String>> = Vec::with_capacity(image_urls.len());

        for (batch_no, batch) in image_urls.chunks(batch_size).enumerate() {
            let offset = batch_no * batch_size;
            let results = join_all(
                batch
                    .iter()
                    .enumerate()
                    .map(|(i, url)| self.ingest_image(slug, offset + i, url, source_url)),
            )
            .await;
            slots.extend(results);
        }

        let failed = slots.iter().filter(|s| s.is_none()).count();
        let uploaded: Vec<String> = slots.into_iter().flatten().collect();
        info!(
            "[ingest] slug={} uploaded {}/{} image(s)",
            slug,
            uploaded.len(),
            image_urls.len()
        );

        if uploaded.is_empty() {
            return IngestOutcome {
                uploaded,
                failed,
                persisted: false,
                warning: Some(if image_urls.is_empty() {
                    "no images found on the page".to_string()
                } else {
                    "no images could be uploaded".to_string()
                }),
            };
        }

        let mut warning = (failed > 0).then(|| {
            format!("{} of {} images failed to upload", failed, image_urls.len())
        });

        let record = ComicRecord::new(slug, source_url, uploaded.clone());
        let persisted = match db::with_retry("upsert comic", || self.store.upsert_comic(&record)).await {
            Ok(()) => true,
            Err(e) => {
                error!("[ingest] slug={} record not stored: {}", slug, e);
                let note = "images uploaded but not recorded";
                warning = Some(match warning {
                    Some(w) => format!("{}; {}", w, note),
                    None => note.to_string(),
                });
                false
            }
        };

        IngestOutcome {
            uploaded,
            failed,
            persisted,
            warning,
        }
    }
}
