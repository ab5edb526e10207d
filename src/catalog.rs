//! Cache-aware entry points used by the HTTP handlers and the batch jobs
//!
//! Reads go memory cache (or persistent store, for comics) first and fall back
//! to a live scrape. Successful scrapes populate the memory cache; ingestion
//! populates the store.

use crate::batch::ComicSource;
use crate::cache::{self, MemoryCache};
use crate::db::ComicStore;
use crate::error::ScrapeError;
use crate::http_client::EnhancedHttpClient;
use crate::ingest::{IngestConfig, Ingestor};
use crate::models::{ComicDetail, ComicRecord, ComicResponse, DataSource, ListingPage, Sourced};
use crate::rehost::{ProxyOutcome, Rehoster};
use crate::scraper::Scraper;
use crate::sources::doujin;
use crate::storage::ObjectStorage;
use async_trait::async_trait;
use log::{info, warn};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct Catalog {
    scraper: Arc<Scraper>,
    cache: Arc<MemoryCache>,
    store: Arc<dyn ComicStore>,
    ingestor: Ingestor,
    rehoster: Rehoster,
}

impl Catalog {
    pub fn new(
        scraper: Arc<Scraper>,
        fetcher: Arc<EnhancedHttpClient>,
        storage: Arc<dyn ObjectStorage>,
        store: Arc<dyn ComicStore>,
        cache: Arc<MemoryCache>,
        ingest: IngestConfig,
    ) -> Self {
        let ingestor = Ingestor::new(Arc::clone(&fetcher), Arc::clone(&storage), Arc::clone(&store), ingest);
        let rehoster = Rehoster::new(
            Arc::clone(&scraper),
            fetcher,
            storage,
            Arc::clone(&store),
            Arc::clone(&cache),
        );
        Self {
            scraper,
            cache,
            store,
            ingestor,
            rehoster,
        }
    }

    pub fn cache(&self) -> &MemoryCache {
        &self.cache
    }

    pub fn rehoster(&self) -> &Rehoster {
        &self.rehoster
    }

    pub async fn listing(&self, page: &str) -> Result<Sourced<ListingPage>, ScrapeError> {
        let key = cache::listing_key(page);
        if let Some(hit) = self.cache.get_as::<ListingPage>(&key) {
            return Ok(Sourced::new(hit, DataSource::Cache));
        }
        let listing = self.scraper.listing(page).await?;
        self.cache.set_as(key, &listing);
        Ok(Sourced::new(listing, DataSource::Fresh))
    }

    pub async fn search(&self, query: &str, page: u32) -> Result<Sourced<ListingPage>, ScrapeError> {
        let key = cache::search_key(query, page);
        if let Some(hit) = self.cache.get_as::<ListingPage>(&key) {
            return Ok(Sourced::new(hit, DataSource::Cache));
        }
        let results = self.scraper.search(query, page).await?;
        self.cache.set_as(key, &results);
        Ok(Sourced::new(results, DataSource::Fresh))
    }

    pub async fn detail(&self, input: &str) -> Result<Sourced<ComicDetail>, ScrapeError> {
        let slug = doujin::resolve_slug(input)?;
        let key = cache::detail_key(&slug);
        if let Some(hit) = self.cache.get_as::<ComicDetail>(&key) {
            return Ok(Sourced::new(hit, DataSource::Cache));
        }
        let detail = self.scraper.detail(&slug).await?;
        self.cache.set_as(key, &detail);
        Ok(Sourced::new(detail, DataSource::Fresh))
    }

    async fn stored_comic(&self, slug: &str) -> Option<ComicRecord> {
        match self.store.get_comic(slug).await {
            Ok(Some(record)) if !record.image_url.is_empty() => Some(record),
            Ok(_) => None,
            Err(e) => {
                warn!("[catalog] store lookup for {} failed: {}", slug, e);
                None
            }
        }
    }

    fn from_store(record: ComicRecord) -> ComicResponse {
        ComicResponse {
            success: true,
            images: record.image_url,
            cached: true,
            source: DataSource::Database,
            warning: None,
            persisted: None,
        }
    }

    /// Re-hosted images of a chapter: store, then memory cache, then scrape
    /// and ingest. A concurrent request may have stored the chapter while
    /// this one was failing, so the store is checked again before giving up.
    pub async fn get_comic(&self, input: &str) -> Result<ComicResponse, ScrapeError> {
        let slug = doujin::resolve_slug(input)?;

        if let Some(record) = self.stored_comic(&slug).await {
            return Ok(Self::from_store(record));
        }

        let key = cache::comic_key(&slug);
        if let Some(images) = self.cache.get_as::<Vec<String>>(&key) {
            return Ok(ComicResponse {
                success: true,
                images,
                cached: true,
                source: DataSource::Cache,
                warning: None,
                persisted: None,
            });
        }

        let source_url = doujin::comic_url(self.scraper.base_url(), &slug);
        let images = match self.scraper.comic_images(&slug).await {
            Ok(images) => images,
            Err(e) => {
                if let Some(record) = self.stored_comic(&slug).await {
                    info!("[catalog] {} stored by a concurrent request", slug);
                    return Ok(Self::from_store(record));
                }
                return Err(e);
            }
        };

        let outcome = self.ingestor.ingest(&slug, &source_url, &images).await;
        if outcome.uploaded.is_empty() {
            if let Some(record) = self.stored_comic(&slug).await {
                return Ok(Self::from_store(record));
            }
        } else {
            self.cache.set_as(key, &outcome.uploaded);
        }

        // Only flagged when there was something to store and storing it failed.
        let unrecorded = !outcome.uploaded.is_empty() && !outcome.persisted;
        Ok(ComicResponse {
            success: true,
            images: outcome.uploaded,
            cached: false,
            source: DataSource::Fresh,
            warning: outcome.warning,
            persisted: unrecorded.then_some(false),
        })
    }

    pub async fn rehost(&self, url: &str) -> Result<String, ScrapeError> {
        self.rehoster.rehost(url).await
    }

    pub async fn proxy(&self, url: &str) -> Result<ProxyOutcome, ScrapeError> {
        self.rehoster.proxy(url).await
    }
}

/// Shape of a search response as served to clients
pub fn listing_payload(listing: &Sourced<ListingPage>) -> Value {
    json!({
        "status": "success",
        "data": listing.value.data,
        "totalPages": listing.value.total_pages,
        "source": listing.source,
    })
}

#[async_trait]
impl ComicSource for Catalog {
    async fn search(&self, query: &str, page: u32) -> Result<ListingPage, ScrapeError> {
        Ok(Catalog::search(self, query, page).await?.value)
    }

    async fn search_payload(&self, query: &str, page: u32) -> Result<Value, ScrapeError> {
        Ok(listing_payload(&Catalog::search(self, query, page).await?))
    }

    async fn detail(&self, slug: &str) -> Result<ComicDetail, ScrapeError> {
        Ok(Catalog::detail(self, slug).await?.value)
    }

    async fn fetch_comic(&self, slug: &str) -> Result<ComicResponse, ScrapeError> {
        self.get_comic(slug).await
    }

    async fn rehost(&self, url: &str) -> Result<String, ScrapeError> {
        Catalog::rehost(self, url).await
    }
}
