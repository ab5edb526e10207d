//! Single-image re-hosting and the pass-through proxy
//!
//! `rehost` always persists: it loads the image through a browser session
//! (so hotlink protection sees a real page load), uploads it and records the
//! mapping. `proxy` only persists URLs that keep getting requested; until then
//! it streams bytes straight through.

use crate::cache::{proxy_key, MemoryCache};
use crate::db::{self, ComicStore};
use crate::error::ScrapeError;
use crate::helpers::{content_type_for, filename_from_url, image_extension, url_hash};
use crate::http_client::EnhancedHttpClient;
use crate::models::ThumbnailRecord;
use crate::scraper::Scraper;
use crate::storage::ObjectStorage;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Requests for one URL that are streamed before it gets persisted
pub const PROMOTE_AFTER: u32 = 3;

/// Request count for one proxied URL
struct Hits {
    count: u32,
    last_seen: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyOutcome {
    Redirect(String),
    Stream { bytes: Vec<u8>, content_type: String },
}

pub struct Rehoster {
    scraper: Arc<Scraper>,
    fetcher: Arc<EnhancedHttpClient>,
    storage: Arc<dyn ObjectStorage>,
    store: Arc<dyn ComicStore>,
    cache: Arc<MemoryCache>,
    hits: Mutex<HashMap<String, Hits>>,
}

fn require_http_url(url: &str) -> Result<(), ScrapeError> {
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(ScrapeError::InvalidInput(format!("not an http(s) url: {}", url))),
    }
}

impl Rehoster {
    pub fn new(
        scraper: Arc<Scraper>,
        fetcher: Arc<EnhancedHttpClient>,
        storage: Arc<dyn ObjectStorage>,
        store: Arc<dyn ComicStore>,
        cache: Arc<MemoryCache>,
    ) -> Self {
        Self {
            scraper,
            fetcher,
            storage,
            store,
            cache,
            hits: Mutex::new(HashMap::new()),
        }
    }

    async fn lookup(&self, filename: &str) -> Option<ThumbnailRecord> {
        match self.store.get_thumbnail(filename).await {
            Ok(found) => found,
            Err(e) => {
                warn!("[rehost] store lookup for {} failed: {}", filename, e);
                None
            }
        }
    }

    async fn record(&self, filename: &str, source_url: &str, cdn_url: &str) {
        let record = ThumbnailRecord::new(filename, source_url, cdn_url);
        if let Err(e) = db::with_retry("upsert thumbnail", || self.store.upsert_thumbnail(&record)).await {
            warn!("[rehost] {} uploaded but not recorded: {}", filename, e);
        }
    }

    /// Re-host `url` and return its CDN URL. Already re-hosted images are
    /// answered from the store.
    pub async fn rehost(&self, url: &str) -> Result<String, ScrapeError> {
        require_http_url(url)?;
        let filename = filename_from_url(url);
        if let Some(existing) = self.lookup(&filename).await {
            return Ok(existing.cdn_url);
        }

        let captured = self.scraper.capture_image(url).await?;
        let content_type = content_type_for(&image_extension(&captured.final_url));
        let path = format!("thumbnails/{}", filename);
        let cdn_url = self.storage.put(captured.bytes, &path, content_type).await?;
        self.record(&filename, url, &cdn_url).await;

        info!("[rehost] {} -> {}", url, cdn_url);
        Ok(cdn_url)
    }

    /// Count a request for `key`; returns how many came before it.
    fn count_hit(&self, key: &str) -> u32 {
        let mut hits = self.hits.lock().unwrap_or_else(|p| p.into_inner());
        let entry = hits.entry(key.to_string()).or_insert(Hits {
            count: 0,
            last_seen: Instant::now(),
        });
        let prior = entry.count;
        entry.count += 1;
        entry.last_seen = Instant::now();
        prior
    }

    fn forget_hits(&self, key: &str) {
        self.hits.lock().unwrap_or_else(|p| p.into_inner()).remove(key);
    }

    pub async fn proxy(&self, url: &str) -> Result<ProxyOutcome, ScrapeError> {
        require_http_url(url)?;
        let hash = url_hash(url);
        let cache_key = proxy_key(&hash);

        if let Some(cdn_url) = self.cache.get_as::<String>(&cache_key) {
            return Ok(ProxyOutcome::Redirect(cdn_url));
        }

        let ext = image_extension(url);
        let filename = format!("proxy-{}{}", hash, ext);
        if let Some(existing) = self.lookup(&filename).await {
            self.cache.set_as(cache_key, &existing.cdn_url);
            return Ok(ProxyOutcome::Redirect(existing.cdn_url));
        }

        let prior = self.count_hit(&hash);
        let fetched = self.fetcher.fetch_bytes(url, None).await?;
        let content_type = fetched
            .content_type
            .filter(|ct| ct.starts_with("image/"))
            .unwrap_or_else(|| content_type_for(&ext).to_string());

        if prior <= PROMOTE_AFTER {
            return Ok(ProxyOutcome::Stream {
                bytes: fetched.bytes,
                content_type,
            });
        }

        let path = format!("proxy/{}{}", hash, ext);
        let cdn_url = self.storage.put(fetched.bytes, &path, &content_type).await?;
        self.record(&filename, url, &cdn_url).await;
        self.cache.set_as(cache_key, &cdn_url);
        self.forget_hits(&hash);
        info!("[proxy] promoted {} after {} requests", url, prior + 1);
        Ok(ProxyOutcome::Redirect(cdn_url))
    }

    /// Forget URLs not requested within `idle`. Returns how many were dropped.
    pub fn prune_hits(&self, idle: Duration) -> usize {
        let mut hits = self.hits.lock().unwrap_or_else(|p| p.into_inner());
        let before = hits.len();
        hits.retain(|_, h| h.last_seen.elapsed() < idle);
        before - hits.len()
    }

    /// URLs currently being counted towards promotion
    pub fn tracked_urls(&self) -> usize {
        self.hits.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}
