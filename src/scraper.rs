//! Scrape operations over pooled browser sessions
//!
//! Each operation checks a session out of the pool, prepares it, navigates,
//! waits for the page's content marker and extracts records. The session goes
//! back to the pool when the [`PooledSession`] guard drops, on every path.

use crate::browser::{BrowserError, BrowserPool, PooledSession, SessionOptions};
use crate::error::ScrapeError;
use crate::models::{ComicDetail, ListingPage};
use crate::sources::doujin;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct ScrapeTimeouts {
    pub navigation: Duration,
    pub marker: Duration,
    /// Navigation plus byte capture for a single image
    pub image: Duration,
}

impl Default for ScrapeTimeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(10),
            marker: Duration::from_secs(10),
            image: Duration::from_secs(20),
        }
    }
}

/// Raw bytes of an image loaded through a browser session
#[derive(Debug, Clone)]
pub struct CapturedImage {
    /// URL after redirects
    pub final_url: String,
    pub bytes: Vec<u8>,
}

pub struct Scraper {
    pool: Arc<BrowserPool>,
    base_url: String,
    user_agent: String,
    timeouts: ScrapeTimeouts,
}

impl Scraper {
    pub fn new(pool: Arc<BrowserPool>, base_url: &str, user_agent: &str, timeouts: ScrapeTimeouts) -> Self {
        Self {
            pool,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
            timeouts,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn referer(&self) -> String {
        format!("{}/", self.base_url)
    }

    async fn checkout(&self, options: SessionOptions) -> Result<PooledSession, ScrapeError> {
        let session = self.pool.acquire().await;
        session.prepare(&options).await?;
        Ok(session)
    }

    async fn wait_for_marker(
        &self,
        session: &PooledSession,
        marker: &str,
        url: &str,
    ) -> Result<(), ScrapeError> {
        match session.wait_for(marker, self.timeouts.marker).await {
            Ok(()) => Ok(()),
            Err(BrowserError::Timeout(_)) => {
                warn!("[scrape] marker {} never appeared at {}", marker, url);
                Err(ScrapeError::Structural {
                    marker: marker.to_string(),
                    url: url.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Navigate with resources blocked, wait for `marker`, return the HTML.
    async fn render(&self, url: &str, marker: &str) -> Result<String, ScrapeError> {
        let session = self
            .checkout(SessionOptions::scraping(&self.user_agent, &self.referer()))
            .await?;
        debug!("[scrape] loading {}", url);
        session.navigate(url, self.timeouts.navigation).await?;
        self.wait_for_marker(&session, marker, url).await?;
        Ok(session.content().await?)
    }

    /// Listing page `page` (as given by the client; validated here).
    pub async fn listing(&self, page: &str) -> Result<ListingPage, ScrapeError> {
        let url = doujin::listing_url(&self.base_url, page)?;
        let html = self.render(&url, doujin::LISTING_MARKER).await?;
        let base = self.base_url.clone();
        let listing = tokio::task::spawn_blocking(move || doujin::parse_listing(&html, &base)).await?;
        info!("[scrape] listing page {}: {} entries", page, listing.data.len());
        Ok(listing)
    }

    pub async fn search(&self, query: &str, page: u32) -> Result<ListingPage, ScrapeError> {
        if query.trim().is_empty() {
            return Err(ScrapeError::InvalidInput("empty search query".to_string()));
        }
        let url = doujin::search_url(&self.base_url, query, page);
        let html = self.render(&url, doujin::LISTING_MARKER).await?;
        let base = self.base_url.clone();
        let results = tokio::task::spawn_blocking(move || doujin::parse_listing(&html, &base)).await?;
        info!("[scrape] search {:?} page {}: {} results", query, page, results.data.len());
        Ok(results)
    }

    /// Detail page for a slug or absolute URL. Metadata and chapters are
    /// parsed concurrently from the one loaded page.
    pub async fn detail(&self, input: &str) -> Result<ComicDetail, ScrapeError> {
        let slug = doujin::resolve_slug(input)?;
        let url = doujin::detail_url(&self.base_url, &slug);
        let html = Arc::new(self.render(&url, doujin::DETAIL_MARKER).await?);

        let meta_html = Arc::clone(&html);
        let base = self.base_url.clone();
        let (meta, chapters) = tokio::join!(
            tokio::task::spawn_blocking(move || doujin::parse_detail_metadata(&meta_html)),
            tokio::task::spawn_blocking(move || doujin::parse_chapters(&html, &base)),
        );
        Ok(doujin::assemble_detail(&slug, meta?, chapters?))
    }

    /// Source image URLs of a chapter page. Images are allowed to load.
    pub async fn comic_images(&self, slug: &str) -> Result<Vec<String>, ScrapeError> {
        let url = doujin::comic_url(&self.base_url, slug);
        let session = self
            .checkout(SessionOptions::full_render(&self.user_agent, &self.referer()))
            .await?;
        session.navigate(&url, self.timeouts.navigation).await?;

        let title = session.title().await?;
        if doujin::is_not_found_title(&title) {
            info!("[scrape] {} reported missing ({})", slug, title);
            return Err(ScrapeError::NotFound(slug.to_string()));
        }

        self.wait_for_marker(&session, doujin::READER_MARKER, &url).await?;
        let html = session.content().await?;
        drop(session);

        let images = tokio::task::spawn_blocking(move || doujin::parse_reader_images(&html)).await?;
        info!("[scrape] {}: {} image(s) found", slug, images.len());
        Ok(images)
    }

    /// Load an image URL in a browser session and read back its bytes.
    pub async fn capture_image(&self, image_url: &str) -> Result<CapturedImage, ScrapeError> {
        let session = self
            .checkout(SessionOptions::full_render(&self.user_agent, &self.referer()))
            .await?;
        session.navigate(image_url, self.timeouts.image).await?;
        let final_url = session.current_url().await?;
        let bytes = session.document_bytes(self.timeouts.image).await?;
        if bytes.is_empty() {
            return Err(ScrapeError::Network(format!("empty body from {}", final_url)));
        }
        Ok(CapturedImage { final_url, bytes })
    }
}
