//! Shared fakes for the integration tests: a browser launcher whose sessions
//! serve canned HTML by URL, and a helper wiring a catalog over it.

#![allow(dead_code)]

use async_trait::async_trait;
use rust_doujin_scraper::browser::{
    BrowserError, BrowserPool, BrowserSession, SessionLauncher, SessionOptions,
};
use rust_doujin_scraper::cache::MemoryCache;
use rust_doujin_scraper::catalog::Catalog;
use rust_doujin_scraper::db::MemoryStore;
use rust_doujin_scraper::http_client::{EnhancedHttpClient, HttpClientConfig};
use rust_doujin_scraper::ingest::IngestConfig;
use rust_doujin_scraper::scraper::{ScrapeTimeouts, Scraper};
use rust_doujin_scraper::storage::MemoryStorage;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BASE: &str = "https://doujin.test";

#[derive(Clone, Default)]
pub struct Page {
    pub title: String,
    pub html: String,
}

/// Launches sessions that answer navigation from a fixed URL → page map.
#[derive(Default)]
pub struct FakeLauncher {
    pages: Arc<HashMap<String, Page>>,
    pub launches: AtomicUsize,
    pub navigations: Arc<AtomicUsize>,
    navigation_delay: Duration,
}

impl FakeLauncher {
    pub fn new(pages: HashMap<String, Page>) -> Self {
        Self {
            pages: Arc::new(pages),
            ..Self::default()
        }
    }

    pub fn with_navigation_delay(mut self, delay: Duration) -> Self {
        self.navigation_delay = delay;
        self
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn navigation_count(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            pages: Arc::clone(&self.pages),
            navigations: Arc::clone(&self.navigations),
            delay: self.navigation_delay,
            current: Mutex::new(None),
        }))
    }
}

pub struct FakeSession {
    pages: Arc<HashMap<String, Page>>,
    navigations: Arc<AtomicUsize>,
    delay: Duration,
    current: Mutex<Option<String>>,
}

impl FakeSession {
    fn page(&self) -> Result<Page, BrowserError> {
        let current = self.current.lock().unwrap().clone();
        current
            .and_then(|url| self.pages.get(&url).cloned())
            .ok_or_else(|| BrowserError::HtmlExtractionError("nothing loaded".to_string()))
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn prepare(&self, _options: &SessionOptions) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        self.navigations.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if !self.pages.contains_key(url) {
            return Err(BrowserError::NavigationError(format!("no page at {}", url)));
        }
        *self.current.lock().unwrap() = Some(url.to_string());
        Ok(())
    }

    async fn wait_for(&self, selector: &str, _timeout: Duration) -> Result<(), BrowserError> {
        let page = self.page()?;
        let sel = Selector::parse(selector)
            .map_err(|e| BrowserError::JavaScriptError(format!("{:?}", e)))?;
        if Html::parse_document(&page.html).select(&sel).next().is_some() {
            Ok(())
        } else {
            Err(BrowserError::Timeout(selector.to_string()))
        }
    }

    async fn content(&self) -> Result<String, BrowserError> {
        Ok(self.page()?.html)
    }

    async fn title(&self) -> Result<String, BrowserError> {
        Ok(self.page()?.title)
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.current
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| BrowserError::SessionClosed("nothing loaded".to_string()))
    }

    async fn document_bytes(&self, _timeout: Duration) -> Result<Vec<u8>, BrowserError> {
        Ok(self.page()?.html.into_bytes())
    }

    fn is_alive(&self) -> bool {
        true
    }
}

pub fn page(title: &str, html: impl Into<String>) -> Page {
    Page {
        title: title.to_string(),
        html: html.into(),
    }
}

/// A listing/search page with `titles` as entries and `total_pages` pages.
pub fn listing_html(titles: &[&str], total_pages: u32) -> String {
    let entries: String = titles
        .iter()
        .map(|t| {
            let slug = t.to_lowercase().replace(' ', "-");
            format!(
                r#"<article class="entry"><a href="/manga/{slug}/"><img src="https://img.test/{slug}.jpg"><h3 class="title">{t}</h3></a></article>"#
            )
        })
        .collect();
    let pagination: String = (1..=total_pages).map(|n| format!("<a>{}</a>", n)).collect();
    format!(
        r#"<html><body><div class="entries">{entries}</div><nav class="pagination">{pagination}</nav></body></html>"#
    )
}

/// A chapter reader page showing `images`.
pub fn reader_html(images: &[String]) -> String {
    let imgs: String = images.iter().map(|src| format!(r#"<img src="{}">"#, src)).collect();
    format!(r#"<html><body><div class="reader-area">{imgs}</div></body></html>"#)
}

pub fn fast_fetcher() -> Arc<EnhancedHttpClient> {
    Arc::new(
        EnhancedHttpClient::with_config(HttpClientConfig {
            timeout: Duration::from_secs(5),
            max_retries: 1,
            initial_retry_delay: Duration::from_millis(10),
            ..HttpClientConfig::default()
        })
        .unwrap(),
    )
}

pub fn fast_ingest() -> IngestConfig {
    IngestConfig {
        batch_size: 3,
        max_retries: 1,
        retry_delay: Duration::from_millis(10),
    }
}

pub struct Harness {
    pub launcher: Arc<FakeLauncher>,
    pub pool: Arc<BrowserPool>,
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MemoryStorage>,
    pub cache: Arc<MemoryCache>,
    pub catalog: Catalog,
}

/// Catalog over fake sessions serving `pages`, with in-memory store and storage.
pub fn harness(pages: HashMap<String, Page>) -> Harness {
    let launcher = Arc::new(FakeLauncher::new(pages));
    let pool = BrowserPool::with_poll_interval(launcher.clone(), 2, Duration::from_millis(10));
    let store = Arc::new(MemoryStore::new());
    let storage = Arc::new(MemoryStorage::new("memory://cdn"));
    let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
    let scraper = Arc::new(Scraper::new(
        Arc::clone(&pool),
        BASE,
        "test-agent",
        ScrapeTimeouts {
            navigation: Duration::from_secs(1),
            marker: Duration::from_secs(1),
            image: Duration::from_secs(1),
        },
    ));
    let catalog = Catalog::new(
        scraper,
        fast_fetcher(),
        storage.clone(),
        store.clone(),
        Arc::clone(&cache),
        fast_ingest(),
    );
    Harness {
        launcher,
        pool,
        store,
        storage,
        cache,
        catalog,
    }
}
