//! Shared state for the Actix-web server
//!
//! `AppState` is wrapped in `web::Data` and owns everything handlers touch:
//! the browser pool, the cache, the catalog built over them, the batch lock
//! and the rate limiter. Nothing lives in globals.

use crate::batch::BatchLock;
use crate::browser::{BrowserPool, SessionLauncher};
use crate::cache::MemoryCache;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::db::ComicStore;
use crate::rate_limit::RateLimiter;
use crate::scraper::Scraper;
use crate::storage::ObjectStorage;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct AppState {
    pub config: Config,
    /// Pooled browser sessions shared by every scrape
    pub pool: Arc<BrowserPool>,
    pub cache: Arc<MemoryCache>,
    pub catalog: Arc<Catalog>,
    /// At most one batch job process-wide
    pub batch_lock: Arc<BatchLock>,
    pub rate_limiter: RateLimiter,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the server's components from `config`. The pool is created empty;
    /// sessions launch on `pool.initialize()` or on first use.
    pub fn new(
        config: Config,
        launcher: Arc<dyn SessionLauncher>,
        store: Arc<dyn ComicStore>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Result<Self, reqwest::Error> {
        let pool = BrowserPool::new(launcher, config.browser.pool_size);
        let fetcher = Arc::new(config.fetch.create_http_client(&config.browser.user_agent)?);
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(config.cache.ttl_secs)));
        let scraper = Arc::new(Scraper::new(
            Arc::clone(&pool),
            &config.site.base_url,
            &config.browser.user_agent,
            config.scrape_timeouts(),
        ));
        let catalog = Arc::new(Catalog::new(
            scraper,
            fetcher,
            storage,
            store,
            Arc::clone(&cache),
            config.ingest.ingest_config(),
        ));
        let rate_limiter = RateLimiter::new(
            Duration::from_secs(config.rate_limit.window_secs),
            config.rate_limit.max_requests,
        );

        Ok(Self {
            config,
            pool,
            cache,
            catalog,
            batch_lock: BatchLock::new(),
            rate_limiter,
            started_at: Instant::now(),
        })
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
