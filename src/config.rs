use crate::browser::BrowserConfig;
use crate::http_client::{EnhancedHttpClient, HttpClientConfig};
use crate::ingest::IngestConfig;
use crate::scraper::ScrapeTimeouts;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "DOUJIN_SCRAPER_CONFIG";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ingest: IngestSettings,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// First port tried
    #[serde(default = "default_port")]
    pub port: u16,
    /// Last port tried when earlier ones are taken
    #[serde(default = "default_port_end")]
    pub port_end: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    /// Root URL of the scraped site
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    /// Per-attempt deadline for image fetches, in seconds
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt
    #[serde(default = "default_fetch_retries")]
    pub max_retries: usize,

    /// First backoff in milliseconds; doubles on every retry
    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay_ms: u64,

    /// Deadline for loading and capturing a single image through the browser, in seconds
    #[serde(default = "default_fetch_timeout")]
    pub image_capture_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestSettings {
    /// Images uploaded at once
    #[serde(default = "default_concurrency")]
    pub batch_size: usize,
    #[serde(default = "default_ingest_retries")]
    pub max_retries: usize,
    #[serde(default = "default_ingest_retry_delay")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    /// Items processed at once within a chunk
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Chapters of one comic processed at once during auto-fetch
    #[serde(default = "default_chapter_batch")]
    pub chapter_batch: usize,
    /// Directory holding auto-json manifests
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: PathBuf,
    #[serde(default = "default_auto_fetch_timeout")]
    pub auto_fetch_timeout_ms: u64,
    #[serde(default = "default_auto_json_timeout")]
    pub auto_json_timeout_ms: u64,
    #[serde(default = "default_auto_thumbnail_timeout")]
    pub auto_thumbnail_timeout_ms: u64,
    /// Pause before retrying a transient chapter failure
    #[serde(default = "default_batch_retry_delay")]
    pub retry_delay_ms: u64,
    /// Pause after a manifest wave that made no progress
    #[serde(default = "default_stall_pause")]
    pub stall_pause_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_window")]
    pub window_secs: u64,
    /// Requests per window per client; 0 disables limiting
    #[serde(default = "default_rate_max")]
    pub max_requests: u32,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; the in-memory store is used when unset
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    #[default]
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Base of the URLs handed back to clients
    #[serde(default)]
    pub public_base_url: Option<String>,
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_port_end() -> u16 { 8090 }
fn default_base_url() -> String { "https://doujindesu.tv".to_string() }
fn default_fetch_timeout() -> u64 { 20 }
fn default_fetch_retries() -> usize { 3 }
fn default_initial_retry_delay() -> u64 { 1000 }
fn default_cache_ttl() -> u64 { 30 * 60 }
fn default_concurrency() -> usize { 3 }
fn default_ingest_retries() -> usize { 2 }
fn default_ingest_retry_delay() -> u64 { 1000 }
fn default_chapter_batch() -> usize { 5 }
fn default_manifest_dir() -> PathBuf { PathBuf::from("manifests") }
fn default_auto_fetch_timeout() -> u64 { 5 * 60 * 1000 }
fn default_auto_json_timeout() -> u64 { 7 * 24 * 60 * 60 * 1000 }
fn default_auto_thumbnail_timeout() -> u64 { 30 * 60 * 1000 }
fn default_batch_retry_delay() -> u64 { 2000 }
fn default_stall_pause() -> u64 { 30_000 }
fn default_rate_window() -> u64 { 60 }
fn default_rate_max() -> u32 { 120 }
fn default_bucket() -> String { "doujin-cdn".to_string() }
fn default_region() -> String { "auto".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            port_end: default_port_end(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_retries: default_fetch_retries(),
            initial_retry_delay_ms: default_initial_retry_delay(),
            image_capture_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: default_concurrency(),
            max_retries: default_ingest_retries(),
            retry_delay_ms: default_ingest_retry_delay(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            chapter_batch: default_chapter_batch(),
            manifest_dir: default_manifest_dir(),
            auto_fetch_timeout_ms: default_auto_fetch_timeout(),
            auto_json_timeout_ms: default_auto_json_timeout(),
            auto_thumbnail_timeout_ms: default_auto_thumbnail_timeout(),
            retry_delay_ms: default_batch_retry_delay(),
            stall_pause_ms: default_stall_pause(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_rate_window(),
            max_requests: default_rate_max(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            bucket: default_bucket(),
            region: default_region(),
            endpoint: None,
            public_base_url: None,
        }
    }
}

impl Config {
    /// Load `config.toml` (or the file named by `DOUJIN_SCRAPER_CONFIG`).
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Self {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());
        let mut config = Self::load_from(Path::new(&path));
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            if !url.trim().is_empty() {
                config.database.url = Some(url);
            }
        }
        config
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            log::warn!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<Config>(&content) {
                Ok(cfg) => cfg,
                Err(e) => {
                    log::warn!("Invalid config file {}: {}; using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Cannot read config file {}: {}; using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn scrape_timeouts(&self) -> ScrapeTimeouts {
        ScrapeTimeouts {
            navigation: self.browser.navigation_timeout(),
            marker: self.browser.marker_timeout(),
            image: Duration::from_secs(self.fetch.image_capture_timeout_secs),
        }
    }
}

impl FetchConfig {
    /// Create the image fetch client from this configuration
    pub fn create_http_client(&self, user_agent: &str) -> Result<EnhancedHttpClient, reqwest::Error> {
        EnhancedHttpClient::with_config(HttpClientConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            initial_retry_delay: Duration::from_millis(self.initial_retry_delay_ms),
            user_agent: user_agent.to_string(),
        })
    }
}

impl IngestSettings {
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}
