//! Browser automation for pages that only render with JavaScript enabled
//!
//! Sessions are launched through a [`SessionLauncher`] and handed out by the
//! [`BrowserPool`]. Production uses [`ChromeLauncher`] (headless_chrome); tests
//! plug in their own launcher.
//!
//! # Example
//!
//! ```no_run
//! use rust_doujin_scraper::browser::{BrowserConfig, BrowserPool, ChromeLauncher, SessionOptions};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BrowserConfig::default();
//! let pool = BrowserPool::new(Arc::new(ChromeLauncher::new(config.clone())), config.pool_size);
//!
//! let session = pool.acquire().await;
//! session.prepare(&SessionOptions::scraping(&config.user_agent, "https://example.com/")).await?;
//! session.navigate("https://example.com", Duration::from_secs(10)).await?;
//! session.wait_for("h1", Duration::from_secs(5)).await?;
//! let html = session.content().await?;
//!
//! println!("Extracted {} bytes of HTML", html.len());
//! # Ok(())
//! # }
//! ```

pub mod chrome;
pub mod config;
pub mod manager;
pub mod session;

pub use chrome::ChromeLauncher;
pub use config::BrowserConfig;
pub use manager::{BrowserPool, PoolStats, PooledSession};
pub use session::{BrowserError, BrowserSession, SessionLauncher, SessionOptions};
