//! Browser-pool-backed doujin scraping and image re-hosting server
//!
//! The binary in `main.rs` wires these modules into an Actix-web server; the
//! library exposes them so the integration tests can drive the same pieces
//! with fake browser sessions and in-memory stores.

pub mod api;
pub mod app_state;
pub mod batch;
pub mod browser;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod deadline;
pub mod error;
pub mod helpers;
pub mod http_client;
pub mod ingest;
pub mod models;
pub mod pg_db;
pub mod rate_limit;
pub mod rehost;
pub mod scheduler;
pub mod scraper;
pub mod sources;
pub mod storage;
