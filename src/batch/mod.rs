//! Long-running bulk jobs
//!
//! All three jobs share the same shape: one job process-wide at a time
//! ([`lock::BatchLock`]), one overall deadline, and work split into chunks
//! that run one after another with the items of a chunk running concurrently
//! ([`run_chunked`]).

pub mod auto_fetch;
pub mod lock;
pub mod manifest;
pub mod thumbnails;

use crate::deadline::guarded;
use crate::error::ScrapeError;
use crate::models::{ComicDetail, ComicResponse, ListingPage};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::future::Future;
use tokio_util::sync::CancellationToken;

pub use lock::{BatchBusy, BatchGuard, BatchKind, BatchLock, BatchStatus};

/// The operations batch jobs are built from.
#[async_trait]
pub trait ComicSource: Send + Sync {
    async fn search(&self, query: &str, page: u32) -> Result<ListingPage, ScrapeError>;

    /// Search results in the JSON shape served to clients.
    async fn search_payload(&self, query: &str, page: u32) -> Result<Value, ScrapeError>;

    async fn detail(&self, slug: &str) -> Result<ComicDetail, ScrapeError>;

    /// Extract and ingest one chapter.
    async fn fetch_comic(&self, slug: &str) -> Result<ComicResponse, ScrapeError>;

    async fn rehost(&self, url: &str) -> Result<String, ScrapeError>;
}

/// How one item of a chunked run ended
#[derive(Debug)]
pub enum Settled<T> {
    Completed(T),
    /// The run's token fired before the item finished
    Aborted,
}

pub struct ChunkedRun<I, T> {
    /// Items that were started, each with its outcome, in input order
    pub settled: Vec<(I, Settled<T>)>,
    /// Whether the token fired; items after the aborted chunk were never started
    pub aborted: bool,
}

/// Process `items` in chunks of `chunk_size`. Chunk N+1 starts only after
/// every item of chunk N settled. Once `token` fires, the current chunk's
/// unfinished items settle as `Aborted` and later chunks are skipped.
pub async fn run_chunked<I, T, F, Fut>(
    items: Vec<I>,
    chunk_size: usize,
    token: &CancellationToken,
    work: F,
) -> ChunkedRun<I, T>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T>,
{
    chunked(items, chunk_size, token, work, true).await
}

/// Like [`run_chunked`], but a started item is never cut short. Each item
/// watches `token` itself and settles with whatever it finished; only the
/// chunks after the token fires are skipped.
pub async fn run_chunked_cooperative<I, T, F, Fut>(
    items: Vec<I>,
    chunk_size: usize,
    token: &CancellationToken,
    work: F,
) -> ChunkedRun<I, T>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T>,
{
    chunked(items, chunk_size, token, work, false).await
}

async fn chunked<I, T, F, Fut>(
    items: Vec<I>,
    chunk_size: usize,
    token: &CancellationToken,
    work: F,
    cut_short: bool,
) -> ChunkedRun<I, T>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T>,
{
    let mut settled = Vec::with_capacity(items.len());
    for chunk in items.chunks(chunk_size.max(1)) {
        if token.is_cancelled() {
            break;
        }
        let outcomes = join_all(chunk.iter().cloned().map(|item| {
            let fut = work(item);
            async move {
                if !cut_short {
                    return Settled::Completed(fut.await);
                }
                match guarded(token, fut).await {
                    Ok(out) => Settled::Completed(out),
                    Err(_) => Settled::Aborted,
                }
            }
        }))
        .await;
        settled.extend(chunk.iter().cloned().zip(outcomes));
    }
    ChunkedRun {
        settled,
        aborted: token.is_cancelled(),
    }
}
