//! Query-driven auto-fetch: search → details → every chapter ingested

use super::{run_chunked, run_chunked_cooperative, ComicSource, Settled};
use crate::deadline::{guarded, Deadline};
use crate::models::{ChapterLink, ComicSummary};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const MAX_PAGES: u32 = 10;

#[derive(Debug, Clone)]
pub struct AutoFetchParams {
    pub query: String,
    /// Search pages walked, starting at page 1
    pub pages: u32,
    pub timeout: Duration,
    /// Comics processed at once
    pub concurrency: usize,
    /// Chapters of one comic processed at once
    pub chapter_batch: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChapterResult {
    pub slug: String,
    pub title: String,
    /// `ok`, `failed` or `aborted` (cut short or never started)
    pub status: String,
    pub images: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComicResult {
    pub title: String,
    pub slug: String,
    pub link: String,
    pub status: String,
    pub chapters: Vec<ChapterResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AutoFetchReport {
    pub success: bool,
    pub query: String,
    pub pages: u32,
    /// Chapters that were ingested (or already stored)
    pub total_fetched: usize,
    pub timed_out: bool,
    pub results: Vec<ComicResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn collect_comics(
    source: &dyn ComicSource,
    query: &str,
    pages: u32,
    token: &CancellationToken,
) -> Result<Vec<ComicSummary>, String> {
    let mut seen = HashSet::new();
    let mut comics = Vec::new();
    for page in 1..=pages {
        let listing = match guarded(token, source.search(query, page)).await {
            Ok(Ok(listing)) => listing,
            Ok(Err(e)) if page == 1 => return Err(e.to_string()),
            Ok(Err(e)) => {
                warn!("[auto-fetch] search {:?} page {} failed: {}", query, page, e);
                break;
            }
            Err(_) => break,
        };
        let found = listing.data.len();
        comics.extend(listing.data.into_iter().filter(|c| seen.insert(c.link.clone())));
        if found == 0 || page >= listing.total_pages {
            break;
        }
    }
    Ok(comics)
}

async fn fetch_chapters(
    source: &dyn ComicSource,
    chapters: Vec<ChapterLink>,
    batch: usize,
    token: &CancellationToken,
) -> Vec<ChapterResult> {
    let run = run_chunked(chapters.clone(), batch, token, |chapter: ChapterLink| async move {
        source.fetch_comic(&chapter.slug).await
    })
    .await;
    let started = run.settled.len();

    run.settled
        .into_iter()
        .chain(
            chapters
                .into_iter()
                .skip(started)
                .map(|chapter| (chapter, Settled::Aborted)),
        )
        .map(|(chapter, settled)| {
            let (status, images, cached, error) = match settled {
                Settled::Completed(Ok(response)) if !response.images.is_empty() => {
                    ("ok", response.images.len(), Some(response.cached), None)
                }
                Settled::Completed(Ok(response)) => (
                    "failed",
                    0,
                    None,
                    Some(response.warning.unwrap_or_else(|| "no images".to_string())),
                ),
                Settled::Completed(Err(e)) => ("failed", 0, None, Some(e.to_string())),
                Settled::Aborted => ("aborted", 0, None, None),
            };
            ChapterResult {
                slug: chapter.slug,
                title: chapter.title,
                status: status.to_string(),
                images,
                cached,
                error,
            }
        })
        .collect()
}

async fn process_comic(
    source: &dyn ComicSource,
    comic: ComicSummary,
    chapter_batch: usize,
    token: &CancellationToken,
) -> ComicResult {
    let mut result = ComicResult {
        title: comic.title.clone(),
        slug: comic.slug.clone(),
        link: comic.link.clone(),
        status: "ok".to_string(),
        chapters: Vec::new(),
        error: None,
    };

    let detail = match guarded(token, source.detail(&comic.link)).await {
        Ok(Ok(detail)) => detail,
        Ok(Err(e)) => {
            result.status = "failed".to_string();
            result.error = Some(e.to_string());
            return result;
        }
        Err(_) => {
            result.status = "aborted".to_string();
            return result;
        }
    };

    result.chapters = fetch_chapters(source, detail.chapters, chapter_batch, token).await;
    if result.chapters.iter().any(|c| c.status == "aborted") {
        let any_ok = result.chapters.iter().any(|c| c.status == "ok");
        result.status = if any_ok { "partial" } else { "aborted" }.to_string();
    } else if !result.chapters.is_empty() && result.chapters.iter().all(|c| c.status != "ok") {
        result.status = "failed".to_string();
    }
    result
}

pub async fn run(source: &dyn ComicSource, params: AutoFetchParams) -> AutoFetchReport {
    let pages = params.pages.clamp(1, MAX_PAGES);
    let deadline = Deadline::after(params.timeout);
    let token = deadline.token();

    info!("[auto-fetch] query={:?} pages={} timeout={:?}", params.query, pages, params.timeout);

    let comics = match collect_comics(source, &params.query, pages, &token).await {
        Ok(comics) => comics,
        Err(e) => {
            return AutoFetchReport {
                success: false,
                query: params.query,
                pages,
                total_fetched: 0,
                timed_out: false,
                results: Vec::new(),
                error: Some(e),
            }
        }
    };

    if comics.is_empty() {
        info!("[auto-fetch] no results for {:?}", params.query);
        return AutoFetchReport {
            success: true,
            query: params.query,
            pages,
            total_fetched: 0,
            timed_out: deadline.is_expired(),
            results: Vec::new(),
            error: None,
        };
    }

    // Each comic watches the token itself so chapters ingested before the
    // deadline stay in its result.
    let chapter_batch = params.chapter_batch;
    let run = run_chunked_cooperative(
        comics.clone(),
        params.concurrency,
        &token,
        |comic: ComicSummary| process_comic(source, comic, chapter_batch, &token),
    )
    .await;
    let started = run.settled.len();

    let results: Vec<ComicResult> = run
        .settled
        .into_iter()
        .chain(
            comics
                .into_iter()
                .skip(started)
                .map(|comic| (comic, Settled::Aborted)),
        )
        .map(|(comic, settled)| match settled {
            Settled::Completed(result) => result,
            Settled::Aborted => ComicResult {
                title: comic.title,
                slug: comic.slug,
                link: comic.link,
                status: "aborted".to_string(),
                chapters: Vec::new(),
                error: None,
            },
        })
        .collect();

    let total_fetched = results
        .iter()
        .flat_map(|r| r.chapters.iter())
        .filter(|c| c.status == "ok")
        .count();
    let timed_out = run.aborted || deadline.is_expired();

    info!(
        "[auto-fetch] query={:?} done: {} comic(s), {} chapter(s) fetched{}",
        params.query,
        results.len(),
        total_fetched,
        if timed_out { ", timed out" } else { "" }
    );

    AutoFetchReport {
        success: true,
        query: params.query,
        pages,
        total_fetched,
        timed_out,
        results,
        error: None,
    }
}
