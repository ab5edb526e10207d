//! Thumbnail harvesting: walk search pages and re-host every thumbnail

use super::{run_chunked, ComicSource, Settled};
use crate::deadline::{guarded, Deadline};
use crate::helpers::dedupe_preserving_order;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const MAX_PAGES: u32 = 10;

/// One element of a result list: either the URL itself or a record carrying it
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ThumbnailEntry {
    Url(String),
    Record { thumbnail: Option<String> },
}

/// The response shapes a search may come back in
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SearchPayload {
    Single { thumbnail: String },
    Results {
        #[serde(alias = "data")]
        results: Vec<ThumbnailEntry>,
    },
    Bare(Vec<ThumbnailEntry>),
}

impl SearchPayload {
    /// Non-empty thumbnail URLs, in order.
    pub fn thumbnails(self) -> Vec<String> {
        let entries = match self {
            SearchPayload::Single { thumbnail } => return vec![thumbnail],
            SearchPayload::Results { results } => results,
            SearchPayload::Bare(entries) => entries,
        };
        entries
            .into_iter()
            .filter_map(|entry| match entry {
                ThumbnailEntry::Url(url) => Some(url),
                ThumbnailEntry::Record { thumbnail } => thumbnail,
            })
            .filter(|url| !url.trim().is_empty())
            .collect()
    }

    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

#[derive(Debug, Clone)]
pub struct ThumbnailParams {
    pub query: String,
    pub start_page: u32,
    pub max_pages: u32,
    pub timeout: Duration,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailResult {
    pub url: String,
    /// `ok`, `failed` or `aborted`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdn_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailReport {
    pub success: bool,
    pub query: String,
    pub pages_scanned: u32,
    pub found: usize,
    pub rehosted: usize,
    pub failed: usize,
    pub timed_out: bool,
    pub results: Vec<ThumbnailResult>,
}

pub async fn run(source: &dyn ComicSource, params: ThumbnailParams) -> ThumbnailReport {
    let max_pages = params.max_pages.clamp(1, MAX_PAGES);
    let start = params.start_page.max(1);
    let deadline = Deadline::after(params.timeout);
    let token = deadline.token();

    let mut found = Vec::new();
    let mut pages_scanned = 0;
    for page in start..=start.saturating_add(max_pages - 1) {
        let payload = match guarded(&token, source.search_payload(&params.query, page)).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                warn!("[auto-thumbnail] search {:?} page {} failed: {}", params.query, page, e);
                break;
            }
            Err(_) => break,
        };
        pages_scanned += 1;
        let thumbnails = match SearchPayload::from_value(payload) {
            Some(payload) => payload.thumbnails(),
            None => {
                warn!("[auto-thumbnail] page {} returned an unrecognised shape", page);
                Vec::new()
            }
        };
        if thumbnails.is_empty() {
            break;
        }
        found.extend(thumbnails);
    }

    let urls = dedupe_preserving_order(found);
    info!(
        "[auto-thumbnail] query={:?}: {} unique thumbnail(s) over {} page(s)",
        params.query,
        urls.len(),
        pages_scanned
    );

    let run = run_chunked(urls.clone(), params.concurrency, &token, |url: String| async move {
        source.rehost(&url).await
    })
    .await;

    let mut results: Vec<ThumbnailResult> = run
        .settled
        .into_iter()
        .map(|(url, settled)| match settled {
            Settled::Completed(Ok(cdn_url)) => ThumbnailResult {
                url,
                status: "ok".to_string(),
                cdn_url: Some(cdn_url),
                error: None,
            },
            Settled::Completed(Err(e)) => ThumbnailResult {
                url,
                status: "failed".to_string(),
                cdn_url: None,
                error: Some(e.to_string()),
            },
            Settled::Aborted => ThumbnailResult {
                url,
                status: "aborted".to_string(),
                cdn_url: None,
                error: None,
            },
        })
        .collect();

    // Never started because the deadline hit first.
    let started = results.len();
    results.extend(urls.into_iter().skip(started).map(|url| ThumbnailResult {
        url,
        status: "aborted".to_string(),
        cdn_url: None,
        error: None,
    }));

    let rehosted = results.iter().filter(|r| r.status == "ok").count();
    let failed = results.iter().filter(|r| r.status == "failed").count();

    ThumbnailReport {
        success: true,
        query: params.query,
        pages_scanned,
        found: results.len(),
        rehosted,
        failed,
        timed_out: run.aborted || deadline.is_expired(),
        results,
    }
}
