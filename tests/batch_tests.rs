use async_trait::async_trait;
use rust_doujin_scraper::batch::manifest::{self, Manifest, ManifestParams};
use rust_doujin_scraper::batch::thumbnails::{self, ThumbnailParams};
use rust_doujin_scraper::batch::auto_fetch::{self, AutoFetchParams};
use rust_doujin_scraper::batch::{BatchKind, BatchLock, ComicSource};
use rust_doujin_scraper::error::ScrapeError;
use rust_doujin_scraper::models::{
    ChapterLink, ComicDetail, ComicResponse, ComicSummary, DataSource, ListingPage, ManifestEntry,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
enum Outcome {
    Images(usize),
    Fail,
    /// Transient failure on the first call, images afterwards
    FlakyOnce(usize),
    /// Transient failure on every call
    Down,
}

#[derive(Default)]
struct FakeSource {
    /// query page → comics on that page
    search_pages: HashMap<u32, Vec<&'static str>>,
    total_pages: u32,
    payloads: HashMap<u32, Value>,
    chapters: HashMap<String, Vec<String>>,
    outcomes: HashMap<String, Outcome>,
    fetch_delay: Duration,
    /// Per-slug override of `fetch_delay`
    delays: HashMap<String, Duration>,
    failing_thumbnails: Vec<String>,
    calls: Mutex<HashMap<String, usize>>,
    fetches: AtomicUsize,
}

impl FakeSource {
    fn calls_for(&self, slug: &str) -> usize {
        *self.calls.lock().unwrap().get(slug).unwrap_or(&0)
    }
}

fn summary(slug: &str) -> ComicSummary {
    ComicSummary {
        title: slug.to_uppercase(),
        slug: slug.to_string(),
        link: format!("https://doujin.test/manga/{}/", slug),
        thumbnail: None,
        kind: None,
        chapter: None,
    }
}

#[async_trait]
impl ComicSource for FakeSource {
    async fn search(&self, _query: &str, page: u32) -> Result<ListingPage, ScrapeError> {
        let data = self
            .search_pages
            .get(&page)
            .map(|slugs| slugs.iter().map(|s| summary(s)).collect())
            .unwrap_or_default();
        Ok(ListingPage {
            data,
            total_pages: self.total_pages.max(1),
        })
    }

    async fn search_payload(&self, _query: &str, page: u32) -> Result<Value, ScrapeError> {
        Ok(self.payloads.get(&page).cloned().unwrap_or_else(|| json!({"data": []})))
    }

    async fn detail(&self, link: &str) -> Result<ComicDetail, ScrapeError> {
        let slug = link
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let chapters = self
            .chapters
            .get(&slug)
            .ok_or_else(|| ScrapeError::NotFound(slug.clone()))?
            .iter()
            .map(|c| ChapterLink {
                title: c.clone(),
                slug: c.clone(),
                link: format!("https://doujin.test/{}/", c),
                date: None,
            })
            .collect();
        Ok(ComicDetail {
            slug: slug.clone(),
            title: slug.to_uppercase(),
            alt_title: None,
            thumbnail: None,
            synopsis: None,
            metadata: BTreeMap::new(),
            genres: Vec::new(),
            chapters,
        })
    }

    async fn fetch_comic(&self, slug: &str) -> Result<ComicResponse, ScrapeError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(slug.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.get(slug).copied().unwrap_or(self.fetch_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let images = match self.outcomes.get(slug).cloned().unwrap_or(Outcome::Images(2)) {
            Outcome::Images(n) => n,
            Outcome::Fail => return Err(ScrapeError::NotFound(slug.to_string())),
            Outcome::FlakyOnce(_) if call == 1 => {
                return Err(ScrapeError::Timeout(format!("{} first attempt", slug)))
            }
            Outcome::FlakyOnce(n) => n,
            Outcome::Down => return Err(ScrapeError::Network(format!("{} unreachable", slug))),
        };
        Ok(ComicResponse {
            success: true,
            images: (0..images).map(|i| format!("memory://cdn/{}/{}", slug, i)).collect(),
            cached: false,
            source: DataSource::Fresh,
            warning: None,
            persisted: None,
        })
    }

    async fn rehost(&self, url: &str) -> Result<String, ScrapeError> {
        if self.failing_thumbnails.iter().any(|u| u == url) {
            return Err(ScrapeError::Network(format!("cannot load {}", url)));
        }
        Ok(format!("memory://cdn/thumbnails/{}", url.rsplit('/').next().unwrap_or_default()))
    }
}

fn fetch_params(query: &str, pages: u32, timeout: Duration) -> AutoFetchParams {
    AutoFetchParams {
        query: query.to_string(),
        pages,
        timeout,
        concurrency: 3,
        chapter_batch: 5,
    }
}

#[tokio::test]
async fn test_zero_results_releases_lock() {
    let lock = BatchLock::new();
    let source = Arc::new(FakeSource::default());

    let guard = lock.try_acquire(BatchKind::AutoFetch).unwrap();
    let job_source = Arc::clone(&source);
    let report = tokio::spawn(async move {
        let _guard = guard;
        auto_fetch::run(&*job_source, fetch_params("nothing", 3, Duration::from_secs(5))).await
    })
    .await
    .unwrap();

    assert!(report.success);
    assert_eq!(report.total_fetched, 0);
    assert!(report.results.is_empty());
    assert!(lock.current().is_none());
    assert!(lock.try_acquire(BatchKind::AutoJson).is_ok());
}

#[tokio::test]
async fn test_second_job_rejected_while_first_runs() {
    let lock = BatchLock::new();
    let first = lock.try_acquire(BatchKind::AutoFetch).unwrap();
    let started = lock.current().unwrap().started_at;

    let busy = lock.try_acquire(BatchKind::AutoThumbnail).unwrap_err();
    assert_eq!(busy.0.kind, BatchKind::AutoFetch);
    assert_eq!(busy.0.started_at, started);
    assert!(busy.to_string().contains("auto-fetch"));

    drop(first);
    assert!(lock.try_acquire(BatchKind::AutoThumbnail).is_ok());
}

#[tokio::test]
async fn test_auto_fetch_walks_pages_and_chapters() {
    let mut source = FakeSource {
        total_pages: 2,
        ..FakeSource::default()
    };
    source.search_pages.insert(1, vec!["alpha", "beta"]);
    source.search_pages.insert(2, vec!["beta", "gamma"]);
    source
        .chapters
        .insert("alpha".into(), vec!["alpha-1".into(), "alpha-2".into()]);
    source.chapters.insert("beta".into(), vec!["beta-1".into()]);
    source.chapters.insert("gamma".into(), vec!["gamma-1".into()]);
    source.outcomes.insert("alpha-2".into(), Outcome::Fail);

    let report = auto_fetch::run(&source, fetch_params("q", 5, Duration::from_secs(5))).await;

    assert!(report.success);
    assert!(!report.timed_out);
    let slugs: Vec<&str> = report.results.iter().map(|r| r.slug.as_str()).collect();
    assert_eq!(slugs, vec!["alpha", "beta", "gamma"]);
    assert_eq!(report.total_fetched, 3);

    let alpha = &report.results[0];
    assert_eq!(alpha.status, "ok");
    assert_eq!(alpha.chapters[0].status, "ok");
    assert_eq!(alpha.chapters[0].images, 2);
    assert_eq!(alpha.chapters[1].status, "failed");
    assert!(alpha.chapters[1].error.is_some());
    assert_eq!(source.calls_for("beta-1"), 1);
}

#[tokio::test]
async fn test_auto_fetch_deadline_keeps_finished_chapters() {
    let mut source = FakeSource {
        total_pages: 1,
        fetch_delay: Duration::from_millis(100),
        ..FakeSource::default()
    };
    source.search_pages.insert(1, vec!["slow"]);
    source.chapters.insert(
        "slow".into(),
        vec!["slow-1".into(), "slow-2".into(), "slow-3".into(), "slow-4".into()],
    );

    let params = AutoFetchParams {
        chapter_batch: 1,
        ..fetch_params("q", 1, Duration::from_millis(260))
    };
    let report = auto_fetch::run(&source, params).await;

    assert!(report.success);
    assert!(report.timed_out);
    assert_eq!(report.total_fetched, 2);
    assert_eq!(report.results.len(), 1);

    let slow = &report.results[0];
    assert_eq!(slow.status, "partial");
    let statuses: Vec<&str> = slow.chapters.iter().map(|c| c.status.as_str()).collect();
    assert_eq!(statuses, vec!["ok", "ok", "aborted", "aborted"]);
    assert_eq!(slow.chapters[0].images, 2);
    // The fourth chapter never started.
    assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_auto_fetch_deadline_before_any_chapter() {
    let mut source = FakeSource {
        total_pages: 1,
        fetch_delay: Duration::from_millis(300),
        ..FakeSource::default()
    };
    source.search_pages.insert(1, vec!["slow"]);
    source
        .chapters
        .insert("slow".into(), vec!["slow-1".into(), "slow-2".into()]);

    let report = auto_fetch::run(&source, fetch_params("q", 1, Duration::from_millis(80))).await;

    assert!(report.timed_out);
    assert_eq!(report.total_fetched, 0);
    assert_eq!(report.results[0].status, "aborted");
    assert_eq!(report.results[0].chapters.len(), 2);
    assert!(report.results[0].chapters.iter().all(|c| c.status == "aborted"));
}

fn entries(slugs: &[&str]) -> Value {
    Value::Array(
        slugs
            .iter()
            .map(|s| json!({"slug": s, "title": format!("Title {}", s)}))
            .collect(),
    )
}

async fn write_manifest(dir: &tempfile::TempDir, name: &str, body: &Value) -> Manifest {
    let path = dir.path().join(name);
    tokio::fs::write(&path, serde_json::to_vec(body).unwrap()).await.unwrap();
    Manifest::load(&path).await.unwrap()
}

async fn read_manifest(dir: &tempfile::TempDir, name: &str) -> Vec<ManifestEntry> {
    let raw = tokio::fs::read_to_string(dir.path().join(name)).await.unwrap();
    serde_json::from_str(&raw).unwrap()
}

fn manifest_params(timeout: Duration) -> ManifestParams {
    ManifestParams {
        timeout,
        concurrency: 3,
        retry_delay: Duration::from_millis(10),
        stall_pause: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_manifest_keeps_failures_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = write_manifest(&dir, "queue.json", &entries(&["a", "b", "c", "d", "e"])).await;

    let mut source = FakeSource::default();
    source.outcomes.insert("b".into(), Outcome::FlakyOnce(3));
    source.outcomes.insert("c".into(), Outcome::Fail);

    let report = manifest::run(&source, loaded, manifest_params(Duration::from_secs(5)))
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.total, 5);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.remaining, 1);
    assert!(!report.stalled);

    let b = report.results.iter().find(|r| r.slug == "b").unwrap();
    assert_eq!(b.status, "ok (retry)");
    assert_eq!(b.images, 3);
    assert_eq!(source.calls_for("b"), 2);
    assert_eq!(source.calls_for("c"), 1);

    let left = read_manifest(&dir, "queue.json").await;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].slug, "c");
    assert_eq!(left[0].title, "Title c");
    assert!(!dir.path().join("queue.json.tmp").exists());
}

#[tokio::test]
async fn test_manifest_soft_deadline_continues() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = write_manifest(&dir, "long.json", &entries(&["p1", "p2", "p3", "p4", "p5", "p6"])).await;

    let source = FakeSource {
        fetch_delay: Duration::from_millis(100),
        ..FakeSource::default()
    };

    let report = manifest::run(&source, loaded, manifest_params(Duration::from_millis(150)))
        .await
        .unwrap();

    assert_eq!(report.remaining, 0);
    assert_eq!(report.succeeded, 6);
    assert!(report.extensions >= 1, "{report:?}");
    assert!(read_manifest(&dir, "long.json").await.is_empty());
}

#[tokio::test]
async fn test_manifest_stops_after_two_idle_waves() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = write_manifest(&dir, "dead.json", &json!({"chapters": [
        {"slug": "x1", "title": "X1"},
        {"slug": "x2", "title": "X2"}
    ]}))
    .await;

    let mut source = FakeSource::default();
    source.outcomes.insert("x1".into(), Outcome::Down);
    source.outcomes.insert("x2".into(), Outcome::Down);

    let report = manifest::run(&source, loaded, manifest_params(Duration::from_secs(5)))
        .await
        .unwrap();

    assert!(report.stalled);
    assert_eq!(report.waves, 2);
    assert_eq!(report.remaining, 2);
    assert_eq!(report.failed, 2);
    // Each wave tries once and retries once.
    assert_eq!(source.calls_for("x1"), 4);
    // Rewritten only when something succeeded, so the wrapped layout survives.
    let raw = tokio::fs::read_to_string(dir.path().join("dead.json")).await.unwrap();
    assert!(raw.contains("chapters"));
}

#[tokio::test]
async fn test_manifest_failed_head_does_not_block_queue() {
    let dir = tempfile::tempdir().unwrap();
    let loaded =
        write_manifest(&dir, "head.json", &entries(&["x1", "x2", "x3", "a", "b", "c"])).await;

    let mut source = FakeSource::default();
    for slug in ["x1", "x2", "x3"] {
        source.outcomes.insert(slug.into(), Outcome::Fail);
    }

    let report = manifest::run(&source, loaded, manifest_params(Duration::from_secs(5)))
        .await
        .unwrap();

    assert!(!report.stalled);
    assert_eq!(report.waves, 2);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 3);
    assert_eq!(report.remaining, 3);
    assert_eq!(source.calls_for("a"), 1);
    assert_eq!(source.calls_for("x1"), 1);

    let left: Vec<String> = read_manifest(&dir, "head.json")
        .await
        .into_iter()
        .map(|e| e.slug)
        .collect();
    assert_eq!(left, vec!["x1", "x2", "x3"]);
}

#[tokio::test]
async fn test_manifest_mixed_wave_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = write_manifest(&dir, "mixed.json", &entries(&["a", "c", "s", "d"])).await;

    let mut source = FakeSource::default();
    source.outcomes.insert("c".into(), Outcome::Fail);
    // Never finishes inside one deadline.
    source.delays.insert("s".into(), Duration::from_millis(400));

    let report = manifest::run(&source, loaded, manifest_params(Duration::from_millis(150)))
        .await
        .unwrap();

    // Wave 1: a ok, c failed, s aborted. Wave 2: s aborted, d ok.
    // Waves 3 and 4 only abort s, so the run stops.
    assert!(report.stalled);
    assert_eq!(report.waves, 4);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.remaining, 2);
    assert!(report.extensions >= 3, "{report:?}");

    let status_of = |slug: &str| {
        report
            .results
            .iter()
            .find(|r| r.slug == slug)
            .map(|r| r.status.clone())
            .unwrap()
    };
    assert_eq!(status_of("a"), "ok");
    assert_eq!(status_of("c"), "failed");
    assert_eq!(status_of("s"), "aborted");
    assert_eq!(status_of("d"), "ok");
    assert_eq!(source.calls_for("c"), 1);
    assert_eq!(source.calls_for("s"), 4);

    let left: Vec<String> = read_manifest(&dir, "mixed.json")
        .await
        .into_iter()
        .map(|e| e.slug)
        .collect();
    assert_eq!(left, vec!["c", "s"]);
}

#[tokio::test]
async fn test_manifest_deadline_shorter_than_fetch_terminates() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = write_manifest(&dir, "tight.json", &entries(&["only"])).await;

    let source = FakeSource {
        fetch_delay: Duration::from_millis(100),
        ..FakeSource::default()
    };

    let report = tokio::time::timeout(
        Duration::from_secs(3),
        manifest::run(&source, loaded, manifest_params(Duration::from_millis(20))),
    )
    .await
    .expect("run must finish")
    .unwrap();

    assert!(report.stalled);
    assert_eq!(report.waves, 2);
    assert_eq!(report.remaining, 1);
    assert_eq!(source.calls_for("only"), 2);
    assert_eq!(report.results[0].status, "aborted");
}

#[tokio::test]
async fn test_thumbnails_from_mixed_payloads() {
    let mut source = FakeSource {
        failing_thumbnails: vec!["https://img.test/bad.jpg".to_string()],
        ..FakeSource::default()
    };
    source.payloads.insert(
        1,
        json!({"status": "success", "data": [
            {"title": "A", "thumbnail": "https://img.test/a.jpg"},
            {"title": "B", "thumbnail": "https://img.test/bad.jpg"}
        ], "totalPages": 3}),
    );
    source.payloads.insert(2, json!(["https://img.test/a.jpg", "https://img.test/c.jpg"]));
    source.payloads.insert(3, json!({"thumbnail": "https://img.test/d.jpg"}));

    let report = thumbnails::run(
        &source,
        ThumbnailParams {
            query: "q".to_string(),
            start_page: 1,
            max_pages: 10,
            timeout: Duration::from_secs(5),
            concurrency: 3,
        },
    )
    .await;

    assert!(report.success);
    assert!(!report.timed_out);
    // Page 4 comes back empty and ends the walk.
    assert_eq!(report.pages_scanned, 4);
    assert_eq!(report.found, 4);
    assert_eq!(report.rehosted, 3);
    assert_eq!(report.failed, 1);
    let urls: Vec<&str> = report.results.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://img.test/a.jpg",
            "https://img.test/bad.jpg",
            "https://img.test/c.jpg",
            "https://img.test/d.jpg"
        ]
    );
    assert_eq!(
        report.results[2].cdn_url.as_deref(),
        Some("memory://cdn/thumbnails/c.jpg")
    );
}

#[tokio::test]
async fn test_thumbnails_last_page_number_does_not_overflow() {
    let source = FakeSource::default();
    let report = thumbnails::run(
        &source,
        ThumbnailParams {
            query: "q".to_string(),
            start_page: u32::MAX,
            max_pages: 10,
            timeout: Duration::from_secs(5),
            concurrency: 3,
        },
    )
    .await;

    assert!(report.success);
    assert_eq!(report.pages_scanned, 1);
    assert_eq!(report.found, 0);
}
