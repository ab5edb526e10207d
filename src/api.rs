//! HTTP handlers
//!
//! Every handler reads `web::Data<AppState>`, calls into the catalog or a
//! batch job and maps [`ScrapeError`] onto a status code with
//! [`error_response`]. Batch jobs run on their own task with the batch lock
//! guard moved inside, so a client disconnect neither cancels the run nor
//! leaves the lock held.

use crate::app_state::AppState;
use crate::batch::{auto_fetch, manifest, thumbnails, BatchBusy, BatchKind};
use crate::catalog::listing_payload;
use crate::error::ScrapeError;
use crate::rehost::ProxyOutcome;
use actix_web::http::header;
use actix_web::{get, web, HttpResponse, Responder};
use log::{error, warn};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(listing)
        .service(search)
        .service(detail)
        .service(get_comic)
        .service(rehost)
        .service(proxy)
        .service(auto_fetch_handler)
        .service(auto_json_handler)
        .service(auto_thumbnail_handler)
        .service(health)
        .service(batch_status);
}

pub fn error_response(e: &ScrapeError) -> HttpResponse {
    let body = json!({ "error": e.to_string() });
    match e {
        ScrapeError::InvalidInput(_) => HttpResponse::BadRequest().json(body),
        ScrapeError::NotFound(_) => HttpResponse::NotFound().json(body),
        ScrapeError::Timeout(_) => HttpResponse::GatewayTimeout().json(body),
        _ => {
            error!("[api] request failed: {}", e);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({ "error": message }))
}

fn busy_response(busy: BatchBusy) -> HttpResponse {
    warn!("[api] {}", busy);
    HttpResponse::TooManyRequests().json(json!({
        "error": busy.to_string(),
        "running": busy.0,
    }))
}

fn join_failed(kind: BatchKind, e: tokio::task::JoinError) -> HttpResponse {
    error_response(&ScrapeError::Internal(format!("{} task failed: {}", kind, e)))
}

/// Trimmed, non-empty query parameter
fn required<'a>(value: &'a Option<String>) -> Option<&'a str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn millis_or(value: Option<u64>, default_ms: u64) -> Duration {
    Duration::from_millis(value.filter(|ms| *ms > 0).unwrap_or(default_ms))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

#[get("/doujin")]
async fn listing(data: web::Data<AppState>, query: web::Query<PageQuery>) -> impl Responder {
    let page = query.page.as_deref().unwrap_or("1");
    match data.catalog.listing(page).await {
        Ok(found) => HttpResponse::Ok().json(listing_payload(&found)),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub page: Option<u32>,
}

#[get("/search")]
async fn search(data: web::Data<AppState>, query: web::Query<SearchQuery>) -> impl Responder {
    let Some(q) = required(&query.q) else {
        return bad_request("Missing query parameter 'q'");
    };
    match data.catalog.search(q, query.page.unwrap_or(1).max(1)).await {
        Ok(found) => HttpResponse::Ok().json(listing_payload(&found)),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    pub url: Option<String>,
}

#[get("/detail")]
async fn detail(data: web::Data<AppState>, query: web::Query<UrlQuery>) -> impl Responder {
    let Some(url) = required(&query.url) else {
        return bad_request("Missing query parameter 'url'");
    };
    match data.catalog.detail(url).await {
        Ok(found) => HttpResponse::Ok().json(json!({
            "status": "success",
            "data": found.value,
            "source": found.source,
        })),
        Err(e) => error_response(&e),
    }
}

#[get("/get-comic")]
async fn get_comic(data: web::Data<AppState>, query: web::Query<UrlQuery>) -> impl Responder {
    let Some(url) = required(&query.url) else {
        return bad_request("Missing query parameter 'url'");
    };
    match data.catalog.get_comic(url).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => error_response(&e),
    }
}

#[get("/get")]
async fn rehost(data: web::Data<AppState>, query: web::Query<UrlQuery>) -> impl Responder {
    let Some(url) = required(&query.url) else {
        return bad_request("Missing query parameter 'url'");
    };
    match data.catalog.rehost(url).await {
        Ok(cdn_url) => HttpResponse::Ok().json(json!({ "cdnUrl": cdn_url })),
        Err(e) => error_response(&e),
    }
}

#[get("/proxy")]
async fn proxy(data: web::Data<AppState>, query: web::Query<UrlQuery>) -> impl Responder {
    let Some(url) = required(&query.url) else {
        return bad_request("Missing query parameter 'url'");
    };
    match data.catalog.proxy(url).await {
        Ok(ProxyOutcome::Redirect(location)) => HttpResponse::Found()
            .insert_header((header::LOCATION, location))
            .finish(),
        Ok(ProxyOutcome::Stream { bytes, content_type }) => HttpResponse::Ok()
            .content_type(content_type)
            .insert_header((header::CACHE_CONTROL, "public, max-age=3600"))
            .body(bytes),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AutoFetchQuery {
    pub q: Option<String>,
    pub pages: Option<u32>,
    /// Milliseconds
    pub timeout: Option<u64>,
}

#[get("/auto-fetch")]
async fn auto_fetch_handler(
    data: web::Data<AppState>,
    query: web::Query<AutoFetchQuery>,
) -> impl Responder {
    let Some(q) = required(&query.q) else {
        return bad_request("Missing query parameter 'q'");
    };
    let batch = &data.config.batch;
    let params = auto_fetch::AutoFetchParams {
        query: q.to_string(),
        pages: query.pages.unwrap_or(1),
        timeout: millis_or(query.timeout, batch.auto_fetch_timeout_ms),
        concurrency: batch.concurrency,
        chapter_batch: batch.chapter_batch,
    };

    let guard = match data.batch_lock.try_acquire(BatchKind::AutoFetch) {
        Ok(guard) => guard,
        Err(busy) => return busy_response(busy),
    };
    let catalog = Arc::clone(&data.catalog);
    let job = actix_web::rt::spawn(async move {
        let _guard = guard;
        auto_fetch::run(&*catalog, params).await
    });

    match job.await {
        Ok(report) if !report.success => HttpResponse::InternalServerError().json(report),
        Ok(report) if report.timed_out => HttpResponse::Accepted().json(report),
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => join_failed(BatchKind::AutoFetch, e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AutoJsonQuery {
    pub file: Option<String>,
    /// Milliseconds
    pub timeout: Option<u64>,
}

#[get("/auto-json")]
async fn auto_json_handler(
    data: web::Data<AppState>,
    query: web::Query<AutoJsonQuery>,
) -> impl Responder {
    let Some(file) = required(&query.file) else {
        return bad_request("Missing query parameter 'file'");
    };
    let batch = &data.config.batch;
    let path = match manifest::Manifest::resolve(&batch.manifest_dir, file) {
        Ok(path) => path,
        Err(e) => return bad_request(&e.to_string()),
    };
    let params = manifest::ManifestParams {
        timeout: millis_or(query.timeout, batch.auto_json_timeout_ms),
        concurrency: batch.concurrency,
        retry_delay: Duration::from_millis(batch.retry_delay_ms),
        stall_pause: Duration::from_millis(batch.stall_pause_ms),
    };

    let guard = match data.batch_lock.try_acquire(BatchKind::AutoJson) {
        Ok(guard) => guard,
        Err(busy) => return busy_response(busy),
    };
    // Loaded under the lock so two runs never share a manifest.
    let loaded = match manifest::Manifest::load(&path).await {
        Ok(loaded) => loaded,
        Err(e @ manifest::ManifestError::NotFound(_)) => {
            return HttpResponse::NotFound().json(json!({ "error": e.to_string() }))
        }
        Err(e @ manifest::ManifestError::Malformed(_)) => return bad_request(&e.to_string()),
        Err(e) => {
            error!("[api] loading {} failed: {}", path.display(), e);
            return HttpResponse::InternalServerError().json(json!({ "error": e.to_string() }));
        }
    };

    let catalog = Arc::clone(&data.catalog);
    let job = actix_web::rt::spawn(async move {
        let _guard = guard;
        manifest::run(&*catalog, loaded, params).await
    });

    match job.await {
        Ok(Ok(report)) => HttpResponse::Ok().json(report),
        Ok(Err(e)) => {
            error!("[api] auto-json on {} failed: {}", file, e);
            HttpResponse::InternalServerError().json(json!({ "error": e.to_string() }))
        }
        Err(e) => join_failed(BatchKind::AutoJson, e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoThumbnailQuery {
    pub q: Option<String>,
    pub page: Option<u32>,
    pub max_pages: Option<u32>,
    /// Milliseconds
    pub timeout: Option<u64>,
}

#[get("/auto-thumbnail")]
async fn auto_thumbnail_handler(
    data: web::Data<AppState>,
    query: web::Query<AutoThumbnailQuery>,
) -> impl Responder {
    let Some(q) = required(&query.q) else {
        return bad_request("Missing query parameter 'q'");
    };
    let batch = &data.config.batch;
    let params = thumbnails::ThumbnailParams {
        query: q.to_string(),
        start_page: query.page.unwrap_or(1),
        max_pages: query.max_pages.unwrap_or(thumbnails::MAX_PAGES),
        timeout: millis_or(query.timeout, batch.auto_thumbnail_timeout_ms),
        concurrency: batch.concurrency,
    };

    let guard = match data.batch_lock.try_acquire(BatchKind::AutoThumbnail) {
        Ok(guard) => guard,
        Err(busy) => return busy_response(busy),
    };
    let catalog = Arc::clone(&data.catalog);
    let job = actix_web::rt::spawn(async move {
        let _guard = guard;
        thumbnails::run(&*catalog, params).await
    });

    match job.await {
        Ok(report) if report.timed_out => HttpResponse::Accepted().json(report),
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => join_failed(BatchKind::AutoThumbnail, e),
    }
}

#[get("/health")]
async fn health(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "uptimeSecs": data.uptime().as_secs(),
        "pool": data.pool.stats(),
        "batch": data.batch_lock.current(),
        "cacheEntries": data.cache.len(),
    }))
}

#[get("/batch/status")]
async fn batch_status(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.batch_lock.current())
}
