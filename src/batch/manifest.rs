//! Manifest-driven auto-fetch
//!
//! The manifest is a JSON array of `{slug, title}` on disk. It is the work
//! queue and the checkpoint: after every wave, entries that succeeded are
//! removed and the file is rewritten, so an interrupted run resumes where it
//! stopped. Entries that fail stay in the file for the next invocation.

use super::ComicSource;
use crate::deadline::{guarded, Deadline};
use crate::error::ScrapeError;
use crate::models::ManifestEntry;
use futures::future::join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("invalid manifest name: {0}")]
    InvalidName(String),

    #[error("manifest not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("malformed manifest: {0}")]
    Malformed(String),

    #[error("manifest I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Accepted on-disk layouts. Always written back as a bare list.
#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    List(Vec<ManifestEntry>),
    Wrapped { chapters: Vec<ManifestEntry> },
}

#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Path of manifest `file` inside `dir`. Only plain `.json` file names
    /// are accepted.
    pub fn resolve(dir: &Path, file: &str) -> Result<PathBuf, ManifestError> {
        let file = file.trim();
        let plain = !file.is_empty()
            && !file.starts_with('.')
            && file
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !file.contains("..");
        if !plain {
            return Err(ManifestError::InvalidName(file.to_string()));
        }
        let name = if file.ends_with(".json") {
            file.to_string()
        } else {
            format!("{}.json", file)
        };
        Ok(dir.join(name))
    }

    pub async fn load(path: &Path) -> Result<Self, ManifestError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ManifestError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let parsed: ManifestFile =
            serde_json::from_str(&raw).map_err(|e| ManifestError::Malformed(e.to_string()))?;
        let entries = match parsed {
            ManifestFile::List(entries) | ManifestFile::Wrapped { chapters: entries } => entries,
        };
        if let Some(bad) = entries.iter().position(|e| e.slug.trim().is_empty()) {
            return Err(ManifestError::Malformed(format!("entry {} has an empty slug", bad)));
        }
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove entries by index. Highest index goes first so earlier removals
    /// never shift later ones.
    pub fn remove_indices(&mut self, indices: &[usize]) {
        remove_desc(&mut self.entries, indices);
    }

    /// Write to a temporary sibling, then rename over the manifest.
    pub async fn save(&self) -> Result<(), ManifestError> {
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| ManifestError::Malformed(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ManifestParams {
    /// Soft deadline; renewed while work remains
    pub timeout: Duration,
    pub concurrency: usize,
    /// Pause before the single retry of a transient failure
    pub retry_delay: Duration,
    /// Pause after a wave that made no progress
    pub stall_pause: Duration,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChapterStatus {
    pub slug: String,
    pub title: String,
    /// `ok`, `ok (retry)`, `failed` or `aborted`
    pub status: String,
    pub images: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChapterStatus {
    fn succeeded(&self) -> bool {
        self.status == "ok" || self.status == "ok (retry)"
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestReport {
    pub success: bool,
    pub file: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub remaining: usize,
    pub waves: usize,
    /// Times the soft deadline was renewed
    pub extensions: usize,
    /// Stopped after repeated waves without progress
    pub stalled: bool,
    pub results: Vec<ChapterStatus>,
}

async fn attempt(
    source: &dyn ComicSource,
    entry: &ManifestEntry,
    token: &CancellationToken,
) -> Result<usize, ScrapeError> {
    let response = guarded(token, source.fetch_comic(&entry.slug)).await??;
    if response.images.is_empty() {
        return Err(ScrapeError::NotFound(
            response.warning.unwrap_or_else(|| "no images".to_string()),
        ));
    }
    Ok(response.images.len())
}

/// What a wave's outcome means for the entry within this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    /// Ingested; removed from the manifest
    Done,
    /// Failed for good; stays in the manifest for the next invocation
    Failed,
    /// Transient failure or cut short by the deadline; tried again in a later wave
    Again,
}

async fn process_entry(
    source: &dyn ComicSource,
    entry: &ManifestEntry,
    token: &CancellationToken,
    retry_delay: Duration,
) -> (ChapterStatus, Verdict) {
    let status = |status: &str, images: usize, error: Option<String>| ChapterStatus {
        slug: entry.slug.clone(),
        title: entry.title.clone(),
        status: status.to_string(),
        images,
        error,
    };

    match attempt(source, entry, token).await {
        Ok(images) => (status("ok", images, None), Verdict::Done),
        Err(_) if token.is_cancelled() => (status("aborted", 0, None), Verdict::Again),
        Err(e) if e.is_transient() => {
            warn!("[auto-json] {} transient failure, retrying: {}", entry.slug, e);
            tokio::time::sleep(retry_delay).await;
            match attempt(source, entry, token).await {
                Ok(images) => (status("ok (retry)", images, None), Verdict::Done),
                Err(_) if token.is_cancelled() => (status("aborted", 0, None), Verdict::Again),
                Err(e) if e.is_transient() => {
                    (status("failed", 0, Some(e.to_string())), Verdict::Again)
                }
                Err(e) => (status("failed", 0, Some(e.to_string())), Verdict::Failed),
            }
        }
        Err(e) => (status("failed", 0, Some(e.to_string())), Verdict::Failed),
    }
}

/// Per-entry bookkeeping, index-aligned with the manifest entries
#[derive(Default)]
struct Slot {
    settled: bool,
    last: Option<ChapterStatus>,
}

/// Work through `manifest` until every entry is ingested or failed for good,
/// or two consecutive waves settle nothing.
///
/// A wave settles an entry when it succeeds (removed from the file) or fails
/// permanently (left in the file, skipped for the rest of the run). Waves
/// that only saw transient failures pause before the next try; waves that
/// were only cut short by the deadline go again at once with a renewed one.
pub async fn run(
    source: &dyn ComicSource,
    mut manifest: Manifest,
    params: ManifestParams,
) -> Result<ManifestReport, ManifestError> {
    let file = manifest
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let total = manifest.len();
    let concurrency = params.concurrency.max(1);

    let mut deadline = Deadline::after(params.timeout);
    let mut slots: Vec<Slot> = (0..manifest.len()).map(|_| Slot::default()).collect();
    let mut completed = Vec::new();
    let mut waves = 0;
    let mut extensions = 0;
    let mut idle_waves = 0;
    let mut stalled = false;

    info!("[auto-json] {}: {} chapter(s) queued", file, total);

    loop {
        let wave: Vec<(usize, ManifestEntry)> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.settled)
            .take(concurrency)
            .map(|(idx, _)| (idx, manifest.entries()[idx].clone()))
            .collect();
        if wave.is_empty() {
            break;
        }

        if deadline.is_expired() {
            extensions += 1;
            info!(
                "[auto-json] {}: deadline reached with {} chapter(s) left, extending (#{})",
                file,
                slots.iter().filter(|s| !s.settled).count(),
                extensions
            );
            deadline.renew(params.timeout);
        }
        let token = deadline.token();

        let outcomes = join_all(
            wave.iter()
                .map(|(_, entry)| process_entry(source, entry, &token, params.retry_delay)),
        )
        .await;
        waves += 1;

        let mut done = Vec::new();
        let mut failed = 0;
        let mut transient = false;
        for ((idx, _), (status, verdict)) in wave.iter().zip(outcomes) {
            match verdict {
                Verdict::Done => {
                    done.push(*idx);
                    completed.push(status);
                    continue;
                }
                Verdict::Failed => {
                    failed += 1;
                    slots[*idx].settled = true;
                }
                Verdict::Again => transient |= status.status == "failed",
            }
            slots[*idx].last = Some(status);
        }

        if !done.is_empty() {
            manifest.remove_indices(&done);
            remove_desc(&mut slots, &done);
            manifest.save().await?;
        }

        if !done.is_empty() || failed > 0 {
            idle_waves = 0;
            continue;
        }

        idle_waves += 1;
        if idle_waves >= 2 {
            warn!("[auto-json] {}: no progress in two waves, stopping", file);
            stalled = true;
            break;
        }
        if transient {
            warn!(
                "[auto-json] {}: wave made no progress, pausing {:?} before retrying",
                file, params.stall_pause
            );
            tokio::time::sleep(params.stall_pause).await;
        }
    }

    let mut results = completed;
    results.extend(slots.into_iter().filter_map(|slot| slot.last));
    let succeeded = results.iter().filter(|r| r.succeeded()).count();
    let failed = results.iter().filter(|r| r.status == "failed").count();
    info!(
        "[auto-json] {}: {} succeeded, {} left in manifest after {} wave(s)",
        file,
        succeeded,
        manifest.len(),
        waves
    );

    Ok(ManifestReport {
        success: true,
        file,
        total,
        succeeded,
        failed,
        remaining: manifest.len(),
        waves,
        extensions,
        stalled,
        results,
    })
}

/// Remove `indices` from `items`, highest first.
fn remove_desc<T>(items: &mut Vec<T>, indices: &[usize]) {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();
    for idx in sorted {
        if idx < items.len() {
            items.remove(idx);
        }
    }
}
