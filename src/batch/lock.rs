use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchKind {
    AutoFetch,
    AutoJson,
    AutoThumbnail,
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BatchKind::AutoFetch => "auto-fetch",
            BatchKind::AutoJson => "auto-json",
            BatchKind::AutoThumbnail => "auto-thumbnail",
        })
    }
}

/// The job currently holding the lock
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub kind: BatchKind,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: u64,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} job running since {} ({}s)",
            self.kind,
            self.started_at.to_rfc3339(),
            self.elapsed_secs
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("another batch is in progress: {0}")]
pub struct BatchBusy(pub BatchStatus);

struct Running {
    kind: BatchKind,
    started_at: DateTime<Utc>,
    started: Instant,
}

/// Process-wide single-flight lock for batch jobs
#[derive(Default)]
pub struct BatchLock {
    running: Mutex<Option<Running>>,
}

impl BatchLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Take the lock for `kind`, or report the job that holds it.
    pub fn try_acquire(self: &Arc<Self>, kind: BatchKind) -> Result<BatchGuard, BatchBusy> {
        let mut running = self.running();
        if let Some(current) = running.as_ref() {
            return Err(BatchBusy(status_of(current)));
        }
        *running = Some(Running {
            kind,
            started_at: Utc::now(),
            started: Instant::now(),
        });
        log::info!("[batch] {} started", kind);
        Ok(BatchGuard {
            lock: Arc::clone(self),
            kind,
        })
    }

    pub fn current(&self) -> Option<BatchStatus> {
        self.running().as_ref().map(status_of)
    }
}

fn status_of(running: &Running) -> BatchStatus {
    BatchStatus {
        kind: running.kind,
        started_at: running.started_at,
        elapsed_secs: running.started.elapsed().as_secs(),
    }
}

/// Holds the batch lock; dropping it releases the lock.
pub struct BatchGuard {
    lock: Arc<BatchLock>,
    kind: BatchKind,
}

impl fmt::Debug for BatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchGuard").field("kind", &self.kind).finish()
    }
}

impl BatchGuard {
    pub fn kind(&self) -> BatchKind {
        self.kind
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if let Some(done) = self.lock.running().take() {
            log::info!("[batch] {} finished after {}s", done.kind, done.started.elapsed().as_secs());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight() {
        let lock = BatchLock::new();
        let guard = lock.try_acquire(BatchKind::AutoFetch).unwrap();
        let busy = lock.try_acquire(BatchKind::AutoJson).unwrap_err();
        assert_eq!(busy.0.kind, BatchKind::AutoFetch);
        assert!(busy.to_string().contains("auto-fetch"));
        drop(guard);
        assert!(lock.current().is_none());
        assert!(lock.try_acquire(BatchKind::AutoJson).is_ok());
    }

    #[test]
    fn test_released_on_panic() {
        let lock = BatchLock::new();
        let inner = Arc::clone(&lock);
        let result = std::thread::spawn(move || {
            let _guard = inner.try_acquire(BatchKind::AutoThumbnail).unwrap();
            panic!("job blew up");
        })
        .join();
        assert!(result.is_err());
        assert!(lock.current().is_none());
    }

    #[test]
    fn test_busy_reports_start_time() {
        let lock = BatchLock::new();
        let _guard = lock.try_acquire(BatchKind::AutoJson).unwrap();
        let first = lock.current().unwrap();
        let busy = lock.try_acquire(BatchKind::AutoJson).unwrap_err();
        assert_eq!(busy.0.started_at, first.started_at);
    }

    #[test]
    fn test_guard_debug_names_kind() {
        let lock = BatchLock::new();
        let guard = lock.try_acquire(BatchKind::AutoFetch).unwrap();
        assert!(format!("{:?}", guard).contains("AutoFetch"));
    }
}
