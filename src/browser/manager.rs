//! Fixed-capacity pool of browser sessions
//!
//! The pool owns idle sessions; a borrowed session is owned by the
//! [`PooledSession`] guard until it drops, at which point it is handed back
//! (or closed when the pool is full, the session died, or the pool was
//! recycled while it was out).
//!
//! Invariant: `idle + in_use + launching <= capacity` at every point where
//! new sessions are started, and `release` never grows idle past capacity.

use super::session::{BrowserError, BrowserSession, SessionLauncher};
use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const REPLENISH_BACKOFF: Duration = Duration::from_secs(5);

struct IdleSession {
    session: Box<dyn BrowserSession>,
    generation: u64,
}

struct PoolState {
    capacity: usize,
    idle: Vec<IdleSession>,
    in_use: usize,
    launching: usize,
    initialized: bool,
    generation: u64,
    replenish_after: Option<Instant>,
}

impl PoolState {
    fn live(&self) -> usize {
        self.idle.len() + self.in_use + self.launching
    }
}

/// Snapshot of pool occupancy, reported by `/health`
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub capacity: usize,
    pub idle: usize,
    pub in_use: usize,
    pub generation: u64,
}

/// Manages the pool of browser sessions
pub struct BrowserPool {
    launcher: Arc<dyn SessionLauncher>,
    state: Mutex<PoolState>,
    init_lock: tokio::sync::Mutex<()>,
    poll_interval: Duration,
}

impl BrowserPool {
    pub fn new(launcher: Arc<dyn SessionLauncher>, capacity: usize) -> Arc<Self> {
        Self::with_poll_interval(launcher, capacity, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        launcher: Arc<dyn SessionLauncher>,
        capacity: usize,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            launcher,
            state: Mutex::new(PoolState {
                capacity,
                idle: Vec::with_capacity(capacity),
                in_use: 0,
                launching: 0,
                initialized: false,
                generation: 0,
                replenish_after: None,
            }),
            init_lock: tokio::sync::Mutex::new(()),
            poll_interval,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        // A panic while holding the lock leaves counters consistent; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_state().initialized
    }

    /// Launch sessions up to capacity. Safe to call repeatedly; launch
    /// failures are logged and leave the pool smaller. Returns how many
    /// sessions were added.
    pub async fn initialize(&self) -> usize {
        let _init = self.init_lock.lock().await;

        let (wanted, generation) = {
            let mut state = self.lock_state();
            if state.initialized {
                return 0;
            }
            let wanted = state.capacity.saturating_sub(state.live());
            state.launching += wanted;
            (wanted, state.generation)
        };

        info!("[pool] launching {} browser session(s)", wanted);
        let results = join_all((0..wanted).map(|_| self.launcher.launch())).await;

        let mut added = 0;
        let mut failed = 0;
        let mut state = self.lock_state();
        state.launching -= wanted;
        for result in results {
            match result {
                Ok(session) => {
                    if state.generation == generation
                        && state.idle.len() + state.in_use + state.launching < state.capacity
                    {
                        state.idle.push(IdleSession { session, generation });
                        added += 1;
                    } else {
                        close_session(session);
                    }
                }
                Err(e) => {
                    failed += 1;
                    warn!("[pool] session launch failed: {}", e);
                }
            }
        }
        state.initialized = true;
        if failed > 0 {
            state.replenish_after = Some(Instant::now() + REPLENISH_BACKOFF);
            warn!(
                "[pool] initialized with {}/{} sessions ({} launch failures)",
                state.idle.len() + state.in_use,
                state.capacity,
                failed
            );
        } else {
            info!("[pool] initialized with {} session(s)", added);
        }
        added
    }

    /// Borrow a session, waiting as long as it takes for one to free up.
    pub async fn acquire(self: &Arc<Self>) -> PooledSession {
        loop {
            if !self.is_initialized() {
                self.initialize().await;
            }

            let replenish = {
                let mut state = self.lock_state();
                if let Some(idle) = state.idle.pop() {
                    state.in_use += 1;
                    return PooledSession {
                        session: Some(idle.session),
                        generation: idle.generation,
                        pool: Arc::clone(self),
                    };
                }
                let backoff_over = state
                    .replenish_after
                    .map_or(true, |at| Instant::now() >= at);
                if state.initialized && backoff_over && state.live() < state.capacity {
                    state.launching += 1;
                    Some(state.generation)
                } else {
                    None
                }
            };

            match replenish {
                Some(generation) => self.replenish(generation).await,
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    async fn replenish(&self, generation: u64) {
        debug!("[pool] replacing a lost session");
        let result = self.launcher.launch().await;
        let mut state = self.lock_state();
        state.launching -= 1;
        match result {
            Ok(session) => {
                if state.generation == generation && state.live() < state.capacity {
                    state.idle.push(IdleSession { session, generation });
                } else {
                    close_session(session);
                }
            }
            Err(e) => {
                warn!("[pool] replacement launch failed: {}", e);
                state.replenish_after = Some(Instant::now() + REPLENISH_BACKOFF);
            }
        }
    }

    fn release(&self, session: Box<dyn BrowserSession>, generation: u64) {
        let mut state = self.lock_state();
        state.in_use = state.in_use.saturating_sub(1);

        let keep = generation == state.generation
            && session.is_alive()
            && state.idle.len() + state.in_use + state.launching < state.capacity;
        if keep {
            state.idle.push(IdleSession { session, generation });
            return;
        }
        drop(state);
        debug!("[pool] closing released session (generation {})", generation);
        close_session(session);
    }

    /// Close every idle session and start over. Sessions that are checked
    /// out during a recycle are closed when they come back.
    pub async fn recycle(&self) -> usize {
        let stale = {
            let mut state = self.lock_state();
            state.generation += 1;
            state.initialized = false;
            state.replenish_after = None;
            std::mem::take(&mut state.idle)
        };
        info!("[pool] recycling: closing {} idle session(s)", stale.len());
        for idle in stale {
            close_session(idle.session);
        }
        self.initialize().await
    }

    /// Change capacity. Shrinking closes surplus idle sessions now and
    /// surplus borrowed ones on release.
    pub fn resize(&self, capacity: usize) {
        let surplus = {
            let mut state = self.lock_state();
            state.capacity = capacity;
            let keep = capacity.saturating_sub(state.in_use + state.launching);
            if state.idle.len() > keep {
                state.idle.split_off(keep)
            } else {
                Vec::new()
            }
        };
        info!("[pool] resized to {} ({} idle session(s) closed)", capacity, surplus.len());
        for idle in surplus {
            close_session(idle.session);
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock_state();
        PoolStats {
            capacity: state.capacity,
            idle: state.idle.len(),
            in_use: state.in_use,
            generation: state.generation,
        }
    }
}

/// Dropping a Chrome session kills its process; keep that off the async workers when possible.
fn close_session(session: Box<dyn BrowserSession>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(move || drop(session));
        }
        Err(_) => drop(session),
    }
}

/// A session checked out of the pool. Returned on drop.
pub struct PooledSession {
    session: Option<Box<dyn BrowserSession>>,
    generation: u64,
    pool: Arc<BrowserPool>,
}

impl Deref for PooledSession {
    type Target = dyn BrowserSession;

    fn deref(&self) -> &Self::Target {
        match &self.session {
            Some(session) => session.as_ref(),
            None => unreachable!("session is only taken in drop"),
        }
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session, self.generation);
        }
    }
}
