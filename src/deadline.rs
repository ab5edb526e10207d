//! Scoped cancellation with a deadline
//!
//! A [`Deadline`] owns a cancellation token and a timer task that cancels the
//! token when the duration elapses. The timer is aborted when the handle is
//! dropped, so no path (success, error, early return) leaks a timer.
//! A fired deadline is never reset; [`Deadline::renew`] hands out a new one.

use crate::error::ScrapeError;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct Deadline {
    token: CancellationToken,
    timer: Option<JoinHandle<()>>,
    expires_at: Instant,
}

impl Deadline {
    /// Must be called from within a Tokio runtime.
    pub fn after(duration: Duration) -> Self {
        let token = CancellationToken::new();
        let expires_at = Instant::now() + duration;
        let trigger = token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            trigger.cancel();
        });
        Self {
            token,
            timer: Some(timer),
            expires_at,
        }
    }

    /// A clone of the token, for handing to sub-operations.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Fire early.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Race `fut` against the deadline.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ScrapeError>
    where
        F: Future<Output = T>,
    {
        guarded(&self.token, fut).await
    }

    /// Replace this deadline with a fresh one of `duration`. The old token
    /// stays cancelled for anyone still holding it.
    pub fn renew(&mut self, duration: Duration) {
        *self = Deadline::after(duration);
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Race `fut` against an existing token. `Aborted` if the token fires first
/// or had already fired.
pub async fn guarded<F, T>(token: &CancellationToken, fut: F) -> Result<T, ScrapeError>
where
    F: Future<Output = T>,
{
    if token.is_cancelled() {
        return Err(ScrapeError::Aborted);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ScrapeError::Aborted),
        out = fut => Ok(out),
    }
}

/// Bound `fut` by `duration`, reporting `label` on timeout.
pub async fn with_timeout<F, T>(duration: Duration, label: &str, fut: F) -> Result<T, ScrapeError>
where
    F: Future<Output = Result<T, ScrapeError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ScrapeError::Timeout(format!(
            "{} after {}ms",
            label,
            duration.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_before_deadline() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let out = deadline.run(async { 7 }).await.unwrap();
        assert_eq!(out, 7);
        assert!(!deadline.is_expired());
    }

    #[tokio::test]
    async fn test_run_aborts_after_deadline() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let result = deadline
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(matches!(result, Err(ScrapeError::Aborted)));
        assert!(deadline.is_expired());
    }

    #[tokio::test]
    async fn test_drop_clears_timer() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let token = deadline.token();
        drop(deadline);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_renew_gives_fresh_context() {
        let mut deadline = Deadline::after(Duration::from_millis(1));
        let old = deadline.token();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(deadline.is_expired());

        deadline.renew(Duration::from_secs(5));
        assert!(!deadline.is_expired());
        assert!(old.is_cancelled());
    }

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed() {
        let result: Result<(), ScrapeError> = with_timeout(
            Duration::from_millis(10),
            "navigation",
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            },
        )
        .await;
        match result {
            Err(ScrapeError::Timeout(msg)) => assert!(msg.starts_with("navigation")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
