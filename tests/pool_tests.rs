mod common;

use common::{page, FakeLauncher};
use rust_doujin_scraper::browser::BrowserPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_holds_under_concurrency() {
    let mut pages = HashMap::new();
    pages.insert("https://doujin.test/".to_string(), page("Home", "<html></html>"));
    let launcher = Arc::new(FakeLauncher::new(pages));
    let pool = BrowserPool::with_poll_interval(launcher.clone(), 3, Duration::from_millis(5));

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let session = pool.acquire().await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                session
                    .navigate("https://doujin.test/", Duration::from_secs(1))
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                let stats = pool.stats();
                assert!(stats.idle + stats.in_use <= 3, "{stats:?}");
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(launcher.launch_count(), 3);
    assert_eq!(launcher.navigation_count(), 12);

    let stats = pool.stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.idle, 3);
}

#[tokio::test]
async fn test_recycle_relaunches_every_session() {
    let launcher = Arc::new(FakeLauncher::new(HashMap::new()));
    let pool = BrowserPool::with_poll_interval(launcher.clone(), 2, Duration::from_millis(5));

    assert_eq!(pool.initialize().await, 2);
    let held = pool.acquire().await;
    assert_eq!(pool.recycle().await, 1);
    assert_eq!(pool.stats().generation, 1);

    // The session checked out before the recycle is closed, not returned.
    drop(held);
    let stats = pool.stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.idle, 1);

    let _again = pool.acquire().await;
    assert_eq!(launcher.launch_count(), 3);
}
