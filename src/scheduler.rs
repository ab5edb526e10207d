use crate::app_state::AppState;
use actix_web::web;
use std::time::Duration;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Start the background maintenance loops: periodic pool recycling and
/// pruning of expired cache entries, rate-limit windows and proxy counters.
pub fn spawn(data: web::Data<AppState>) {
    let recycle_every = data.config.browser.recycle_interval();
    let pool_data = data.clone();
    // 0 turns recycling off
    if !recycle_every.is_zero() {
        spawn_recycler(pool_data, recycle_every);
    }

    // Proxy counters live as long as a cached response would.
    let hits_idle = Duration::from_secs(data.config.cache.ttl_secs);
    actix_web::rt::spawn(async move {
        loop {
            actix_web::rt::time::sleep(SWEEP_INTERVAL).await;
            let expired = data.cache.prune();
            let clients = data.rate_limiter.prune();
            let proxied = data.catalog.rehoster().prune_hits(hits_idle);
            if expired > 0 || clients > 0 || proxied > 0 {
                log::debug!(
                    "[scheduler] pruned {} cache entr(ies), {} rate-limit window(s), {} proxy counter(s)",
                    expired,
                    clients,
                    proxied
                );
            }
        }
    });
}

fn spawn_recycler(pool_data: web::Data<AppState>, recycle_every: Duration) {
    actix_web::rt::spawn(async move {
        loop {
            actix_web::rt::time::sleep(recycle_every).await;
            log::info!("[scheduler] recycling browser pool");
            let launched = pool_data.pool.recycle().await;
            log::info!(
                "[scheduler] pool recycled: {} session(s) relaunched, generation {}",
                launched,
                pool_data.pool.stats().generation
            );
        }
    });
}
