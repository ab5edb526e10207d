//! Per-client fixed-window rate limiting
//!
//! Best effort: counters live in one map keyed by client address and are
//! reset when their window ends. Stale windows are pruned by the scheduler.

use crate::app_state::AppState;
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::middleware::Next;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    window: Duration,
    /// 0 disables limiting
    max_requests: u32,
    clients: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Count a request from `client`; false once it is over the limit.
    pub fn check(&self, client: &str) -> bool {
        if self.max_requests == 0 {
            return true;
        }
        let mut clients = self.clients.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        let window = clients.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }
        window.count += 1;
        window.count <= self.max_requests
    }

    /// Drop clients whose window has ended.
    pub fn prune(&self) -> usize {
        let mut clients = self.clients.lock().unwrap_or_else(|p| p.into_inner());
        let before = clients.len();
        let window = self.window;
        clients.retain(|_, w| w.started.elapsed() < window);
        before - clients.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

/// Middleware rejecting clients over the limit with 429
pub async fn enforce(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let client = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string();

    let allowed = req
        .app_data::<web::Data<AppState>>()
        .map_or(true, |state| state.rate_limiter.check(&client));

    if !allowed {
        log::warn!("[rate-limit] rejecting {}", client);
        let response = HttpResponse::TooManyRequests()
            .json(json!({ "error": "Too many requests, slow down" }));
        return Ok(req.into_response(response).map_into_right_body());
    }

    next.call(req).await.map(|res| res.map_into_left_body())
}
