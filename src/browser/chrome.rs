//! headless_chrome backed sessions
//!
//! Every pooled session owns its own Chrome process and a single tab. The
//! headless_chrome API is blocking, so each call hops onto the blocking
//! thread pool and is bounded by an outer timeout on the async side.

use super::config::BrowserConfig;
use super::session::{BrowserError, BrowserSession, SessionLauncher, SessionOptions, BLOCKED_RESOURCE_KINDS};
use async_trait::async_trait;
use base64::Engine;
use headless_chrome::browser::tab::RequestPausedDecision;
use headless_chrome::browser::transport::{SessionId, Transport};
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{FailRequest, RequestPattern, RequestStage};
use headless_chrome::protocol::cdp::Network::{ErrorReason, ResourceType};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Grace period on top of the CDP-level timeout before the async side gives up.
const BLOCKING_GRACE: Duration = Duration::from_secs(2);

/// Reads the loaded document back through `fetch` so the page's cookies and
/// referer apply, then base64-encodes it for transport over CDP.
const DOCUMENT_BYTES_SCRIPT: &str = r#"
(async () => {
    const res = await fetch(window.location.href, { credentials: 'include' });
    if (!res.ok) { throw new Error('status ' + res.status); }
    const buf = new Uint8Array(await res.arrayBuffer());
    let bin = '';
    for (let i = 0; i < buf.length; i += 0x8000) {
        bin += String.fromCharCode.apply(null, buf.subarray(i, i + 0x8000));
    }
    return btoa(bin);
})()
"#;

/// Launches one Chrome process per session
pub struct ChromeLauncher {
    config: BrowserConfig,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || ChromeSession::launch(&config))
            .await
            .map_err(|e| BrowserError::InitializationError(e.to_string()))??;
        Ok(Box::new(session))
    }
}

pub struct ChromeSession {
    // Held for its Drop: the Chrome process dies with it.
    _browser: Browser,
    tab: Arc<Tab>,
    alive: Arc<AtomicBool>,
}

impl ChromeSession {
    fn launch(config: &BrowserConfig) -> Result<Self, BrowserError> {
        let flags: Vec<OsString> = config.chrome_flags.iter().map(OsString::from).collect();
        let user_agent_arg = OsString::from(format!("--user-agent={}", config.user_agent));

        let mut args: Vec<&OsStr> = flags.iter().map(|f| f.as_os_str()).collect();
        args.push(user_agent_arg.as_os_str());

        let mut builder = LaunchOptions::default_builder();
        builder
            .headless(config.headless)
            .sandbox(config.sandbox)
            .window_size(Some(config.window_size))
            // Idle sessions sit in the pool between requests; keep the CDP socket open until recycle.
            .idle_browser_timeout(config.recycle_interval() + Duration::from_secs(300))
            .args(args);
        if let Some(path) = &config.executable_path {
            builder.path(Some(path.clone()));
        }

        let options = builder
            .build()
            .map_err(|e| BrowserError::ConfigurationError(e.to_string()))?;
        let browser =
            Browser::new(options).map_err(|e| BrowserError::InitializationError(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| BrowserError::TabCreationError(e.to_string()))?;

        Ok(Self {
            _browser: browser,
            tab,
            alive: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Run a blocking tab operation on the blocking pool, bounded by `limit`.
    async fn blocking<T, F>(&self, limit: Duration, what: &str, op: F) -> Result<T, BrowserError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> Result<T, BrowserError> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        let task = tokio::task::spawn_blocking(move || op(tab));
        let result = match tokio::time::timeout(limit + BLOCKING_GRACE, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(BrowserError::JavaScriptError(join.to_string())),
            Err(_) => Err(BrowserError::Timeout(what.to_string())),
        };
        if let Err(e) = &result {
            if is_dead_session(&e.to_string()) {
                log::warn!("[browser] session marked dead after: {}", e);
                self.alive.store(false, Ordering::SeqCst);
            }
        }
        result
    }
}

fn is_dead_session(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("connection is closed")
        || message.contains("no session with given id")
        || message.contains("target closed")
}

fn resource_type(kind: &str) -> Option<ResourceType> {
    match kind {
        "image" => Some(ResourceType::Image),
        "stylesheet" => Some(ResourceType::Stylesheet),
        "font" => Some(ResourceType::Font),
        "media" => Some(ResourceType::Media),
        _ => None,
    }
}

fn block_resources(tab: &Tab) -> Result<(), BrowserError> {
    let patterns: Vec<RequestPattern> = BLOCKED_RESOURCE_KINDS
        .iter()
        .filter_map(|kind| resource_type(kind))
        .map(|kind| RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_Type: Some(kind),
            request_stage: Some(RequestStage::Request),
        })
        .collect();

    tab.enable_fetch(Some(&patterns), None)
        .map_err(|e| BrowserError::ConfigurationError(format!("enable fetch: {}", e)))?;

    // Only the blocked kinds are paused, so every paused request is refused.
    let interceptor = Arc::new(
        |_transport: Arc<Transport>, _session: SessionId, event: RequestPausedEvent| {
            RequestPausedDecision::Fail(FailRequest {
                request_id: event.params.request_id,
                error_reason: ErrorReason::BlockedByClient,
            })
        },
    );
    tab.enable_request_interception(interceptor)
        .map_err(|e| BrowserError::ConfigurationError(format!("request interception: {}", e)))
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn prepare(&self, options: &SessionOptions) -> Result<(), BrowserError> {
        let options = options.clone();
        self.blocking(Duration::from_secs(10), "session setup", move |tab| {
            tab.set_user_agent(&options.user_agent, Some("en-US,en;q=0.9"), None)
                .map_err(|e| BrowserError::ConfigurationError(e.to_string()))?;

            let headers: HashMap<&str, &str> = options
                .extra_headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            tab.set_extra_http_headers(headers)
                .map_err(|e| BrowserError::ConfigurationError(e.to_string()))?;

            tab.enable_stealth_mode()
                .map_err(|e| BrowserError::ConfigurationError(e.to_string()))?;

            if options.block_resources {
                block_resources(&tab)
            } else {
                tab.disable_fetch()
                    .map(|_| ())
                    .map_err(|e| BrowserError::ConfigurationError(e.to_string()))
            }
        })
        .await
    }

    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let url = url.to_string();
        let what = format!("navigation to {}", url);
        self.blocking(timeout, &what, move |tab| {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url).map_err(|e| {
                BrowserError::NavigationError(format!("Failed to navigate to {}: {}", url, e))
            })?;
            tab.wait_until_navigated().map_err(|e| {
                BrowserError::NavigationError(format!("Navigation timeout for {}: {}", url, e))
            })?;
            Ok(())
        })
        .await
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let selector = selector.to_string();
        let what = format!("selector {}", selector);
        self.blocking(timeout, &what, move |tab| {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)
                .map(|_| ())
                .map_err(|_| BrowserError::Timeout(format!("Waiting for selector: {}", selector)))
        })
        .await
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.blocking(Duration::from_secs(10), "page content", |tab| {
            tab.get_content()
                .map_err(|e| BrowserError::HtmlExtractionError(e.to_string()))
        })
        .await
    }

    async fn title(&self) -> Result<String, BrowserError> {
        self.blocking(Duration::from_secs(5), "page title", |tab| {
            tab.get_title()
                .map_err(|e| BrowserError::HtmlExtractionError(e.to_string()))
        })
        .await
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.blocking(Duration::from_secs(5), "page url", |tab| Ok(tab.get_url()))
            .await
    }

    async fn document_bytes(&self, timeout: Duration) -> Result<Vec<u8>, BrowserError> {
        self.blocking(timeout, "document bytes", move |tab| {
            tab.set_default_timeout(timeout);
            let result = tab
                .evaluate(DOCUMENT_BYTES_SCRIPT, true)
                .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
            let encoded = result
                .value
                .and_then(|v| v.as_str().map(|s| s.to_string()))
                .ok_or_else(|| {
                    BrowserError::JavaScriptError("Script returned no value".to_string())
                })?;
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| BrowserError::HtmlExtractionError(e.to_string()))
        })
        .await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_kinds_map_to_resource_types() {
        for kind in BLOCKED_RESOURCE_KINDS {
            assert!(resource_type(kind).is_some(), "unmapped kind {}", kind);
        }
        assert!(resource_type("script").is_none());
    }

    #[test]
    fn test_dead_session_detection() {
        assert!(is_dead_session("Unable to make method calls because underlying connection is closed"));
        assert!(is_dead_session("No session with given id"));
        assert!(!is_dead_session("Navigation timeout"));
    }

    #[tokio::test]
    #[ignore] // Requires Chrome to be installed
    async fn test_launch_and_navigate() {
        let launcher = ChromeLauncher::new(BrowserConfig::default());
        let session = launcher.launch().await.unwrap();
        session
            .prepare(&SessionOptions::scraping("test-agent", "https://example.com/"))
            .await
            .unwrap();
        session
            .navigate("https://example.com", Duration::from_secs(15))
            .await
            .unwrap();
        session.wait_for("h1", Duration::from_secs(5)).await.unwrap();
        let html = session.content().await.unwrap();
        assert!(html.contains("Example"));
    }
}
