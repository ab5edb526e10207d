use async_trait::async_trait;
use std::time::Duration;

/// Resource kinds a session may refuse to load while scraping.
pub const BLOCKED_RESOURCE_KINDS: &[&str] = &["image", "stylesheet", "font", "media"];

/// Per-request setup applied to a session right after it is checked out.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Refuse images, stylesheets, fonts and media
    pub block_resources: bool,
    pub user_agent: String,
    pub extra_headers: Vec<(String, String)>,
}

impl SessionOptions {
    /// Text-only scraping: heavy resources are blocked.
    pub fn scraping(user_agent: &str, referer: &str) -> Self {
        Self {
            block_resources: true,
            user_agent: user_agent.to_string(),
            extra_headers: default_headers(referer),
        }
    }

    /// Full rendering, needed when images have to load.
    pub fn full_render(user_agent: &str, referer: &str) -> Self {
        Self {
            block_resources: false,
            ..Self::scraping(user_agent, referer)
        }
    }
}

fn default_headers(referer: &str) -> Vec<(String, String)> {
    vec![
        ("Accept-Language".to_string(), "en-US,en;q=0.9,id;q=0.8".to_string()),
        ("Referer".to_string(), referer.to_string()),
        ("DNT".to_string(), "1".to_string()),
    ]
}

/// One automation session bound to one browser instance.
///
/// Dropping the session closes it.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Apply headers, user agent, interception and detection spoofing.
    async fn prepare(&self, options: &SessionOptions) -> Result<(), BrowserError>;

    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Wait until an element matching `selector` exists.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn content(&self) -> Result<String, BrowserError>;

    async fn title(&self) -> Result<String, BrowserError>;

    /// URL after redirects.
    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Raw bytes of the currently loaded document, fetched from inside the page.
    async fn document_bytes(&self, timeout: Duration) -> Result<Vec<u8>, BrowserError>;

    fn is_alive(&self) -> bool;
}

/// Starts new sessions for the pool.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// Errors that can occur during browser operations
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Browser initialization failed: {0}")]
    InitializationError(String),

    #[error("Browser configuration error: {0}")]
    ConfigurationError(String),

    #[error("Tab creation failed: {0}")]
    TabCreationError(String),

    #[error("Navigation error: {0}")]
    NavigationError(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("JavaScript execution error: {0}")]
    JavaScriptError(String),

    #[error("HTML extraction error: {0}")]
    HtmlExtractionError(String),

    #[error("Session closed: {0}")]
    SessionClosed(String),
}
