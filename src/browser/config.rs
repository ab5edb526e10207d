use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for pooled browser sessions
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// Number of live sessions kept in the pool
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Run browser in headless mode
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Chrome/Chromium binary; autodetected when unset
    #[serde(default)]
    pub executable_path: Option<PathBuf>,

    /// Keep the Chrome sandbox on. Containers usually need this off.
    #[serde(default = "default_true")]
    pub sandbox: bool,

    /// Browser window size
    #[serde(default = "default_window_size")]
    pub window_size: (u32, u32),

    /// User agent sent by every session
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Navigation timeout in seconds
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// How long to wait for a page's content marker, in seconds
    #[serde(default = "default_navigation_timeout")]
    pub marker_timeout_secs: u64,

    /// Sessions are torn down and relaunched on this interval
    #[serde(default = "default_recycle_interval")]
    pub recycle_interval_secs: u64,

    /// Additional Chrome flags
    #[serde(default = "default_chrome_flags")]
    pub chrome_flags: Vec<String>,
}

fn default_true() -> bool { true }
fn default_pool_size() -> usize { 3 }
fn default_window_size() -> (u32, u32) { (1366, 768) }
fn default_navigation_timeout() -> u64 { 10 }
fn default_recycle_interval() -> u64 { 3600 }

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
        .to_string()
}

fn default_chrome_flags() -> Vec<String> {
    vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
    ]
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            headless: true,
            executable_path: None,
            sandbox: true,
            window_size: default_window_size(),
            user_agent: default_user_agent(),
            navigation_timeout_secs: default_navigation_timeout(),
            marker_timeout_secs: default_navigation_timeout(),
            recycle_interval_secs: default_recycle_interval(),
            chrome_flags: default_chrome_flags(),
        }
    }
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn marker_timeout(&self) -> Duration {
        Duration::from_secs(self.marker_timeout_secs)
    }

    pub fn recycle_interval(&self) -> Duration {
        Duration::from_secs(self.recycle_interval_secs)
    }
}
