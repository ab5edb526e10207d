use crate::deadline::Deadline;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER};
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tokio::time::sleep;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Configuration for the image fetch client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Deadline for a single attempt
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: usize,
    pub initial_retry_delay: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_retries: 3,
            initial_retry_delay: Duration::from_secs(1),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Errors from a byte fetch, after retries are exhausted
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("fetch of {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("fetch of {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("fetch of {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// HTTP client that fetches raw bytes with bounded exponential-backoff retry
pub struct EnhancedHttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl EnhancedHttpClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("image/avif,image/webp,image/apng,image/*,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .default_headers(headers)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Exponential backoff: initial * 2^attempt (1s, 2s, 4s with the defaults)
    pub fn calculate_retry_delay(&self, attempt: usize) -> Duration {
        self.config.initial_retry_delay * 2u32.saturating_pow(attempt as u32)
    }

    /// Fetch `url` as bytes. Every failure (network, timeout, non-2xx) is
    /// retried; a permanently failing URL is attempted `max_retries + 1` times.
    pub async fn fetch_bytes(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<FetchedBytes, FetchError> {
        let attempts = self.config.max_retries + 1;
        let mut attempt = 0;
        loop {
            match self.fetch_once(url, referer).await {
                Ok(fetched) => return Ok(fetched),
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.calculate_retry_delay(attempt);
                    log::warn!(
                        "[fetch] attempt {}/{} for {} failed: {}; retrying in {:?}",
                        attempt + 1,
                        attempts,
                        url,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    log::error!("[fetch] giving up on {} after {} attempts: {}", url, attempts, e);
                    return Err(e);
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str, referer: Option<&str>) -> Result<FetchedBytes, FetchError> {
        // Dropped on every exit path, which clears the timer.
        let deadline = Deadline::after(self.config.timeout);
        let timed_out = || FetchError::Timeout {
            url: url.to_string(),
            secs: self.config.timeout.as_secs(),
        };
        let network = |e: reqwest::Error| {
            if e.is_timeout() {
                timed_out()
            } else {
                FetchError::Network {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = deadline
            .run(request.send())
            .await
            .map_err(|_| timed_out())?
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = deadline
            .run(response.bytes())
            .await
            .map_err(|_| timed_out())?
            .map_err(network)?;

        Ok(FetchedBytes {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
