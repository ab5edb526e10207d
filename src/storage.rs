//! Object storage for re-hosted images
//!
//! The only capability needed is "put bytes at a path, get back a durable
//! public URL". [`S3Storage`] talks to any S3-compatible bucket; [`MemoryStorage`]
//! keeps objects in a map for tests and local runs.

use crate::config::StorageConfig;
use async_trait::async_trait;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use log::info;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("upload of {path} failed: {message}")]
    Upload { path: String, message: String },

    #[error("invalid object path: {0}")]
    InvalidPath(String),
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` at `path` and return the public URL.
    async fn put(&self, bytes: Vec<u8>, path: &str, content_type: &str) -> Result<String, StorageError>;
}

/// Reject empty, absolute and traversing keys.
fn validate_path(path: &str) -> Result<(), StorageError> {
    if path.is_empty() || path.starts_with('/') || path.split('/').any(|s| s == ".." || s.is_empty()) {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// S3-compatible bucket storage
pub struct S3Storage {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3Storage {
    pub fn new(client: Client, bucket: impl Into<String>, public_base_url: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build a client from the configured region/endpoint. Credentials come
    /// from the standard AWS provider chain.
    pub async fn from_config(config: &StorageConfig) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(true);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        let client = Client::from_conf(builder.build());

        let public_base_url = match (&config.public_base_url, &config.endpoint) {
            (Some(base), _) => base.clone(),
            (None, Some(endpoint)) => format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket),
            (None, None) => format!("https://{}.s3.{}.amazonaws.com", config.bucket, config.region),
        };
        info!("[storage] S3 bucket {} served from {}", config.bucket, public_base_url);

        Self::new(client, config.bucket.clone(), public_base_url)
    }

    pub fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base_url, path)
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put(&self, bytes: Vec<u8>, path: &str, content_type: &str) -> Result<String, StorageError> {
        validate_path(path)?;
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                path: path.to_string(),
                message: e.into_service_error().to_string(),
            })?;

        log::debug!("[storage] wrote {} bytes to s3://{}/{}", size, self.bucket, path);
        Ok(self.public_url(path))
    }
}

/// In-memory object storage
pub struct MemoryStorage {
    base_url: String,
    objects: RwLock<HashMap<String, (String, Vec<u8>)>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: RwLock::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make every upload to `path` fail.
    pub fn fail_path(&self, path: impl Into<String>) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(path.into());
        }
    }

    pub async fn get(&self, path: &str) -> Option<(String, Vec<u8>)> {
        self.objects.read().await.get(path).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new("memory://cdn")
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(&self, bytes: Vec<u8>, path: &str, content_type: &str) -> Result<String, StorageError> {
        validate_path(path)?;
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(path))
            .unwrap_or(false);
        if failing {
            return Err(StorageError::Upload {
                path: path.to_string(),
                message: "simulated failure".to_string(),
            });
        }
        self.objects
            .write()
            .await
            .insert(path.to_string(), (content_type.to_string(), bytes));
        Ok(format!("{}/{}", self.base_url, path))
    }
}
