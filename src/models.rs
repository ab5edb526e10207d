use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of a listing or search results page
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ComicSummary {
    pub title: String,
    pub slug: String,
    pub link: String,
    pub thumbnail: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Latest chapter label, when the card shows one
    pub chapter: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    pub data: Vec<ComicSummary>,
    pub total_pages: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChapterLink {
    pub title: String,
    pub slug: String,
    pub link: String,
    pub date: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComicDetail {
    pub slug: String,
    pub title: String,
    pub alt_title: Option<String>,
    pub thumbnail: Option<String>,
    pub synopsis: Option<String>,
    /// Key/value rows of the metadata table (author, status, ...)
    pub metadata: BTreeMap<String, String>,
    pub genres: Vec<String>,
    pub chapters: Vec<ChapterLink>,
}

/// Persisted mapping from a slug to its re-hosted images
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ComicRecord {
    pub slug: String,
    pub source_url: String,
    pub image_url: Vec<String>,
    pub total_images: i32,
    pub updated_at: DateTime<Utc>,
}

impl ComicRecord {
    pub fn new(slug: &str, source_url: &str, image_url: Vec<String>) -> Self {
        Self {
            slug: slug.to_string(),
            source_url: source_url.to_string(),
            total_images: image_url.len() as i32,
            image_url,
            updated_at: Utc::now(),
        }
    }
}

/// Persisted mapping from a derived filename to its re-hosted copy
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ThumbnailRecord {
    pub filename: String,
    pub source_url: String,
    pub cdn_url: String,
    pub updated_at: DateTime<Utc>,
}

impl ThumbnailRecord {
    pub fn new(filename: &str, source_url: &str, cdn_url: &str) -> Self {
        Self {
            filename: filename.to_string(),
            source_url: source_url.to_string(),
            cdn_url: cdn_url.to_string(),
            updated_at: Utc::now(),
        }
    }
}

/// Which tier answered a request
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Fresh,
    Cache,
    Database,
}

/// A value together with the tier that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: DataSource,
}

impl<T> Sourced<T> {
    pub fn new(value: T, source: DataSource) -> Self {
        Self { value, source }
    }
}

/// Response body of `/get-comic`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComicResponse {
    pub success: bool,
    pub images: Vec<String>,
    pub cached: bool,
    pub source: DataSource,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub warning: Option<String>,
    /// `Some(false)` when the upload succeeded but the record could not be stored
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub persisted: Option<bool>,
}

/// A chapter waiting in a batch manifest
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub slug: String,
    #[serde(default)]
    pub title: String,
}
