//! Helper functions shared by the scrape, ingest and rehost paths
//!
//! - Destination paths and filenames for uploaded images
//! - Extension and content-type detection from URLs
//! - URL hashing for the proxy cache
//!
//! # Examples
//!
//! ```
//! use rust_doujin_scraper::helpers::{destination_path, image_extension};
//!
//! assert_eq!(image_extension("https://cdn.example.com/a/01.png?w=800"), ".png");
//! assert_eq!(destination_path("my-comic", 0, "https://cdn.example.com/a/01.webp"), "comics/my-comic/001.webp");
//! ```

use sha2::{Digest, Sha256};
use std::collections::HashSet;

const KNOWN_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif", ".avif", ".bmp"];

/// Extension of the URL's last path segment, lowercased with the leading dot.
/// `.jpg` when the URL has none (or an unrecognised one).
pub fn image_extension(url: &str) -> String {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.split(['?', '#']).next().unwrap_or("").to_string());
    let last = path.rsplit('/').next().unwrap_or("");
    match last.rfind('.') {
        Some(idx) => {
            let ext = last[idx..].to_lowercase();
            if KNOWN_EXTENSIONS.contains(&ext.as_str()) {
                ext
            } else {
                ".jpg".to_string()
            }
        }
        None => ".jpg".to_string(),
    }
}

/// `comics/<slug>/<NNN><ext>` for the image at zero-based `index`.
pub fn destination_path(slug: &str, index: usize, source_url: &str) -> String {
    format!(
        "comics/{}/{:03}{}",
        sanitize_filename(slug),
        index + 1,
        image_extension(source_url)
    )
}

/// Filename for a re-hosted image: the URL's path segments joined with `-`,
/// sanitized, with an image extension guaranteed.
pub fn filename_from_url(url: &str) -> String {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let joined = path
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let mut name = sanitize_filename(&joined);
    if name.is_empty() {
        name = url_hash(url);
    }
    let ext = image_extension(url);
    if name.to_lowercase().ends_with(&ext) {
        name
    } else {
        format!("{}{}", name, ext)
    }
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_matches('.').to_string()
}

/// Hex SHA-256 of the URL
pub fn url_hash(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// MIME type for an image extension (with dot)
pub fn content_type_for(ext: &str) -> &'static str {
    match ext {
        ".png" => "image/png",
        ".webp" => "image/webp",
        ".gif" => "image/gif",
        ".avif" => "image/avif",
        ".bmp" => "image/bmp",
        _ => "image/jpeg",
    }
}

/// Remove duplicates while keeping first occurrences in order
pub fn dedupe_preserving_order<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
