//! URL building and HTML extraction for the doujin site
//!
//! Everything here is synchronous and pure: callers hand in rendered HTML and
//! get typed records back. Navigation and session handling live in
//! [`crate::scraper`].

use crate::error::ScrapeError;
use crate::helpers::dedupe_preserving_order;
use crate::models::{ChapterLink, ComicDetail, ComicSummary, ListingPage};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use url::Url;

/// Waited for before a listing or search page is parsed
pub const LISTING_MARKER: &str = "div.entries, div.not-found";
/// Waited for before a detail page is parsed
pub const DETAIL_MARKER: &str = "section.metadata";
/// Waited for before reader images are collected
pub const READER_MARKER: &str = "div.reader-area, main#reader";

const NOT_FOUND_TITLES: &[&str] = &["not found", "tidak ditemukan"];

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css}: {e:?}"))
}

static ENTRY: LazyLock<Selector> = LazyLock::new(|| selector("div.entries article.entry"));
static ENTRY_TITLE: LazyLock<Selector> = LazyLock::new(|| selector("h3.title"));
static ENTRY_TYPE: LazyLock<Selector> = LazyLock::new(|| selector("span.type"));
static ENTRY_CHAPTER: LazyLock<Selector> = LazyLock::new(|| selector("div.artists, span.chapter"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static IMG: LazyLock<Selector> = LazyLock::new(|| selector("img"));
static PAGINATION: LazyLock<Selector> =
    LazyLock::new(|| selector("nav.pagination a, nav.pagination span"));

static DETAIL_TITLE: LazyLock<Selector> = LazyLock::new(|| selector("section.metadata h1.title"));
static DETAIL_ALT_TITLE: LazyLock<Selector> = LazyLock::new(|| selector("section.metadata span.alter"));
static DETAIL_THUMB: LazyLock<Selector> = LazyLock::new(|| selector("figure.thumbnail img"));
static DETAIL_SYNOPSIS: LazyLock<Selector> = LazyLock::new(|| selector("div.synopsis p"));
static DETAIL_ROWS: LazyLock<Selector> = LazyLock::new(|| selector("section.metadata table tr"));
static DETAIL_CELL: LazyLock<Selector> = LazyLock::new(|| selector("td"));
static DETAIL_GENRES: LazyLock<Selector> = LazyLock::new(|| selector("div.tags a"));
static CHAPTER_ITEM: LazyLock<Selector> = LazyLock::new(|| selector("div#chapter_list li"));
static CHAPTER_TITLE: LazyLock<Selector> = LazyLock::new(|| selector("span.lchx, span.chapter-title"));
static CHAPTER_DATE: LazyLock<Selector> = LazyLock::new(|| selector("span.date"));

static READER_IMG: LazyLock<Selector> =
    LazyLock::new(|| selector("div.reader-area img, main#reader img"));

static LISTING_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^/]+/doujin/(page/[1-9][0-9]{0,4}/)?$")
        .unwrap_or_else(|e| panic!("invalid listing pattern: {e}"))
});

static SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap_or_else(|e| panic!("invalid slug pattern: {e}"))
});

fn base(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

/// Listing URL for `page`. Anything but a positive page number is rejected.
pub fn listing_url(base_url: &str, page: &str) -> Result<String, ScrapeError> {
    let page = page.trim();
    let url = if page.is_empty() || page == "1" {
        format!("{}/doujin/", base(base_url))
    } else {
        format!("{}/doujin/page/{}/", base(base_url), page)
    };
    if !LISTING_URL.is_match(&url) {
        return Err(ScrapeError::InvalidInput(format!("invalid listing page: {}", page)));
    }
    Ok(url)
}

pub fn search_url(base_url: &str, query: &str, page: u32) -> String {
    let q = urlencoding::encode(query.trim());
    if page <= 1 {
        format!("{}/?s={}", base(base_url), q)
    } else {
        format!("{}/page/{}/?s={}", base(base_url), page, q)
    }
}

pub fn detail_url(base_url: &str, slug: &str) -> String {
    format!("{}/manga/{}/", base(base_url), slug)
}

pub fn comic_url(base_url: &str, slug: &str) -> String {
    format!("{}/{}/", base(base_url), slug)
}

/// Accept a bare slug or an absolute URL and return the slug.
pub fn resolve_slug(input: &str) -> Result<String, ScrapeError> {
    let input = input.trim();
    let candidate = if input.starts_with("http://") || input.starts_with("https://") {
        let parsed = Url::parse(input)
            .map_err(|e| ScrapeError::InvalidInput(format!("bad url {}: {}", input, e)))?;
        parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .unwrap_or_default()
            .to_string()
    } else {
        input.trim_matches('/').to_string()
    };

    if SLUG.is_match(&candidate) {
        Ok(candidate)
    } else {
        Err(ScrapeError::InvalidInput(format!("cannot resolve slug from {:?}", input)))
    }
}

/// True if the page title says the content is missing.
pub fn is_not_found_title(title: &str) -> bool {
    let title = title.trim().to_lowercase();
    // A status code only counts as the leading token ("404 - ..."), not inside a name.
    let leading_status = title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .next()
        .is_some_and(|token| token == "404");
    leading_status || NOT_FOUND_TITLES.iter().any(|marker| title.contains(marker))
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .next()
        .map(text_of)
        .filter(|s| !s.is_empty())
}

fn image_source(img: ElementRef<'_>) -> Option<String> {
    let attrs = img.value();
    ["data-src", "data-lazy-src", "src"]
        .iter()
        .filter_map(|name| attrs.attr(name))
        .map(str::trim)
        .find(|v| !v.is_empty() && !v.starts_with("data:"))
        .map(|v| v.to_string())
}

fn absolutize(base_url: &str, href: &str) -> String {
    match Url::parse(base_url).and_then(|b| b.join(href)) {
        Ok(url) => url.to_string(),
        Err(_) => href.to_string(),
    }
}

fn slug_from_link(link: &str) -> String {
    resolve_slug(link).unwrap_or_default()
}

/// Summaries and page count from a listing or search results page.
pub fn parse_listing(html: &str, base_url: &str) -> ListingPage {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let mut data = Vec::new();
    for entry in root.select(&ENTRY) {
        let Some(anchor) = entry.select(&ANCHOR).next() else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let link = absolutize(base_url, href);
        let title = first_text(entry, &ENTRY_TITLE)
            .or_else(|| anchor.value().attr("title").map(|t| t.trim().to_string()))
            .unwrap_or_default();

        data.push(ComicSummary {
            title,
            slug: slug_from_link(&link),
            link,
            thumbnail: entry.select(&IMG).next().and_then(image_source),
            kind: first_text(entry, &ENTRY_TYPE),
            chapter: first_text(entry, &ENTRY_CHAPTER),
        });
    }

    let total_pages = root
        .select(&PAGINATION)
        .filter_map(|el| text_of(el).replace(',', "").parse::<u32>().ok())
        .max()
        .unwrap_or(1)
        .max(1);

    ListingPage { data, total_pages }
}

/// The metadata half of a detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailMetadata {
    pub title: String,
    pub alt_title: Option<String>,
    pub thumbnail: Option<String>,
    pub synopsis: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub genres: Vec<String>,
}

pub fn parse_detail_metadata(html: &str) -> DetailMetadata {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let mut metadata = BTreeMap::new();
    for row in root.select(&DETAIL_ROWS) {
        let cells: Vec<String> = row.select(&DETAIL_CELL).map(text_of).collect();
        if let [key, .., value] = cells.as_slice() {
            if !key.is_empty() {
                metadata.insert(key.trim_end_matches(':').to_string(), value.clone());
            }
        }
    }

    let synopsis = root
        .select(&DETAIL_SYNOPSIS)
        .map(text_of)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    DetailMetadata {
        title: first_text(root, &DETAIL_TITLE).unwrap_or_default(),
        alt_title: first_text(root, &DETAIL_ALT_TITLE),
        thumbnail: root.select(&DETAIL_THUMB).next().and_then(image_source),
        synopsis: (!synopsis.is_empty()).then_some(synopsis),
        metadata,
        genres: root.select(&DETAIL_GENRES).map(text_of).filter(|g| !g.is_empty()).collect(),
    }
}

/// The chapter-list half of a detail page.
pub fn parse_chapters(html: &str, base_url: &str) -> Vec<ChapterLink> {
    let document = Html::parse_document(html);
    document
        .root_element()
        .select(&CHAPTER_ITEM)
        .filter_map(|item| {
            let anchor = item.select(&ANCHOR).next()?;
            let link = absolutize(base_url, anchor.value().attr("href")?);
            let title = first_text(item, &CHAPTER_TITLE).unwrap_or_else(|| text_of(anchor));
            Some(ChapterLink {
                title,
                slug: slug_from_link(&link),
                link,
                date: first_text(item, &CHAPTER_DATE),
            })
        })
        .collect()
}

pub fn assemble_detail(slug: &str, meta: DetailMetadata, chapters: Vec<ChapterLink>) -> ComicDetail {
    ComicDetail {
        slug: slug.to_string(),
        title: meta.title,
        alt_title: meta.alt_title,
        thumbnail: meta.thumbnail,
        synopsis: meta.synopsis,
        metadata: meta.metadata,
        genres: meta.genres,
        chapters,
    }
}

/// Absolute http(s) image URLs inside the reader, deduplicated, in page order.
pub fn parse_reader_images(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let urls = document
        .root_element()
        .select(&READER_IMG)
        .filter_map(image_source)
        .filter(|src| src.starts_with("http://") || src.starts_with("https://"));
    dedupe_preserving_order(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://doujin.example.com";

    fn listing_html() -> String {
        r##"<html><body><div class="entries">
            <article class="entry"><a href="/manga/alpha/" title="Alpha">
                <img data-src="https://img.example.com/alpha.jpg" src="data:image/gif;base64,R0lG">
                <h3 class="title">Alpha</h3><span class="type">Doujinshi</span></a></article>
            <article class="entry"><a href="https://doujin.example.com/manga/beta/">
                <img src="https://img.example.com/beta.jpg"><h3 class="title"> Beta  Two </h3></a></article>
        </div>
        <nav class="pagination"><span>1</span><a href="#">2</a><a href="#">12</a><a href="#">Next</a></nav>
        </body></html>"##
            .to_string()
    }

    #[test]
    fn test_listing_url_validation() {
        assert_eq!(listing_url(BASE, "1").unwrap(), "https://doujin.example.com/doujin/");
        assert_eq!(
            listing_url(BASE, "3").unwrap(),
            "https://doujin.example.com/doujin/page/3/"
        );
        assert!(listing_url(BASE, "abc").is_err());
        assert!(listing_url(BASE, "0").is_err());
        assert!(listing_url(BASE, "2/../../admin").is_err());
    }

    #[test]
    fn test_search_url_encodes_query() {
        assert_eq!(search_url(BASE, "a b&c", 1), "https://doujin.example.com/?s=a%20b%26c");
        assert_eq!(search_url(BASE, "x", 2), "https://doujin.example.com/page/2/?s=x");
    }

    #[test]
    fn test_resolve_slug() {
        assert_eq!(resolve_slug("my-comic").unwrap(), "my-comic");
        assert_eq!(
            resolve_slug("https://doujin.example.com/manga/my-comic/").unwrap(),
            "my-comic"
        );
        assert!(resolve_slug("").is_err());
        assert!(resolve_slug("../etc/passwd").is_err());
    }

    #[test]
    fn test_parse_listing() {
        let page = parse_listing(&listing_html(), BASE);
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.total_pages, 12);
        let alpha = &page.data[0];
        assert_eq!(alpha.slug, "alpha");
        assert_eq!(alpha.link, "https://doujin.example.com/manga/alpha/");
        assert_eq!(alpha.thumbnail.as_deref(), Some("https://img.example.com/alpha.jpg"));
        assert_eq!(alpha.kind.as_deref(), Some("Doujinshi"));
        assert_eq!(page.data[1].title, "Beta Two");
    }

    #[test]
    fn test_pagination_defaults_to_one() {
        let page = parse_listing("<div class='entries'></div>", BASE);
        assert!(page.data.is_empty());
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn test_parse_detail() {
        let html = r#"<section class="metadata"><h1 class="title">Gamma</h1>
            <span class="alter">Gamma Alt</span>
            <table><tr><td>Status</td><td>Finished</td></tr><tr><td>Author:</td><td>Someone</td></tr></table>
            <div class="tags"><a>Comedy</a><a>Drama</a></div></section>
            <figure class="thumbnail"><img src="https://img.example.com/g.jpg"></figure>
            <div class="synopsis"><p>Line one.</p><p>Line two.</p></div>
            <div id="chapter_list"><ul>
              <li><a href="/gamma-chapter-2/"><span class="lchx">Chapter 2</span></a><span class="date">May 2</span></li>
              <li><a href="/gamma-chapter-1/">Chapter 1</a></li>
            </ul></div>"#;
        let meta = parse_detail_metadata(html);
        assert_eq!(meta.title, "Gamma");
        assert_eq!(meta.alt_title.as_deref(), Some("Gamma Alt"));
        assert_eq!(meta.metadata.get("Author").map(String::as_str), Some("Someone"));
        assert_eq!(meta.genres, vec!["Comedy", "Drama"]);
        assert_eq!(meta.synopsis.as_deref(), Some("Line one.\nLine two."));

        let chapters = parse_chapters(html, BASE);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].slug, "gamma-chapter-2");
        assert_eq!(chapters[0].title, "Chapter 2");
        assert_eq!(chapters[0].date.as_deref(), Some("May 2"));
        assert_eq!(chapters[1].title, "Chapter 1");
    }

    #[test]
    fn test_reader_images_filtered_and_deduped() {
        let html = r#"<div class="reader-area">
            <img src="https://cdn.example.com/1.jpg">
            <img data-lazy-src="https://cdn.example.com/2.jpg" src="data:image/svg+xml,">
            <img src="/relative/3.jpg">
            <img src="https://cdn.example.com/1.jpg">
        </div>"#;
        assert_eq!(
            parse_reader_images(html),
            vec!["https://cdn.example.com/1.jpg", "https://cdn.example.com/2.jpg"]
        );
    }

    #[test]
    fn test_not_found_titles() {
        assert!(is_not_found_title("Page Not Found - Doujin"));
        assert!(is_not_found_title("Halaman tidak ditemukan"));
        assert!(!is_not_found_title("Gamma Chapter 1"));
        assert!(is_not_found_title("404 - Doujin"));
        assert!(!is_not_found_title("Room 404 Chapter 2"));
        assert!(!is_not_found_title("Chapter 404"));
    }
}
