//! Source parser plugins and the registry that resolves them by name.
//!
//! A parser knows one site's markup: how to find article links on its listing
//! page and how to turn an article page into an [`ArticleRecord`]. The
//! pipeline is parser-agnostic and only talks to [`SourceParser`].

mod generic;
mod taz;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use newscrawl_shared::{ArticleRecord, FetchError, NewsCrawlError, ParseError};

use crate::fingerprint::canonicalize_url;
use crate::session::HttpSession;

pub use generic::GenericParser;
pub use taz::TazParser;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Site-specific discovery and extraction.
#[async_trait]
pub trait SourceParser: Send + Sync {
    /// Registry key, referenced by `parser = "..."` in the config.
    fn name(&self) -> &str;

    /// Candidate article URLs reachable from `base_url`.
    ///
    /// Links may contain duplicates and off-site URLs; the pipeline
    /// canonicalizes and scopes them. Only a failure to fetch the listing page
    /// is an error.
    async fn discover(&self, base_url: &Url, session: &HttpSession)
    -> Result<Listing, FetchError>;

    /// Build a record from a fetched article page.
    ///
    /// The record comes back without `content_hash` or `pos_tags`. Documents
    /// with neither a headline nor any body text are rejected.
    fn extract(&self, url: &Url, html: &str) -> Result<ArticleRecord, ParseError>;
}

/// Outcome of a discovery pass.
#[derive(Debug, Clone)]
pub struct Listing {
    /// Where the listing page was served from, after redirects.
    pub url: Url,
    /// Candidate article URLs found on it.
    pub links: Vec<Url>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Parsers by name.
pub struct ParserRegistry {
    parsers: BTreeMap<String, Arc<dyn SourceParser>>,
}

impl ParserRegistry {
    /// Registry with the built-in parsers.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(TazParser));
        registry.register(Arc::new(GenericParser));
        registry
    }

    pub fn empty() -> Self {
        Self {
            parsers: BTreeMap::new(),
        }
    }

    /// Add a parser, replacing any registered under the same name.
    pub fn register(&mut self, parser: Arc<dyn SourceParser>) {
        self.parsers.insert(parser.name().to_string(), parser);
    }

    /// Look up a parser; unknown names are a configuration error.
    pub fn get(&self, name: &str) -> newscrawl_shared::Result<Arc<dyn SourceParser>> {
        self.parsers.get(name).cloned().ok_or_else(|| {
            NewsCrawlError::config(format!(
                "unknown parser '{name}' (available: {})",
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.parsers.keys().map(String::as_str).collect()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// HTML helpers shared by the built-in parsers
// ---------------------------------------------------------------------------

/// Parse a selector literal.
///
/// # Panics
/// On a malformed selector, which is a bug in the calling parser.
pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e}"))
}

/// Collapse whitespace runs to single spaces and trim.
pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized text content of an element.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

/// Text of the first element matching `css` that has any.
pub(crate) fn first_text(doc: &Html, css: &str) -> Option<String> {
    doc.select(&selector(css))
        .map(element_text)
        .find(|t| !t.is_empty())
}

/// `content` of the first `<meta name=...>` or `<meta property=...>` matching
/// one of `keys`, in key order.
pub(crate) fn meta_content(doc: &Html, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let css = format!(r#"meta[name="{key}"], meta[property="{key}"]"#);
        doc.select(&selector(&css))
            .filter_map(|el| el.value().attr("content"))
            .map(collapse_whitespace)
            .find(|c| !c.is_empty())
    })
}

/// Headline: Open Graph title, then the first `<h1>`, then `<title>`.
pub(crate) fn document_title(doc: &Html) -> Option<String> {
    meta_content(doc, &["og:title"])
        .or_else(|| first_text(doc, "h1"))
        .or_else(|| first_text(doc, "title"))
}

/// Publication date from `<time datetime>` or the usual meta tags.
pub(crate) fn published_at(doc: &Html) -> Option<DateTime<Utc>> {
    let from_time = doc
        .select(&selector("time[datetime]"))
        .filter_map(|el| el.value().attr("datetime"))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string);

    from_time
        .or_else(|| meta_content(doc, &["article:published_time", "pubdate", "date"]))
        .and_then(|raw| parse_published(&raw))
}

/// Lenient timestamp parsing: RFC 3339, ISO without offset (taken as UTC),
/// or a bare date (midnight UTC).
pub(crate) fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Comma-separated keyword list from `keywords` / `news_keywords` meta tags.
pub(crate) fn keywords(doc: &Html) -> Vec<String> {
    let Some(raw) = meta_content(doc, &["news_keywords", "keywords"]) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    raw.split(',')
        .map(collapse_whitespace)
        .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
        .collect()
}

/// Paragraph text inside `container`, one paragraph per block.
fn paragraphs(container: ElementRef<'_>) -> Vec<String> {
    container
        .select(&selector("p"))
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Body text from the first candidate container that has paragraphs, falling
/// back to every `<p>` in the document. Paragraphs are joined by blank lines.
pub(crate) fn body_text(doc: &Html, containers: &[&str]) -> String {
    for css in containers {
        for container in doc.select(&selector(css)) {
            let found = paragraphs(container);
            if !found.is_empty() {
                return found.join("\n\n");
            }
        }
    }

    doc.select(&selector("p"))
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Absolute http(s) links matched by `selectors`, in selector order, without
/// fragments and without repeats. Falls back to every `a[href]` when the
/// selectors match nothing.
pub(crate) fn extract_links(doc: &Html, base_url: &Url, selectors: &[&str]) -> Vec<Url> {
    let compiled: Vec<Selector> = selectors.iter().map(|css| selector(css)).collect();
    let mut hrefs: Vec<&str> = compiled
        .iter()
        .flat_map(|sel| doc.select(sel))
        .filter_map(|el| el.value().attr("href"))
        .collect();

    if hrefs.is_empty() {
        hrefs = doc
            .select(&selector("a[href]"))
            .filter_map(|el| el.value().attr("href"))
            .collect();
    }

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for href in hrefs {
        let href = href.trim();
        // Skip anchors, javascript:, mailto:
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        let Ok(mut resolved) = base_url.join(href) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        resolved.set_fragment(None);

        if seen.insert(canonicalize_url(&resolved)) {
            links.push(resolved);
        }
    }

    links
}

/// Links on a listing page, minus the listing page itself.
pub(crate) fn listing_links(doc: &Html, listing_url: &Url, selectors: &[&str]) -> Vec<Url> {
    let own = canonicalize_url(listing_url);
    extract_links(doc, listing_url, selectors)
        .into_iter()
        .filter(|u| canonicalize_url(u) != own)
        .collect()
}

/// Shared acceptance rule: a record needs a headline or some body text.
pub(crate) fn finish(record: ArticleRecord) -> Result<ArticleRecord, ParseError> {
    if record.title.is_none() && !record.has_text() {
        return Err(ParseError::new(
            record.url,
            "document has neither a headline nor body text",
        ));
    }
    Ok(record)
}

/// Start a record for `url` with the fetched document.
pub(crate) fn new_record(url: &Url, html: &str) -> Result<ArticleRecord, ParseError> {
    if html.trim().is_empty() {
        return Err(ParseError::new(url.as_str(), "empty document"));
    }
    Ok(ArticleRecord::new(canonicalize_url(url), html))
}
