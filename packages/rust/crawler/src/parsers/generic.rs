//! Generic (fallback) news parser.
//!
//! Works on arbitrary article pages using Open Graph / article meta tags and
//! common content containers. Discovery takes every link on the listing page.

use async_trait::async_trait;
use scraper::Html;
use url::Url;

use newscrawl_shared::{ArticleRecord, FetchError, ParseError};

use super::{
    Listing, SourceParser, body_text, document_title, finish, first_text, keywords,
    listing_links, meta_content, new_record, published_at,
};
use crate::session::HttpSession;

const BODY_CONTAINERS: &[&str] = &[
    "article",
    "main",
    r#"[role="main"]"#,
    ".article-body",
    ".content",
];

/// Metadata-driven parser for sites without a dedicated plugin.
pub struct GenericParser;

#[async_trait]
impl SourceParser for GenericParser {
    fn name(&self) -> &str {
        "generic"
    }

    async fn discover(
        &self,
        base_url: &Url,
        session: &HttpSession,
    ) -> Result<Listing, FetchError> {
        let listing = session.get(base_url).await?;
        let links = page_links(&listing.html, &listing.final_url);
        Ok(Listing {
            url: listing.final_url,
            links,
        })
    }

    fn extract(&self, url: &Url, html: &str) -> Result<ArticleRecord, ParseError> {
        let mut record = new_record(url, html)?;
        let doc = Html::parse_document(html);

        record.title = document_title(&doc);
        record.teaser = meta_content(&doc, &["og:description", "description"]);
        record.author = meta_content(&doc, &["author", "article:author"])
            .or_else(|| first_text(&doc, r#"[rel="author"]"#));
        record.category = meta_content(&doc, &["article:section"]);
        record.published_at = published_at(&doc);
        record.keywords = keywords(&doc);
        record.text = body_text(&doc, BODY_CONTAINERS);

        finish(record)
    }
}

/// Every link on the page except the page itself.
fn page_links(html: &str, base_url: &Url) -> Vec<Url> {
    listing_links(&Html::parse_document(html), base_url, &["a[href]"])
}
