//! Parser for taz.de listing and article pages.

use async_trait::async_trait;
use scraper::{ElementRef, Html};
use tracing::debug;
use url::Url;

use newscrawl_shared::{ArticleRecord, FetchError, ParseError};

use super::{
    Listing, SourceParser, body_text, collapse_whitespace, document_title, element_text, finish,
    first_text, keywords, listing_links, meta_content, new_record, published_at, selector,
};
use crate::session::HttpSession;

/// Anchors on the front page that usually point at articles.
const LISTING_SELECTORS: &[&str] = &[
    "a.teaser-link",
    "a.headline-link",
    "a.article__link",
    "a[href*='/artikel/']",
    "a[href^='/']",
    "a[href^='http']",
];

/// Article body containers, most specific first.
const BODY_CONTAINERS: &[&str] = &[
    "div.article__body",
    "div.article__content",
    "div.lead-body",
    "div.article-content",
    "section.article-body",
    "div.story-body",
    "div#content",
    "article",
    "div.teaser-body",
];

/// taz.de: topline/headline markup, author wrapper, subline teaser.
pub struct TazParser;

#[async_trait]
impl SourceParser for TazParser {
    fn name(&self) -> &str {
        "taz"
    }

    async fn discover(
        &self,
        base_url: &Url,
        session: &HttpSession,
    ) -> Result<Listing, FetchError> {
        let listing = session.get(base_url).await?;
        let links = article_links(&listing.html, &listing.final_url);
        debug!(base_url = %base_url, count = links.len(), "taz listing links");
        Ok(Listing {
            url: listing.final_url,
            links,
        })
    }

    fn extract(&self, url: &Url, html: &str) -> Result<ArticleRecord, ParseError> {
        let mut record = new_record(url, html)?;
        let doc = Html::parse_document(html);

        let (category, headline) = topline(&doc);
        record.title = headline.or_else(|| document_title(&doc));
        record.category = category;
        record.author = author(&doc).or_else(|| meta_content(&doc, &["author"]));
        record.teaser = first_text(&doc, "p.typo-r-subline-detail")
            .or_else(|| meta_content(&doc, &["description"]));
        record.published_at = published_at(&doc);
        record.keywords = keywords(&doc);
        record.text = body_text(&doc, BODY_CONTAINERS);

        finish(record)
    }
}

/// Article links on a listing page.
fn article_links(html: &str, base_url: &Url) -> Vec<Url> {
    listing_links(&Html::parse_document(html), base_url, LISTING_SELECTORS)
}

/// Author name from the byline wrapper.
fn author(doc: &Html) -> Option<String> {
    first_text(
        doc,
        "div.author-name-wrapper a.teaser-link span.typo-name-detail-bold",
    )
}

/// `(category, headline)` from the topline marker.
///
/// The topline span carries the section label; the headline is the
/// `typo-r-head-detail` span in the same `<h2>` or right after the marker.
fn topline(doc: &Html) -> (Option<String>, Option<String>) {
    let Some(marker) = doc
        .select(&selector("span.typo-r-topline-detail, div.typo-r-topline-detail"))
        .next()
    else {
        return (None, None);
    };

    let category = Some(element_text(marker)).filter(|t| !t.is_empty());

    let in_heading = marker
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "h2")
        .and_then(|h2| {
            h2.select(&selector("span.typo-r-head-detail"))
                .map(element_text)
                .find(|t| !t.is_empty())
        });

    let headline = in_heading.or_else(|| {
        marker
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "span" && el.value().classes().any(is_head_class))
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    });

    (category, headline)
}

fn is_head_class(class: &str) -> bool {
    class == "typo-r-head-detail"
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::session::USER_AGENT;

    fn fixture(name: &str) -> String {
        let path = format!("../../../fixtures/html/{name}");
        std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"))
    }

    #[test]
    fn extracts_full_article() {
        let url = Url::parse("https://taz.de/Klimaschutz-in-Berlin/!6000001/").unwrap();
        let record = TazParser.extract(&url, &fixture("taz_article.html")).unwrap();

        assert_eq!(record.url, "https://taz.de/Klimaschutz-in-Berlin/!6000001");
        assert_eq!(record.title.as_deref(), Some("Berlin plant neue Radwege"));
        assert_eq!(record.category.as_deref(), Some("Klimaschutz"));
        assert_eq!(record.author.as_deref(), Some("Anna Beispiel"));
        assert_eq!(
            record.teaser.as_deref(),
            Some("Der Senat will bis 2030 hundert Kilometer geschützte Radwege bauen.")
        );
        assert_eq!(record.published_at.unwrap().hour(), 8);
        assert_eq!(record.keywords, vec!["Klimaschutz", "Verkehr", "Berlin"]);
        assert_eq!(
            record.text,
            "Berlin will den Radverkehr ausbauen. Der Senat hat dazu am Dienstag einen Plan vorgestellt.\n\n\
             Kritik kommt von den Umweltverbänden, denen das Tempo nicht reicht."
        );
        assert!(record.content_hash.is_none());
        assert!(record.raw_html.contains("article__body"));
    }

    #[test]
    fn falls_back_to_meta_tags() {
        let html = r#"<html><head>
            <title>Kurzmeldung</title>
            <meta name="author" content="dpa">
            <meta name="description" content="Nur eine Meldung.">
            <meta name="pubdate" content="2025-01-02">
        </head><body><div id="content"><p>Ein Satz.</p></div></body></html>"#;
        let url = Url::parse("https://taz.de/Meldung/!6000009/").unwrap();
        let record = TazParser.extract(&url, html).unwrap();

        assert_eq!(record.title.as_deref(), Some("Kurzmeldung"));
        assert_eq!(record.author.as_deref(), Some("dpa"));
        assert_eq!(record.teaser.as_deref(), Some("Nur eine Meldung."));
        assert!(record.category.is_none());
        assert!(record.published_at.is_some());
        assert_eq!(record.text, "Ein Satz.");
    }

    #[test]
    fn headline_from_sibling_span() {
        let html = r#"<html><body><div>
            <span class="typo-r-topline-detail">Kultur</span>
            <span class="typo-r-head-detail">Theaterfestival eröffnet</span>
        </div><p>Text.</p></body></html>"#;
        let url = Url::parse("https://taz.de/Kultur/!6000003/").unwrap();
        let record = TazParser.extract(&url, html).unwrap();
        assert_eq!(record.category.as_deref(), Some("Kultur"));
        assert_eq!(record.title.as_deref(), Some("Theaterfestival eröffnet"));
    }

    #[test]
    fn rejects_page_without_article_content() {
        let url = Url::parse("https://taz.de/leer/").unwrap();
        let err = TazParser
            .extract(&url, "<html><body><div></div></body></html>")
            .unwrap_err();
        assert_eq!(err.url, "https://taz.de/leer");
    }

    #[test]
    fn listing_links_are_deduplicated_and_absolute() {
        let base = Url::parse("https://taz.de/").unwrap();
        let links = article_links(&fixture("taz_listing.html"), &base);
        let links: Vec<_> = links.iter().map(Url::as_str).collect();

        assert_eq!(links[0], "https://taz.de/Klimaschutz-in-Berlin/!6000001/");
        assert_eq!(links[1], "https://taz.de/Wohnungsmarkt/!6000002/");
        assert_eq!(links[2], "https://taz.de/Kultur/!6000003/");
        assert_eq!(
            links
                .iter()
                .filter(|l| l.contains("!6000001"))
                .count(),
            1
        );
        assert!(!links.contains(&"https://taz.de/"));
        assert!(links.iter().all(|l| !l.contains('#')));
        assert!(links.iter().all(|l| !l.starts_with("mailto:")));
    }

    #[tokio::test]
    async fn discover_fetches_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("taz_listing.html")))
            .mount(&server)
            .await;

        let session = HttpSession::new(USER_AGENT, Duration::from_secs(2)).unwrap();
        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        let listing = TazParser.discover(&base, &session).await.unwrap();
        let links = listing.links;

        assert_eq!(listing.url, base);
        assert!(
            links
                .iter()
                .any(|u| u.path() == "/Klimaschutz-in-Berlin/!6000001/")
        );
        assert!(links.iter().all(|u| u.fragment().is_none()));
    }

    #[tokio::test]
    async fn discover_reports_listing_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let session = HttpSession::new(USER_AGENT, Duration::from_secs(2)).unwrap();
        let base = Url::parse(&server.uri()).unwrap();
        let err = TazParser.discover(&base, &session).await.unwrap_err();
        assert_eq!(err, FetchError::HttpStatus(503));
    }
}
