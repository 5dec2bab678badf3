//! Core domain types: the normalized article record and the run summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PosTag
// ---------------------------------------------------------------------------

/// One part-of-speech annotation: token id, surface token, lemma, coarse tag,
/// fine-grained tag. Lemma and tags are empty when the tagger cannot supply them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosTag {
    pub id: u32,
    pub token: String,
    pub lemma: String,
    pub coarse: String,
    pub fine: String,
}

impl PosTag {
    /// A bare token with no linguistic annotation.
    pub fn bare(id: u32, token: impl Into<String>) -> Self {
        Self {
            id,
            token: token.into(),
            lemma: String::new(),
            coarse: String::new(),
            fine: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ArticleRecord
// ---------------------------------------------------------------------------

/// The normalized unit of work and storage.
///
/// Created by a parser plugin from fetched HTML. The pipeline fills in
/// `content_hash` (and optionally `pos_tags`) in a single pass; the record is
/// not touched again after it has been persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Canonical article URL.
    pub url: String,
    /// Content fingerprint; `None` until the hashing stage has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teaser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// When the document was parsed.
    pub parsed_at: DateTime<Utc>,
    /// The fetched document as-is.
    pub raw_html: String,
    /// Cleaned body text; empty when extraction found no body.
    pub text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub pos_tags: Vec<PosTag>,
}

impl ArticleRecord {
    /// Start a record for `url` with the fetched HTML; `parsed_at` is now.
    pub fn new(url: impl Into<String>, raw_html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_hash: None,
            title: None,
            teaser: None,
            author: None,
            category: None,
            published_at: None,
            parsed_at: Utc::now(),
            raw_html: raw_html.into(),
            text: String::new(),
            keywords: Vec::new(),
            pos_tags: Vec::new(),
        }
    }

    /// Whether body text extraction produced anything.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// Observable outcome of one source run. All counts are per-URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Source name.
    pub source: String,
    /// Target collection.
    pub collection: String,
    /// Distinct in-scope URLs returned by discovery.
    pub discovered: usize,
    /// URLs dropped by the pre-fetch fingerprint filter (also in `skipped_duplicate`).
    pub filtered: usize,
    /// Documents fetched successfully.
    pub fetched: usize,
    /// Documents the parser turned into records.
    pub parsed: usize,
    /// Records inserted or replaced.
    pub persisted: usize,
    /// Upserts that matched an identical stored record (also in `skipped_duplicate`).
    pub unchanged: usize,
    /// URLs skipped because their content is already stored.
    pub skipped_duplicate: usize,
    /// Fetches that ended in a transport error.
    pub failed_fetch: usize,
    /// Documents the parser rejected.
    pub failed_parse: usize,
    /// `failed_fetch + failed_parse`.
    pub failed: usize,
    /// Scheduled URLs that never reached a terminal state (cancel or abort).
    pub incomplete: usize,
    /// The run was cancelled by signal or deadline.
    pub cancelled: bool,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

impl RunSummary {
    /// Start an empty summary for a source/collection pair.
    pub fn new(source: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            collection: collection.into(),
            ..Self::default()
        }
    }

    /// URLs accounted for by a terminal outcome.
    pub fn settled(&self) -> usize {
        self.persisted + self.skipped_duplicate + self.failed
    }
}
