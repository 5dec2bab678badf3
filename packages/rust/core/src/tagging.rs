//! Optional part-of-speech annotation of article text.
//!
//! Tagging never fails a record: skipped or unavailable tagging leaves
//! `pos_tags` empty.

use tracing::{debug, info};

use newscrawl_shared::{ArticleRecord, PosTag, TaggingConfig};

/// URL suffixes of binary documents that are never tagged.
pub const SKIP_EXTENSIONS: &[&str] = &[".pdf", ".jpg", ".jpeg", ".png", ".gif", ".mp4", ".zip", ".gz"];

/// Leading bytes of a PDF served in place of HTML.
pub const PDF_MAGIC: &str = "%PDF";

/// A part-of-speech tagger.
pub trait PosTagger: Send + Sync {
    fn name(&self) -> &str;

    /// Tag `text`, producing at most `max_entries` tags with ids from 0.
    fn tag(&self, text: &str, max_entries: usize) -> Vec<PosTag>;
}

/// Whitespace tokenizer: surface tokens only, no lemma or tags.
pub struct WhitespaceTagger;

impl PosTagger for WhitespaceTagger {
    fn name(&self) -> &str {
        "whitespace"
    }

    fn tag(&self, text: &str, max_entries: usize) -> Vec<PosTag> {
        text.split_whitespace()
            .take(max_entries)
            .zip(0u32..)
            .map(|(token, id)| PosTag::bare(id, token))
            .collect()
    }
}

/// Cheap token estimate by whitespace split.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Tags for `record`, or an empty list when the record should not be tagged.
pub fn tag_record(
    tagger: &dyn PosTagger,
    record: &ArticleRecord,
    limits: &TaggingConfig,
) -> Vec<PosTag> {
    let url = record.url.to_lowercase();
    if SKIP_EXTENSIONS.iter().any(|ext| url.ends_with(ext))
        || record.raw_html.trim_start().starts_with(PDF_MAGIC)
    {
        debug!(url = %record.url, "binary content, not tagging");
        return Vec::new();
    }

    if !record.has_text() {
        return Vec::new();
    }

    let estimated = estimate_tokens(&record.text);
    if estimated > limits.max_tokens {
        info!(
            url = %record.url,
            estimated,
            limit = limits.max_tokens,
            "text too long, not tagging"
        );
        return Vec::new();
    }

    let mut tags = tagger.tag(&record.text, limits.max_entries);
    tags.truncate(limits.max_entries);
    debug!(url = %record.url, tagger = tagger.name(), tags = tags.len(), "tagged");
    tags
}
