//! Content fingerprints and URL canonicalization.
//!
//! A fingerprint is the lowercase hex SHA-256 of the article's normalized body
//! text, or of its canonical URL when no body text could be extracted.

use sha2::{Digest, Sha256};
use url::Url;

/// Fingerprint an article from its URL and extracted body text.
///
/// Whitespace in `text` is collapsed before hashing, so reflowed markup with
/// the same words produces the same fingerprint. Empty text falls back to
/// [`url_fingerprint`].
pub fn fingerprint(url: &str, text: &str) -> String {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        url_fingerprint(url)
    } else {
        sha256_hex(&normalized)
    }
}

/// Fingerprint a URL alone (canonicalized first when it parses).
pub fn url_fingerprint(url: &str) -> String {
    let canonical = match Url::parse(url.trim()) {
        Ok(parsed) => canonicalize_url(&parsed),
        Err(_) => url.trim().to_string(),
    };
    sha256_hex(&canonical)
}

/// Canonical string form of a URL: fragment stripped, trailing slash removed
/// except on the root path. Scheme and host are already lowercased by `url`.
pub fn canonicalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    if s.ends_with('/') && normalized.path() != "/" && normalized.query().is_none() {
        s.pop();
    }
    s
}

/// Collapse all whitespace runs to single spaces and trim.
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compute SHA-256 hash of content as lowercase hex.
fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
