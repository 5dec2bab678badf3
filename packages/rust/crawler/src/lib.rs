//! Fetching, parsing, and fingerprinting of news articles.
//!
//! This crate provides:
//! - [`parsers`]: Site parser plugins ([`TazParser`], [`GenericParser`]) behind [`SourceParser`]
//! - [`ParserRegistry`]: Resolves a source's configured parser by name
//! - [`Fetcher`]: Bounded-concurrency article fetcher over an [`HttpSession`]
//! - [`fingerprint`]: Content fingerprints and URL canonicalization
//! - [`UrlScope`]: Include/exclude filtering of discovered links

pub mod fetcher;
pub mod fingerprint;
pub mod parsers;
pub mod scope;
pub mod session;

pub use fetcher::{FetchOutcome, FetchStream, Fetcher};
pub use fingerprint::{canonicalize_url, fingerprint, url_fingerprint};
pub use parsers::{GenericParser, Listing, ParserRegistry, SourceParser, TazParser};
pub use scope::UrlScope;
pub use session::{FetchedDocument, HttpSession, USER_AGENT};
