//! Crawl orchestration for newscrawl.
//!
//! Ties the crawler (discovery, fetching, parsing) to an [`ArticleStore`]
//! through a per-source [`Pipeline`] run.
//!
//! [`ArticleStore`]: newscrawl_storage::ArticleStore

pub mod dedup;
pub mod pipeline;
pub mod tagging;

pub use dedup::DedupIndex;
pub use pipeline::{Pipeline, ProgressReporter, RunState, SilentProgress};
pub use tagging::{PosTagger, WhitespaceTagger, tag_record};
