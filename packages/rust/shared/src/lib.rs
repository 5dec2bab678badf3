//! Shared types, error model, and configuration for newscrawl.
//!
//! This crate is the foundation depended on by all other newscrawl crates.
//! It provides:
//! - [`NewsCrawlError`]: the unified error type, plus the per-item kinds
//!   [`FetchError`], [`ParseError`] and [`StoreError`]
//! - Domain types ([`ArticleRecord`], [`PosTag`], [`RunSummary`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DATABASE_ENV, DefaultsConfig, LoggingConfig, PipelineConfig, SourceConfig,
    StorageConfig, TaggingConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from,
};
pub use error::{FetchError, NewsCrawlError, ParseError, Result, StoreError};
pub use types::{ArticleRecord, PosTag, RunSummary};
