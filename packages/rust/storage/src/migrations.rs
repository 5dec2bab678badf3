//! SQL migration definitions for the newscrawl database.
//!
//! Migrations are applied in order on database open. Uniqueness indexes on
//! `articles` are not part of the schema; [`crate::Storage::ensure_indexes`]
//! creates them before a run.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: articles, crawl_runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Persisted articles, one logical collection per source
CREATE TABLE IF NOT EXISTS articles (
    id            TEXT PRIMARY KEY,
    collection    TEXT NOT NULL,
    url           TEXT NOT NULL,
    content_hash  TEXT NOT NULL,
    title         TEXT,
    teaser        TEXT,
    author        TEXT,
    category      TEXT,
    published_at  TEXT,
    parsed_at     TEXT NOT NULL,
    raw_html      TEXT NOT NULL,
    text          TEXT NOT NULL,
    keywords_json TEXT NOT NULL DEFAULT '[]',
    pos_tags_json TEXT NOT NULL DEFAULT '[]',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_articles_collection ON articles(collection);

-- Run history
CREATE TABLE IF NOT EXISTS crawl_runs (
    id           TEXT PRIMARY KEY,
    source       TEXT NOT NULL,
    collection   TEXT NOT NULL,
    started_at   TEXT NOT NULL,
    finished_at  TEXT NOT NULL,
    summary_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_runs_collection ON crawl_runs(collection);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
