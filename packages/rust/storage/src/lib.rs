//! libSQL storage layer for crawled articles and run history.
//!
//! The [`Storage`] struct wraps a local libSQL database. Pipelines see it
//! through the [`ArticleStore`] trait: ensure the uniqueness indexes, load
//! the known fingerprints of a collection, upsert records.
//!
//! **Access rules:**
//! - `newscrawl run`: read-write (sole writer) via [`Storage::open`]
//! - `newscrawl stats`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use serde::Serialize;
use uuid::Uuid;

use newscrawl_shared::{ArticleRecord, NewsCrawlError, Result, RunSummary, StoreError};

// ---------------------------------------------------------------------------
// ArticleStore
// ---------------------------------------------------------------------------

/// What an upsert did to the stored record for a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No record existed for the URL.
    Inserted,
    /// The URL's record was replaced with new content.
    Replaced,
    /// The stored record already carries this fingerprint; nothing was written.
    Unchanged,
}

/// Persistence gateway used by the pipeline.
///
/// Uniqueness holds per collection on both `url` and `content_hash`.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Create the per-collection uniqueness indexes. Idempotent.
    async fn ensure_indexes(&self, collection: &str) -> std::result::Result<(), StoreError>;

    /// Every content fingerprint currently stored in `collection`.
    async fn known_hashes(&self, collection: &str)
    -> std::result::Result<HashSet<String>, StoreError>;

    /// Insert or replace the record for `record.url`.
    ///
    /// `record.content_hash` must be set. A write that would give a second URL
    /// the same fingerprint fails with [`StoreError::ConstraintViolation`].
    async fn upsert(
        &self,
        collection: &str,
        record: &ArticleRecord,
    ) -> std::result::Result<UpsertOutcome, StoreError>;
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// One row of run history.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub started_at: String,
    pub finished_at: String,
    pub summary: RunSummary,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NewsCrawlError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(connection_lost)?;

        let conn = db.connect().map_err(connection_lost)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(NewsCrawlError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "database does not exist"),
            ));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(connection_lost)?;

        let conn = db.connect().map_err(connection_lost)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        StoreError::ConnectionLost(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> std::result::Result<(), StoreError> {
        if self.readonly {
            return Err(StoreError::ConnectionLost(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Article queries
    // -----------------------------------------------------------------------

    /// Number of articles stored in `collection`.
    pub async fn count_articles(&self, collection: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM articles WHERE collection = ?1",
                params![collection],
            )
            .await
            .map_err(classify)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(classify)?.max(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(classify(e).into()),
        }
    }

    /// Collections with their article counts, by name.
    pub async fn list_collections(&self) -> Result<Vec<(String, u64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT collection, COUNT(*) FROM articles GROUP BY collection ORDER BY collection",
                params![],
            )
            .await
            .map_err(classify)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push((
                row.get::<String>(0).map_err(classify)?,
                row.get::<i64>(1).map_err(classify)?.max(0) as u64,
            ));
        }
        Ok(results)
    }

    /// Fetch the stored record for a URL.
    pub async fn get_article(&self, collection: &str, url: &str) -> Result<Option<ArticleRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, content_hash, title, teaser, author, category, published_at,
                        parsed_at, raw_html, text, keywords_json, pos_tags_json
                 FROM articles WHERE collection = ?1 AND url = ?2",
                params![collection, url],
            )
            .await
            .map_err(classify)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_article(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(classify(e).into()),
        }
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record a finished run. Returns the generated run ID.
    pub async fn record_run(
        &self,
        summary: &RunSummary,
        started_at: DateTime<Utc>,
    ) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let finished_at = Utc::now().to_rfc3339();
        let summary_json = serde_json::to_string(summary)
            .map_err(|e| StoreError::Malformed(format!("run summary: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO crawl_runs (id, source, collection, started_at, finished_at, summary_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.as_str(),
                    summary.source.as_str(),
                    summary.collection.as_str(),
                    started_at.to_rfc3339(),
                    finished_at.as_str(),
                    summary_json.as_str(),
                ],
            )
            .await
            .map_err(classify)?;
        Ok(id)
    }

    /// Most recent runs first, optionally for one collection.
    pub async fn list_runs(&self, collection: Option<&str>, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = match collection {
            Some(collection) => self
                .conn
                .query(
                    "SELECT id, started_at, finished_at, summary_json FROM crawl_runs
                     WHERE collection = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
                    params![collection, i64::from(limit)],
                )
                .await
                .map_err(classify)?,
            None => self
                .conn
                .query(
                    "SELECT id, started_at, finished_at, summary_json FROM crawl_runs
                     ORDER BY started_at DESC, id DESC LIMIT ?1",
                    params![i64::from(limit)],
                )
                .await
                .map_err(classify)?,
        };

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let summary_json: String = row.get(3).map_err(classify)?;
            let summary = serde_json::from_str(&summary_json)
                .map_err(|e| StoreError::Malformed(format!("run summary: {e}")))?;
            results.push(RunRecord {
                id: row.get(0).map_err(classify)?,
                started_at: row.get(1).map_err(classify)?,
                finished_at: row.get(2).map_err(classify)?,
                summary,
            });
        }
        Ok(results)
    }
}

#[async_trait]
impl ArticleStore for Storage {
    async fn ensure_indexes(&self, collection: &str) -> std::result::Result<(), StoreError> {
        self.check_writable()?;
        if collection.trim().is_empty() {
            return Err(StoreError::Malformed("empty collection name".into()));
        }

        self.conn
            .execute_batch(
                "CREATE UNIQUE INDEX IF NOT EXISTS ux_articles_url
                     ON articles(collection, url);
                 CREATE UNIQUE INDEX IF NOT EXISTS ux_articles_content_hash
                     ON articles(collection, content_hash);",
            )
            .await
            .map_err(classify)?;

        tracing::debug!(collection, "uniqueness indexes ensured");
        Ok(())
    }

    async fn known_hashes(
        &self,
        collection: &str,
    ) -> std::result::Result<HashSet<String>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT content_hash FROM articles WHERE collection = ?1",
                params![collection],
            )
            .await
            .map_err(classify)?;

        let mut hashes = HashSet::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    hashes.insert(row.get::<String>(0).map_err(classify)?);
                }
                Ok(None) => break,
                Err(e) => return Err(classify(e)),
            }
        }
        Ok(hashes)
    }

    async fn upsert(
        &self,
        collection: &str,
        record: &ArticleRecord,
    ) -> std::result::Result<UpsertOutcome, StoreError> {
        self.check_writable()?;

        let content_hash = match record.content_hash.as_deref() {
            Some(h) if !h.is_empty() => h,
            _ => {
                return Err(StoreError::Malformed(format!(
                    "{}: missing content_hash",
                    record.url
                )));
            }
        };
        if record.url.is_empty() {
            return Err(StoreError::Malformed("missing url".into()));
        }
        if collection.is_empty() {
            return Err(StoreError::Malformed("empty collection name".into()));
        }

        let keywords_json = serde_json::to_string(&record.keywords)
            .map_err(|e| StoreError::Malformed(format!("keywords: {e}")))?;
        let pos_tags_json = serde_json::to_string(&record.pos_tags)
            .map_err(|e| StoreError::Malformed(format!("pos_tags: {e}")))?;
        let now = Utc::now().to_rfc3339();
        let published_at = record.published_at.map(|d| d.to_rfc3339());

        let mut rows = self
            .conn
            .query(
                "SELECT content_hash FROM articles WHERE collection = ?1 AND url = ?2",
                params![collection, record.url.as_str()],
            )
            .await
            .map_err(classify)?;

        let existing: Option<String> = match rows.next().await {
            Ok(Some(row)) => Some(row.get::<String>(0).map_err(classify)?),
            Ok(None) => None,
            Err(e) => return Err(classify(e)),
        };

        match existing {
            Some(stored) if stored == content_hash => Ok(UpsertOutcome::Unchanged),
            Some(_) => {
                self.conn
                    .execute(
                        "UPDATE articles SET
                           content_hash = ?3, title = ?4, teaser = ?5, author = ?6,
                           category = ?7, published_at = ?8, parsed_at = ?9, raw_html = ?10,
                           text = ?11, keywords_json = ?12, pos_tags_json = ?13, updated_at = ?14
                         WHERE collection = ?1 AND url = ?2",
                        params![
                            collection,
                            record.url.as_str(),
                            content_hash,
                            record.title.as_deref(),
                            record.teaser.as_deref(),
                            record.author.as_deref(),
                            record.category.as_deref(),
                            published_at.as_deref(),
                            record.parsed_at.to_rfc3339(),
                            record.raw_html.as_str(),
                            record.text.as_str(),
                            keywords_json.as_str(),
                            pos_tags_json.as_str(),
                            now.as_str(),
                        ],
                    )
                    .await
                    .map_err(classify)?;
                Ok(UpsertOutcome::Replaced)
            }
            None => {
                let id = Uuid::now_v7().to_string();
                self.conn
                    .execute(
                        "INSERT INTO articles (id, collection, url, content_hash, title, teaser,
                           author, category, published_at, parsed_at, raw_html, text,
                           keywords_json, pos_tags_json, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
                        params![
                            id.as_str(),
                            collection,
                            record.url.as_str(),
                            content_hash,
                            record.title.as_deref(),
                            record.teaser.as_deref(),
                            record.author.as_deref(),
                            record.category.as_deref(),
                            published_at.as_deref(),
                            record.parsed_at.to_rfc3339(),
                            record.raw_html.as_str(),
                            record.text.as_str(),
                            keywords_json.as_str(),
                            pos_tags_json.as_str(),
                            now.as_str(),
                        ],
                    )
                    .await
                    .map_err(classify)?;
                Ok(UpsertOutcome::Inserted)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a libSQL error onto the store error kinds.
///
/// Unique-index rejections become [`StoreError::ConstraintViolation`]; every
/// other database failure is treated as a lost connection.
fn classify(e: libsql::Error) -> StoreError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") {
        let field = if message.contains("content_hash") {
            "content_hash"
        } else {
            "url"
        };
        return StoreError::ConstraintViolation {
            field: field.into(),
        };
    }
    StoreError::ConnectionLost(message)
}

fn connection_lost(e: libsql::Error) -> NewsCrawlError {
    NewsCrawlError::Store(StoreError::ConnectionLost(e.to_string()))
}

fn row_to_article(row: &libsql::Row) -> std::result::Result<ArticleRecord, StoreError> {
    let parse_ts = |raw: &str| {
        DateTime::parse_from_rfc3339(raw)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| StoreError::Malformed(format!("timestamp {raw:?}: {e}")))
    };

    let published_at = match row.get::<Option<String>>(6).map_err(classify)? {
        Some(raw) => Some(parse_ts(&raw)?),
        None => None,
    };
    let parsed_at = parse_ts(&row.get::<String>(7).map_err(classify)?)?;
    let keywords_json: String = row.get(10).map_err(classify)?;
    let pos_tags_json: String = row.get(11).map_err(classify)?;

    Ok(ArticleRecord {
        url: row.get(0).map_err(classify)?,
        content_hash: Some(row.get(1).map_err(classify)?),
        title: row.get(2).map_err(classify)?,
        teaser: row.get(3).map_err(classify)?,
        author: row.get(4).map_err(classify)?,
        category: row.get(5).map_err(classify)?,
        published_at,
        parsed_at,
        raw_html: row.get(8).map_err(classify)?,
        text: row.get(9).map_err(classify)?,
        keywords: serde_json::from_str(&keywords_json)
            .map_err(|e| StoreError::Malformed(format!("keywords: {e}")))?,
        pos_tags: serde_json::from_str(&pos_tags_json)
            .map_err(|e| StoreError::Malformed(format!("pos_tags: {e}")))?,
    })
}
