//! Per-source crawl pipeline: discover → filter → fetch → parse → hash → persist.
//!
//! Fetches run on the bounded pool of the [`Fetcher`]; everything after a
//! completed fetch happens in a single aggregator loop that owns the
//! [`RunSummary`] and is the only writer to the store.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

use newscrawl_crawler::{
    FetchOutcome, Fetcher, HttpSession, SourceParser, UrlScope, canonicalize_url, fingerprint,
    url_fingerprint,
};
use newscrawl_shared::{NewsCrawlError, PipelineConfig, Result, RunSummary, SourceConfig, StoreError};
use newscrawl_storage::{ArticleStore, UpsertOutcome};

use crate::dedup::DedupIndex;
use crate::tagging::{self, PosTagger, WhitespaceTagger};

// ---------------------------------------------------------------------------
// Run state & progress
// ---------------------------------------------------------------------------

/// Where a source run (or, past `Fetching`, an individual item) stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Discovering,
    Filtering,
    Fetching,
    Parsing,
    Hashing,
    Persisting,
    Done,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Filtering => "filtering",
            Self::Fetching => "fetching",
            Self::Parsing => "parsing",
            Self::Hashing => "hashing",
            Self::Persisting => "persisting",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when the run enters a new phase.
    fn phase(&self, state: RunState);
    /// Called when a scheduled URL reaches a terminal outcome.
    fn item_done(&self, url: &str, completed: usize, total: usize);
    /// Called when the run ends, normally or aborted.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _state: RunState) {}
    fn item_done(&self, _url: &str, _completed: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Drives sources end-to-end against one store.
pub struct Pipeline {
    config: PipelineConfig,
    session: HttpSession,
    store: Arc<dyn ArticleStore>,
    tagger: Option<Arc<dyn PosTagger>>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Build a pipeline; tagging uses [`WhitespaceTagger`] when enabled.
    pub fn new(config: PipelineConfig, store: Arc<dyn ArticleStore>) -> Result<Self> {
        let session = HttpSession::from_config(&config)?;
        let tagger: Option<Arc<dyn PosTagger>> = if config.tagging.enabled {
            Some(Arc::new(WhitespaceTagger))
        } else {
            None
        };

        Ok(Self {
            config,
            session,
            store,
            tagger,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the tagger (and enable tagging).
    pub fn with_tagger(mut self, tagger: Arc<dyn PosTagger>) -> Self {
        self.tagger = Some(tagger);
        self
    }

    /// Use an externally owned cancellation token (e.g. wired to Ctrl-C).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run one source to completion.
    ///
    /// Per-item failures are counted, never returned. Errors are limited to
    /// bad configuration, a store that cannot be prepared, and a lost store
    /// connection mid-run ([`NewsCrawlError::Aborted`], carrying the partial
    /// summary).
    #[instrument(skip_all, fields(source = %source.name, collection = %source.collection_name()))]
    pub async fn run_source(
        &self,
        source: &SourceConfig,
        parser: &dyn SourceParser,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let collection = source.collection_name().to_string();
        let mut summary = RunSummary::new(&source.name, &collection);
        progress.phase(RunState::Idle);

        let base_url = source.base_url()?;

        self.store_call(self.store.ensure_indexes(&collection))
            .await?;
        let index = self
            .store_call(DedupIndex::load(self.store.as_ref(), &collection))
            .await?;

        let cancel = self.cancel.child_token();
        let _deadline = DeadlineTimer::arm(self.config.deadline, cancel.clone());

        info!(
            base_url = %base_url,
            parser = parser.name(),
            known = index.len(),
            max_workers = self.config.max_workers,
            "starting source run"
        );

        // --- Discovering ---
        progress.phase(RunState::Discovering);
        let listing = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("cancelled during discovery");
                summary.cancelled = true;
                return Ok(self.finish(summary, started, progress));
            }
            discovered = parser.discover(&base_url, &self.session) => match discovered {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(base_url = %base_url, error = %e, "discovery failed");
                    return Ok(self.finish(summary, started, progress));
                }
            },
        };

        let scope = UrlScope::for_source(&base_url, source).allow_host_of(&listing.url);
        let candidates = listing.links.len();

        let mut seen_urls = HashSet::new();
        let mut targets: Vec<Url> = Vec::new();
        for url in listing.links {
            if !scope.in_scope(&url) {
                trace!(%url, "out of scope");
                continue;
            }
            let canonical = canonicalize_url(&url);
            if !seen_urls.insert(canonical.clone()) {
                continue;
            }
            match Url::parse(&canonical) {
                Ok(parsed) => targets.push(parsed),
                Err(_) => targets.push(url),
            }
        }
        summary.discovered = targets.len();
        if candidates > 0 && targets.is_empty() {
            warn!(
                candidates,
                listing = %listing.url,
                "no discovered link is in scope; check base_url and include/exclude patterns"
            );
        }

        // --- Filtering ---
        progress.phase(RunState::Filtering);
        targets.retain(|url| {
            let known = index.contains(&url_fingerprint(url.as_str()));
            if known {
                debug!(%url, "known url fingerprint, not fetching");
                summary.filtered += 1;
                summary.skipped_duplicate += 1;
            }
            !known
        });

        // --- Fetching, then Parsing / Hashing / Persisting per item ---
        progress.phase(RunState::Fetching);
        let total = targets.len();
        let fetcher = Fetcher::from_config(self.session.clone(), &self.config);
        let mut stream = fetcher.fetch_all(targets, cancel.clone());

        let mut items = ItemAggregator {
            pipeline: self,
            parser,
            collection: &collection,
            index: &index,
            persisted_hashes: HashSet::new(),
            summary,
            settled: 0,
        };
        let mut drain_until: Option<tokio::time::Instant> = None;

        loop {
            let next = match drain_until {
                Some(deadline) => match tokio::time::timeout_at(deadline, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            in_flight = total - items.settled,
                            "grace period elapsed, abandoning in-flight fetches"
                        );
                        break;
                    }
                },
                None => tokio::select! {
                    next = stream.next() => next,
                    _ = cancel.cancelled() => {
                        info!(grace_ms = self.config.grace_period.as_millis() as u64, "run cancelled, draining");
                        items.summary.cancelled = true;
                        drain_until = Some(tokio::time::Instant::now() + self.config.grace_period);
                        continue;
                    }
                },
            };

            let Some(outcome) = next else { break };
            let url = outcome.url.to_string();

            if let Err(source) = items.settle(outcome).await {
                cancel.cancel();
                drop(stream);

                let mut summary = items.summary;
                summary.incomplete = total - items.settled;
                error!(
                    error = %source,
                    persisted = summary.persisted,
                    incomplete = summary.incomplete,
                    "store connection lost, aborting run"
                );
                let summary = self.finish(summary, started, progress);
                return Err(NewsCrawlError::Aborted {
                    summary: Box::new(summary),
                    source,
                });
            }

            progress.item_done(&url, items.settled, total);
        }
        drop(stream);

        let mut summary = items.summary;
        summary.incomplete = total - items.settled;
        summary.cancelled |= cancel.is_cancelled();
        Ok(self.finish(summary, started, progress))
    }

    /// Bound a store call by the store timeout; a timeout counts as a lost connection.
    async fn store_call<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> std::result::Result<T, StoreError> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::ConnectionLost(format!(
                "store call timed out after {}ms",
                self.config.store_timeout.as_millis()
            ))),
        }
    }

    fn finish(
        &self,
        mut summary: RunSummary,
        started: Instant,
        progress: &dyn ProgressReporter,
    ) -> RunSummary {
        summary.duration_ms = started.elapsed().as_millis() as u64;
        progress.phase(RunState::Done);

        info!(
            discovered = summary.discovered,
            filtered = summary.filtered,
            fetched = summary.fetched,
            parsed = summary.parsed,
            persisted = summary.persisted,
            unchanged = summary.unchanged,
            skipped_duplicate = summary.skipped_duplicate,
            failed = summary.failed,
            incomplete = summary.incomplete,
            cancelled = summary.cancelled,
            duration_ms = summary.duration_ms,
            "source run finished"
        );

        progress.done(&summary);
        summary
    }
}

// ---------------------------------------------------------------------------
// Per-item processing
// ---------------------------------------------------------------------------

/// Single consumer of fetch outcomes; owns the summary.
struct ItemAggregator<'a> {
    pipeline: &'a Pipeline,
    parser: &'a dyn SourceParser,
    collection: &'a str,
    index: &'a DedupIndex,
    /// Fingerprints written (or found already stored) earlier in this run.
    persisted_hashes: HashSet<String>,
    summary: RunSummary,
    /// Scheduled URLs that reached a terminal outcome.
    settled: usize,
}

impl ItemAggregator<'_> {
    /// Take one fetched URL to its terminal outcome.
    ///
    /// Only a fatal store error is returned; the item is then left unsettled.
    async fn settle(&mut self, outcome: FetchOutcome) -> std::result::Result<(), StoreError> {
        let url = outcome.url;

        let document = match outcome.result {
            Ok(document) => {
                self.summary.fetched += 1;
                document
            }
            Err(e) => {
                warn!(%url, error = %e, "fetch failed");
                self.summary.failed_fetch += 1;
                self.summary.failed += 1;
                self.settled += 1;
                return Ok(());
            }
        };

        trace!(%url, state = %RunState::Parsing, "item state");
        let mut record = match self.parser.extract(&url, &document.html) {
            Ok(record) => record,
            Err(e) => {
                warn!(%url, error = %e, "parse failed");
                self.summary.failed_parse += 1;
                self.summary.failed += 1;
                self.settled += 1;
                return Ok(());
            }
        };
        self.summary.parsed += 1;

        trace!(%url, state = %RunState::Hashing, "item state");
        let hash = fingerprint(&record.url, &record.text);
        if self.index.contains(&hash) || self.persisted_hashes.contains(&hash) {
            debug!(%url, hash = %hash, "known content, skipping");
            self.summary.skipped_duplicate += 1;
            self.settled += 1;
            return Ok(());
        }
        record.content_hash = Some(hash.clone());

        if let Some(tagger) = &self.pipeline.tagger {
            record.pos_tags =
                tagging::tag_record(tagger.as_ref(), &record, &self.pipeline.config.tagging);
        }

        trace!(%url, state = %RunState::Persisting, "item state");
        let written = self
            .pipeline
            .store_call(self.pipeline.store.upsert(self.collection, &record))
            .await;

        match written {
            Ok(UpsertOutcome::Inserted | UpsertOutcome::Replaced) => {
                debug!(%url, "persisted");
                self.summary.persisted += 1;
                self.persisted_hashes.insert(hash);
            }
            Ok(UpsertOutcome::Unchanged) => {
                debug!(%url, "stored record unchanged");
                self.summary.unchanged += 1;
                self.summary.skipped_duplicate += 1;
                self.persisted_hashes.insert(hash);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(StoreError::ConstraintViolation { field }) => {
                info!(%url, %field, "duplicate rejected by store");
                self.summary.skipped_duplicate += 1;
                self.persisted_hashes.insert(hash);
            }
            Err(e) => {
                warn!(%url, error = %e, "store rejected record");
                self.summary.failed_parse += 1;
                self.summary.failed += 1;
            }
        }

        self.settled += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// Cancels a run's token when its deadline passes; disarmed on drop.
struct DeadlineTimer(Option<JoinHandle<()>>);

impl DeadlineTimer {
    fn arm(deadline: Option<std::time::Duration>, token: CancellationToken) -> Self {
        Self(deadline.map(|limit| {
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        info!(deadline_ms = limit.as_millis() as u64, "run deadline reached");
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        }))
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use newscrawl_crawler::{GenericParser, TazParser};
    use newscrawl_shared::ArticleRecord;
    use newscrawl_storage::Storage;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // -----------------------------------------------------------------------
    // In-memory store with failure injection
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct MemoryStore {
        /// url -> record
        records: Mutex<HashMap<String, ArticleRecord>>,
        preloaded: Vec<String>,
        /// Upserts allowed before the connection "drops".
        fail_after: Option<usize>,
        /// Fixed answer for every upsert, bypassing the map.
        reply: Option<std::result::Result<UpsertOutcome, StoreError>>,
        upserts: AtomicUsize,
    }

    impl MemoryStore {
        fn with_known(hashes: &[String]) -> Self {
            Self {
                preloaded: hashes.to_vec(),
                ..Self::default()
            }
        }

        fn failing_after(n: usize) -> Self {
            Self {
                fail_after: Some(n),
                ..Self::default()
            }
        }

        fn replying(reply: std::result::Result<UpsertOutcome, StoreError>) -> Self {
            Self {
                reply: Some(reply),
                ..Self::default()
            }
        }

        fn stored(&self) -> Vec<ArticleRecord> {
            self.records.lock().unwrap().values().cloned().collect()
        }
    }

    #[async_trait]
    impl ArticleStore for MemoryStore {
        async fn ensure_indexes(&self, _collection: &str) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn known_hashes(
            &self,
            _collection: &str,
        ) -> std::result::Result<HashSet<String>, StoreError> {
            let mut hashes: HashSet<String> = self.preloaded.iter().cloned().collect();
            for record in self.records.lock().unwrap().values() {
                hashes.extend(record.content_hash.clone());
            }
            Ok(hashes)
        }

        async fn upsert(
            &self,
            _collection: &str,
            record: &ArticleRecord,
        ) -> std::result::Result<UpsertOutcome, StoreError> {
            let n = self.upserts.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| n >= limit) {
                return Err(StoreError::ConnectionLost("connection reset".into()));
            }
            if let Some(reply) = &self.reply {
                return reply.clone();
            }

            let mut records = self.records.lock().unwrap();
            let clash = records
                .values()
                .any(|r| r.url != record.url && r.content_hash == record.content_hash);
            if clash {
                return Err(StoreError::ConstraintViolation {
                    field: "content_hash".into(),
                });
            }
            let outcome = match records.get(&record.url) {
                Some(existing) if existing.content_hash == record.content_hash => {
                    UpsertOutcome::Unchanged
                }
                Some(_) => UpsertOutcome::Replaced,
                None => UpsertOutcome::Inserted,
            };
            if outcome != UpsertOutcome::Unchanged {
                records.insert(record.url.clone(), record.clone());
            }
            Ok(outcome)
        }
    }

    // -----------------------------------------------------------------------
    // Mock site
    // -----------------------------------------------------------------------

    fn article_html(body: &str) -> String {
        format!(
            "<html><head><title>Artikel</title></head><body><article><p>{body}</p></article></body></html>"
        )
    }

    async fn mock_site(pages: &[(&str, ResponseTemplate)]) -> MockServer {
        let server = MockServer::start().await;
        let listing: String = pages
            .iter()
            .map(|(route, _)| format!(r#"<a href="{route}">{route}</a>"#))
            .collect();
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("<html><body>{listing}</body></html>")),
            )
            .mount(&server)
            .await;

        for (route, template) in pages {
            Mock::given(method("GET"))
                .and(path(*route))
                .respond_with(template.clone())
                .mount(&server)
                .await;
        }
        server
    }

    fn ok_page(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_string(article_html(body))
    }

    fn source_for(server: &MockServer) -> SourceConfig {
        SourceConfig {
            name: "test".into(),
            parser: "generic".into(),
            base_url: format!("{}/", server.uri()),
            collection: None,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            max_workers: 4,
            fetch_timeout: Duration::from_secs(2),
            store_timeout: Duration::from_secs(2),
            grace_period: Duration::from_millis(100),
            ..PipelineConfig::default()
        }
    }

    async fn run(
        config: PipelineConfig,
        store: Arc<dyn ArticleStore>,
        source: &SourceConfig,
    ) -> Result<RunSummary> {
        Pipeline::new(config, store)
            .unwrap()
            .run_source(source, &GenericParser, &SilentProgress)
            .await
    }

    // -----------------------------------------------------------------------
    // Scenarios
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn known_content_is_skipped() {
        let server = mock_site(&[
            ("/a", ok_page("Artikel A")),
            ("/b", ok_page("Artikel B")),
            ("/c", ok_page("Artikel C")),
        ])
        .await;
        let store = Arc::new(MemoryStore::with_known(&[fingerprint("ignored", "Artikel C")]));

        let summary = run(test_config(), store.clone(), &source_for(&server))
            .await
            .unwrap();

        assert_eq!(summary.discovered, 3);
        assert_eq!(summary.persisted, 2);
        assert_eq!(summary.skipped_duplicate, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.incomplete, 0);

        let mut texts: Vec<_> = store.stored().into_iter().map(|r| r.text).collect();
        texts.sort();
        assert_eq!(texts, vec!["Artikel A", "Artikel B"]);
    }

    #[tokio::test]
    async fn fetch_timeout_is_isolated() {
        let server = mock_site(&[
            ("/a", ok_page("Artikel A")),
            (
                "/b",
                ok_page("Artikel B").set_delay(Duration::from_secs(3)),
            ),
            ("/c", ok_page("Artikel C")),
        ])
        .await;
        let config = PipelineConfig {
            fetch_timeout: Duration::from_millis(300),
            ..test_config()
        };

        let summary = run(config, Arc::new(MemoryStore::default()), &source_for(&server))
            .await
            .unwrap();

        assert_eq!(summary.persisted, 2);
        assert_eq!(summary.failed_fetch, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn connection_loss_aborts_with_partial_summary() {
        let pages: Vec<(String, ResponseTemplate)> = (1..=5)
            .map(|i| (format!("/{i}"), ok_page(&format!("Artikel {i}"))))
            .collect();
        let routes: Vec<(&str, ResponseTemplate)> =
            pages.iter().map(|(r, t)| (r.as_str(), t.clone())).collect();
        let server = mock_site(&routes).await;

        let err = run(
            test_config(),
            Arc::new(MemoryStore::failing_after(2)),
            &source_for(&server),
        )
        .await
        .unwrap_err();

        let summary = err.partial_summary().expect("aborted run carries a summary");
        assert_eq!(summary.discovered, 5);
        assert_eq!(summary.persisted, 2);
        assert_eq!(summary.incomplete, 3);
        assert!(matches!(
            err,
            NewsCrawlError::Aborted {
                source: StoreError::ConnectionLost(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn parse_failure_drops_only_that_item() {
        let server = mock_site(&[
            ("/a", ok_page("Artikel A")),
            (
                "/empty",
                ResponseTemplate::new(200).set_body_string("<html><body></body></html>"),
            ),
        ])
        .await;

        let summary = run(test_config(), Arc::new(MemoryStore::default()), &source_for(&server))
            .await
            .unwrap();

        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.parsed, 1);
        assert_eq!(summary.failed_parse, 1);
        assert_eq!(summary.persisted, 1);
    }

    #[tokio::test]
    async fn same_content_under_two_urls_is_stored_once() {
        let server = mock_site(&[
            ("/a", ok_page("Gleicher Text")),
            ("/a-copy", ok_page("Gleicher Text")),
        ])
        .await;
        let store = Arc::new(MemoryStore::default());

        let summary = run(test_config(), store.clone(), &source_for(&server))
            .await
            .unwrap();

        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.skipped_duplicate, 1);
        assert_eq!(store.stored().len(), 1);
    }

    #[tokio::test]
    async fn rerun_on_unchanged_source_inserts_nothing() {
        let server = mock_site(&[
            ("/a", ok_page("Artikel A")),
            ("/b", ok_page("Artikel B")),
            ("/c", ok_page("Artikel C")),
        ])
        .await;
        let tmp = std::env::temp_dir().join(format!("nc_test_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp).await.unwrap());
        let source = source_for(&server);

        let first = run(test_config(), storage.clone(), &source).await.unwrap();
        assert_eq!(first.persisted, 3);

        let second = run(test_config(), storage.clone(), &source).await.unwrap();
        assert_eq!(second.discovered, 3);
        assert_eq!(second.persisted, 0);
        assert_eq!(second.skipped_duplicate, 3);
        assert_eq!(second.failed, 0);
        assert_eq!(storage.count_articles("test").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn deadline_cancels_and_marks_incomplete() {
        let slow = || ok_page("langsam").set_delay(Duration::from_secs(3));
        let server = mock_site(&[("/a", slow()), ("/b", slow())]).await;
        let config = PipelineConfig {
            fetch_timeout: Duration::from_secs(10),
            deadline: Some(Duration::from_millis(300)),
            grace_period: Duration::from_millis(100),
            ..test_config()
        };

        let store = Arc::new(MemoryStore::default());
        let summary = run(config, store.clone(), &source_for(&server))
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.persisted, 0);
        assert_eq!(summary.incomplete, 2);
        assert!(store.stored().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start_schedules_nothing() {
        let server = mock_site(&[("/a", ok_page("Artikel A"))]).await;
        let token = CancellationToken::new();
        token.cancel();

        let summary = Pipeline::new(test_config(), Arc::new(MemoryStore::default()))
            .unwrap()
            .with_cancellation(token)
            .run_source(&source_for(&server), &GenericParser, &SilentProgress)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.discovered, 0);
        assert_eq!(summary.persisted, 0);
    }

    #[tokio::test]
    async fn discovery_failure_ends_with_empty_summary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let summary = run(test_config(), Arc::new(MemoryStore::default()), &source_for(&server))
            .await
            .unwrap();
        assert_eq!(summary.discovered, 0);
        assert_eq!(summary.settled(), 0);
    }

    #[tokio::test]
    async fn invalid_base_url_is_config_error() {
        let mut source = source_for(&MockServer::start().await);
        source.base_url = "ftp://taz.de/".into();

        let err = Pipeline::new(test_config(), Arc::new(MemoryStore::default()))
            .unwrap()
            .run_source(&source, &TazParser, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, NewsCrawlError::Config { .. }));
    }

    #[tokio::test]
    async fn tagging_fills_pos_tags() {
        let server = mock_site(&[("/a", ok_page("Der Senat plant Radwege"))]).await;
        let mut config = test_config();
        config.tagging.enabled = true;
        let store = Arc::new(MemoryStore::default());

        run(config, store.clone(), &source_for(&server)).await.unwrap();

        let stored = store.stored();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].pos_tags.len(), 4);
        assert_eq!(stored[0].pos_tags[3].token, "Radwege");
    }

    #[tokio::test]
    async fn exclude_patterns_limit_discovery() {
        let server = mock_site(&[
            ("/news/a", ok_page("Artikel A")),
            ("/tag/klima", ok_page("Tagseite")),
        ])
        .await;
        let mut source = source_for(&server);
        source.exclude_patterns = vec!["/tag/**".into()];

        let summary = run(test_config(), Arc::new(MemoryStore::default()), &source)
            .await
            .unwrap();
        assert_eq!(summary.discovered, 1);
        assert_eq!(summary.persisted, 1);
    }

    #[tokio::test]
    async fn store_constraint_violation_counts_as_duplicate() {
        let server = mock_site(&[("/a", ok_page("Artikel A")), ("/b", ok_page("Artikel B"))]).await;
        let store = Arc::new(MemoryStore::replying(Err(StoreError::ConstraintViolation {
            field: "content_hash".into(),
        })));

        let summary = run(test_config(), store, &source_for(&server)).await.unwrap();

        assert_eq!(summary.parsed, 2);
        assert_eq!(summary.persisted, 0);
        assert_eq!(summary.skipped_duplicate, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.incomplete, 0);
    }

    #[tokio::test]
    async fn malformed_record_fails_only_that_item() {
        let server = mock_site(&[("/a", ok_page("Artikel A")), ("/b", ok_page("Artikel B"))]).await;
        let store = Arc::new(MemoryStore::replying(Err(StoreError::Malformed(
            "missing url".into(),
        ))));

        let summary = run(test_config(), store, &source_for(&server)).await.unwrap();

        assert_eq!(summary.persisted, 0);
        assert_eq!(summary.failed_parse, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.skipped_duplicate, 0);
        assert_eq!(summary.incomplete, 0);
    }

    #[tokio::test]
    async fn unchanged_upsert_counts_as_duplicate() {
        let server = mock_site(&[("/a", ok_page("Artikel A")), ("/b", ok_page("Artikel B"))]).await;
        let store = Arc::new(MemoryStore::replying(Ok(UpsertOutcome::Unchanged)));

        let summary = run(test_config(), store, &source_for(&server)).await.unwrap();

        assert_eq!(summary.persisted, 0);
        assert_eq!(summary.unchanged, 2);
        assert_eq!(summary.skipped_duplicate, 2);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn listing_redirected_to_another_host_keeps_its_links() {
        let server = MockServer::start().await;
        let port = server.address().port();
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("location", format!("http://127.0.0.1:{port}/news").as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/news"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body><a href="/a">A</a><a href="/b">B</a></body></html>"#,
            ))
            .mount(&server)
            .await;
        for (route, body) in [("/a", "Artikel A"), ("/b", "Artikel B")] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ok_page(body))
                .mount(&server)
                .await;
        }

        let mut source = source_for(&server);
        source.base_url = format!("http://localhost:{port}/");
        let summary = run(test_config(), Arc::new(MemoryStore::default()), &source)
            .await
            .unwrap();

        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.persisted, 2);
    }

    struct UppercaseTagger;

    impl PosTagger for UppercaseTagger {
        fn name(&self) -> &str {
            "uppercase"
        }

        fn tag(&self, text: &str, max_entries: usize) -> Vec<newscrawl_shared::PosTag> {
            text.split_whitespace()
                .take(max_entries)
                .zip(0u32..)
                .map(|(token, id)| newscrawl_shared::PosTag::bare(id, token.to_uppercase()))
                .collect()
        }
    }

    #[tokio::test]
    async fn custom_tagger_replaces_default() {
        let server = mock_site(&[("/a", ok_page("Der Senat plant"))]).await;
        let store = Arc::new(MemoryStore::default());

        Pipeline::new(test_config(), store.clone())
            .unwrap()
            .with_tagger(Arc::new(UppercaseTagger))
            .run_source(&source_for(&server), &GenericParser, &SilentProgress)
            .await
            .unwrap();

        let stored = store.stored();
        let tokens: Vec<_> = stored[0].pos_tags.iter().map(|t| t.token.as_str()).collect();
        assert_eq!(tokens, vec!["DER", "SENAT", "PLANT"]);
    }

    #[test]
    fn run_state_names() {
        assert_eq!(RunState::Discovering.to_string(), "discovering");
        assert_eq!(RunState::Done.as_str(), "done");
    }
}
