//! Bounded-concurrency fetcher.
//!
//! [`Fetcher::fetch_all`] schedules every URL on a worker pool capped at
//! `max_workers` in-flight requests and streams one [`FetchOutcome`] per URL
//! back to the caller in completion order. A failed fetch is an outcome like
//! any other; it never stops the batch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use newscrawl_shared::{FetchError, PipelineConfig};

use crate::session::{FetchedDocument, HttpSession};

/// Terminal result of fetching one URL.
#[derive(Debug)]
pub struct FetchOutcome {
    pub url: Url,
    pub result: Result<FetchedDocument, FetchError>,
}

/// Worker pool over a shared [`HttpSession`].
#[derive(Debug, Clone)]
pub struct Fetcher {
    session: HttpSession,
    max_workers: usize,
    rate_limit: Duration,
}

impl Fetcher {
    pub fn new(session: HttpSession, max_workers: usize) -> Self {
        Self {
            session,
            max_workers: max_workers.max(1),
            rate_limit: Duration::ZERO,
        }
    }

    pub fn from_config(session: HttpSession, config: &PipelineConfig) -> Self {
        Self::new(session, config.max_workers).with_rate_limit(config.rate_limit)
    }

    /// Delay each worker waits before issuing its request.
    pub fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Start fetching `urls` and return the stream of outcomes.
    ///
    /// Once `cancel` fires no new request is started; requests already in
    /// flight still deliver their outcome. Dropping the returned stream aborts
    /// everything that is still running.
    pub fn fetch_all(&self, urls: Vec<Url>, cancel: CancellationToken) -> FetchStream {
        let total = urls.len();
        let (tx, rx) = mpsc::channel(self.max_workers);
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let session = self.session.clone();
        let rate_limit = self.rate_limit;

        let dispatcher = tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            let mut dispatched = 0usize;

            for url in urls {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let session = session.clone();
                let tx = tx.clone();
                dispatched += 1;

                tasks.spawn(async move {
                    let _permit = permit;

                    if !rate_limit.is_zero() {
                        tokio::time::sleep(rate_limit).await;
                    }

                    let result = session.get(&url).await;
                    if let Err(e) = &result {
                        debug!(%url, error = %e, "fetch failed");
                    }
                    // The receiver is gone only when the caller abandoned the batch.
                    let _ = tx.send(FetchOutcome { url, result }).await;
                });
            }

            if dispatched < total {
                debug!(dispatched, total, "dispatch stopped by cancellation");
            }
            drop(tx);

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!(error = %e, "fetch worker panicked");
                    }
                }
            }
        });

        FetchStream {
            rx,
            dispatcher,
            total,
        }
    }
}

/// Outcomes of a [`Fetcher::fetch_all`] batch, in completion order.
#[derive(Debug)]
pub struct FetchStream {
    rx: mpsc::Receiver<FetchOutcome>,
    dispatcher: JoinHandle<()>,
    total: usize,
}

impl FetchStream {
    /// Number of URLs submitted.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Next completed fetch, or `None` once every dispatched URL has reported.
    pub async fn next(&mut self) -> Option<FetchOutcome> {
        self.rx.recv().await
    }

    /// Drain the stream to completion.
    pub async fn collect(mut self) -> Vec<FetchOutcome> {
        let mut outcomes = Vec::with_capacity(self.total);
        while let Some(outcome) = self.next().await {
            outcomes.push(outcome);
        }
        outcomes
    }
}

impl Drop for FetchStream {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}
