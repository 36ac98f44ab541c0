//! Delivery of score records to the collector.
//!
//! The collector accepts one record per request at `POST {base}/{game}/log`
//! and answers `200` on success. Anything else is a failed delivery; there
//! is no retry queue here, the next re-parse of the log re-offers the record.

use crate::parser::{DedupKey, Game, ScoreRecord};
use crate::stats::SharedDispatchStats;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Collector configuration.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Base URL, e.g. `http://127.0.0.1:5000`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl CollectorConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint receiving records for `game`.
    pub fn log_url(&self, game: Game) -> String {
        format!("{}/{}/log", self.base_url.trim_end_matches('/'), game.slug())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Transport failure (connect, timeout, body)
    #[error("collector network error: {0}")]
    Network(String),
    /// Collector answered with something other than 200
    #[error("collector rejected record ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// Client could not be constructed
    #[error("collector client error: {0}")]
    Client(String),
}

/// Something that can deliver one record.
pub trait RecordSink {
    fn post(&self, game: Game, record: &ScoreRecord) -> Result<(), DispatchError>;
}

impl<K: RecordSink + ?Sized> RecordSink for Box<K> {
    fn post(&self, game: Game, record: &ScoreRecord) -> Result<(), DispatchError> {
        (**self).post(game, record)
    }
}

fn device_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!(
        "notportable-{}-{}",
        hostname,
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    )
}

/// Async HTTP client for the collector.
pub struct CollectorClient {
    config: CollectorConfig,
    client: reqwest::Client,
    device_id: String,
}

impl CollectorClient {
    pub fn new(config: CollectorConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DispatchError::Client(e.to_string()))?;

        Ok(Self {
            config,
            client,
            device_id: device_id(),
        })
    }

    /// Post one record. Only `200 OK` counts as delivered.
    pub async fn post_record(&self, game: Game, record: &ScoreRecord) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(self.config.log_url(game))
            .header("X-Device-Id", self.device_id.as_str())
            .json(record)
            .send()
            .await
            .map_err(|e| DispatchError::Network(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// Blocking collector client for the ingest thread.
pub struct BlockingCollectorClient {
    inner: CollectorClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingCollectorClient {
    pub fn new(config: CollectorConfig) -> Result<Self, DispatchError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DispatchError::Client(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: CollectorClient::new(config)?,
            runtime,
        })
    }

    pub fn device_id(&self) -> &str {
        self.inner.device_id()
    }
}

impl RecordSink for BlockingCollectorClient {
    fn post(&self, game: Game, record: &ScoreRecord) -> Result<(), DispatchError> {
        self.runtime.block_on(self.inner.post_record(game, record))
    }
}

/// Result of a successful `submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Posted and acknowledged
    Sent,
    /// Already delivered earlier in this process; nothing was posted
    Duplicate,
}

/// Tally for a batch of submissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitSummary {
    pub sent: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Deduplicates records and hands new ones to a [`RecordSink`].
///
/// Keys are remembered only once the collector has acknowledged a record,
/// so a failed delivery is attempted again on the next pass.
pub struct Dispatcher<K: RecordSink> {
    sink: K,
    seen: HashMap<Game, HashSet<DedupKey>>,
    stats: SharedDispatchStats,
}

impl<K: RecordSink> Dispatcher<K> {
    pub fn new(sink: K, stats: SharedDispatchStats) -> Self {
        Self {
            sink,
            seen: HashMap::new(),
            stats,
        }
    }

    /// Submit one record for `game`.
    pub fn submit(&mut self, game: Game, record: &ScoreRecord) -> Result<Delivery, DispatchError> {
        let key = record.dedup_key();
        if self.seen.get(&game).is_some_and(|keys| keys.contains(&key)) {
            self.stats.record_duplicate();
            return Ok(Delivery::Duplicate);
        }

        match self.sink.post(game, record) {
            Ok(()) => {
                debug!(%game, user = record.username(), anomaly = record.is_anomaly(), "record delivered");
                self.seen.entry(game).or_default().insert(key);
                self.stats.record_sent(record.is_anomaly());
                Ok(Delivery::Sent)
            }
            Err(e) => {
                warn!(%game, user = record.username(), "record dropped: {e}");
                self.stats.record_failed();
                Err(e)
            }
        }
    }

    /// Submit every record, continuing past failures.
    pub fn submit_all(&mut self, game: Game, records: &[ScoreRecord]) -> SubmitSummary {
        let mut summary = SubmitSummary::default();
        for record in records {
            match self.submit(game, record) {
                Ok(Delivery::Sent) => summary.sent += 1,
                Ok(Delivery::Duplicate) => summary.duplicates += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    /// Number of keys delivered for `game`.
    pub fn delivered(&self, game: Game) -> usize {
        self.seen.get(&game).map_or(0, HashSet::len)
    }

    pub fn stats(&self) -> &SharedDispatchStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::stats::create_shared_stats;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Sink that fails the first `failures` posts, then accepts.
    struct CountingSink {
        posts: Arc<AtomicUsize>,
        failures: usize,
    }

    impl CountingSink {
        fn new(failures: usize) -> (Self, Arc<AtomicUsize>) {
            let posts = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    posts: posts.clone(),
                    failures,
                },
                posts,
            )
        }
    }

    impl RecordSink for CountingSink {
        fn post(&self, _game: Game, _record: &ScoreRecord) -> Result<(), DispatchError> {
            let n = self.posts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(DispatchError::Rejected {
                    status: 500,
                    message: "down".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn record(text: &str) -> ScoreRecord {
        parser::parse(Game::Neverball, text, "x").records.remove(0)
    }

    #[test]
    fn test_log_url() {
        let config = CollectorConfig::new("http://127.0.0.1:5000/");
        assert_eq!(config.log_url(Game::Neverball), "http://127.0.0.1:5000/neverball/log");
        assert_eq!(config.log_url(Game::ExtremeTuxRacer), "http://127.0.0.1:5000/etr/log");
    }

    #[test]
    fn test_identical_record_counts_once() {
        let (sink, posts) = CountingSink::new(0);
        let stats = create_shared_stats();
        let mut dispatcher = Dispatcher::new(sink, stats.clone());
        let r = record("level 1 1 a.sol\n100 5 tux\n");

        assert_eq!(dispatcher.submit(Game::Neverball, &r).unwrap(), Delivery::Sent);
        assert_eq!(dispatcher.submit(Game::Neverball, &r).unwrap(), Delivery::Duplicate);

        assert_eq!(posts.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot().records_sent, 1);
        assert_eq!(stats.snapshot().duplicates_skipped, 1);
    }

    #[test]
    fn test_failed_delivery_is_retried_next_time() {
        let (sink, posts) = CountingSink::new(1);
        let stats = create_shared_stats();
        let mut dispatcher = Dispatcher::new(sink, stats.clone());
        let r = record("level 1 1 a.sol\n100 5 tux\n");

        assert!(matches!(
            dispatcher.submit(Game::Neverball, &r),
            Err(DispatchError::Rejected { status: 500, .. })
        ));
        assert_eq!(dispatcher.delivered(Game::Neverball), 0);

        assert_eq!(dispatcher.submit(Game::Neverball, &r).unwrap(), Delivery::Sent);
        assert_eq!(posts.load(Ordering::SeqCst), 2);

        let s = stats.snapshot();
        assert_eq!((s.records_sent, s.records_failed), (1, 1));
    }

    #[test]
    fn test_anomaly_counter() {
        let (sink, _) = CountingSink::new(0);
        let stats = create_shared_stats();
        let mut dispatcher = Dispatcher::new(sink, stats.clone());
        let r = record("level 1 1 a.sol\n100 5 tux\n").with_anomaly(true);

        dispatcher.submit(Game::Neverball, &r).unwrap();
        assert_eq!(stats.snapshot().anomalies_sent, 1);
    }

    #[test]
    fn test_submit_all_summary() {
        let (sink, _) = CountingSink::new(1);
        let mut dispatcher = Dispatcher::new(sink, create_shared_stats());
        let records = parser::parse(
            Game::Neverball,
            "level 1 1 a.sol\n100 5 tux\n200 6 tux\n200 6 tux\n",
            "x",
        )
        .records;

        let summary = dispatcher.submit_all(Game::Neverball, &records);
        assert_eq!(
            summary,
            SubmitSummary {
                sent: 1,
                duplicates: 1,
                failed: 1
            }
        );
    }
}
