//! Log ingestion: watch, re-parse, tag, dispatch.
//!
//! Every changed log is re-read from the start. Dedup in the [`Dispatcher`]
//! makes the full re-read cheap on the wire, and the watcher only advances
//! once every record of a pass was delivered or already known.

use crate::dispatch::{Dispatcher, RecordSink, SubmitSummary};
use crate::monitor::AnomalyFlag;
use crate::parser::{self, Game, ParseSkip};
use crate::watcher::ChangeWatcher;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no log path configured for {0}")]
    NoPath(Game),
    #[error("failed to read {game} log {path:?}: {source}")]
    Read {
        game: Game,
        path: PathBuf,
        source: std::io::Error,
    },
}

/// What one ingest pass over one log did.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub game: Game,
    pub parsed: usize,
    pub skipped: Vec<ParseSkip>,
    pub summary: SubmitSummary,
    /// Whether the watcher advanced past this version of the file
    pub confirmed: bool,
}

pub struct Ingestor<K: RecordSink> {
    watcher: ChangeWatcher,
    dispatcher: Dispatcher<K>,
    player: String,
    flag: AnomalyFlag,
}

impl<K: RecordSink> Ingestor<K> {
    pub fn new(
        watcher: ChangeWatcher,
        dispatcher: Dispatcher<K>,
        player: impl Into<String>,
        flag: AnomalyFlag,
    ) -> Self {
        Self {
            watcher,
            dispatcher,
            player: player.into(),
            flag,
        }
    }

    /// Ingest `game`'s log if it changed. `Ok(None)` means nothing to do.
    ///
    /// Every new record of the pass takes the flag as it reads now, including
    /// records left over from earlier failed passes and records of games
    /// other than the one in session.
    pub fn ingest_once(&mut self, game: Game) -> Result<Option<IngestReport>, IngestError> {
        let Some(change) = self.watcher.poll(game) else {
            return Ok(None);
        };
        let path = self
            .watcher
            .path(game)
            .ok_or(IngestError::NoPath(game))?
            .to_path_buf();

        let bytes = std::fs::read(&path).map_err(|source| IngestError::Read {
            game,
            path: path.clone(),
            source,
        })?;

        let report = parser::parse_bytes(game, &bytes, &self.player);
        for skip in &report.skipped {
            debug!(%game, "skipped {skip}");
        }
        self.dispatcher
            .stats()
            .record_lines_skipped(report.skipped.len() as u64);

        // One read of the sticky flag per pass.
        let anomaly = self.flag.is_raised();
        let records: Vec<_> = report
            .records
            .iter()
            .map(|r| r.with_anomaly(anomaly))
            .collect();

        let summary = self.dispatcher.submit_all(game, &records);
        let confirmed = summary.failed == 0;
        if confirmed {
            self.watcher.confirm(change);
        } else {
            warn!(
                %game,
                failed = summary.failed,
                "some records were not delivered; log stays pending"
            );
        }

        if summary.sent > 0 {
            info!(%game, sent = summary.sent, anomaly, "score records dispatched");
        }

        Ok(Some(IngestReport {
            game,
            parsed: records.len(),
            skipped: report.skipped,
            summary,
            confirmed,
        }))
    }

    /// One pass over every game. Errors are logged and the game is retried
    /// on the next pass.
    pub fn poll_all(&mut self) -> Vec<IngestReport> {
        let mut reports = Vec::new();
        for game in Game::ALL {
            match self.ingest_once(game) {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => warn!("{e}"),
            }
        }

        if !reports.is_empty() {
            if let Err(e) = self.dispatcher.stats().save() {
                warn!("could not persist dispatch stats: {e}");
            }
        }
        reports
    }

    pub fn watcher(&self) -> &ChangeWatcher {
        &self.watcher
    }

    pub fn dispatcher(&self) -> &Dispatcher<K> {
        &self.dispatcher
    }
}

/// Background thread running [`Ingestor::poll_all`] on a fixed period.
pub struct IngestWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IngestWorker {
    pub fn spawn<K>(mut ingestor: Ingestor<K>, interval: Duration) -> std::io::Result<Self>
    where
        K: RecordSink + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();

        let handle = thread::Builder::new()
            .name("log-ingest".to_string())
            .spawn(move || {
                info!(interval_secs = interval.as_secs(), "log ingestion started");
                while r.load(Ordering::SeqCst) {
                    ingestor.poll_all();
                    sleep_while_running(&r, interval);
                }
                debug!("log ingestion stopped");
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Signal the thread and wait for the current pass to finish.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("log ingestion thread panicked");
            }
        }
    }
}

impl Drop for IngestWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sleep_while_running(running: &AtomicBool, period: Duration) {
    let deadline = Instant::now() + period;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(100)));
    }
}
