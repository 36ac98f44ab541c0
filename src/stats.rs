//! Dispatch statistics.
//!
//! Counts what the ingest pipeline did with the records it parsed. Counters
//! are atomics so the ingest thread and the CLI can share one instance, and
//! can be persisted so `status` shows cumulative totals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct DispatchStats {
    records_sent: AtomicU64,
    records_failed: AtomicU64,
    anomalies_sent: AtomicU64,
    duplicates_skipped: AtomicU64,
    lines_skipped: AtomicU64,
    sessions_completed: AtomicU64,
    anomalous_sessions: AtomicU64,
    started_at: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self {
            records_sent: AtomicU64::new(0),
            records_failed: AtomicU64::new(0),
            anomalies_sent: AtomicU64::new(0),
            duplicates_skipped: AtomicU64::new(0),
            lines_skipped: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            anomalous_sessions: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats backed by a file, seeded from it when present.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            debug!("could not load previous dispatch stats: {e}");
        }

        stats
    }

    /// A record was accepted by the collector.
    pub fn record_sent(&self, is_anomaly: bool) {
        self.records_sent.fetch_add(1, Ordering::Relaxed);
        if is_anomaly {
            self.anomalies_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failed(&self) {
        self.records_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lines_skipped(&self, count: u64) {
        self.lines_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_session(&self, anomalous: bool) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
        if anomalous {
            self.anomalous_sessions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_sent: self.records_sent.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            anomalies_sent: self.anomalies_sent.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            lines_skipped: self.lines_skipped.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            anomalous_sessions: self.anomalous_sessions.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Dispatch Statistics:\n\
             - Records sent: {}\n\
             - Records flagged anomalous: {}\n\
             - Delivery failures: {}\n\
             - Duplicates suppressed: {}\n\
             - Log lines skipped: {}\n\
             - Sessions monitored: {} ({} anomalous)\n\
             - Uptime: {} seconds",
            s.records_sent,
            s.anomalies_sent,
            s.records_failed,
            s.duplicates_skipped,
            s.lines_skipped,
            s.sessions_completed,
            s.anomalous_sessions,
            s.uptime_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let s = self.snapshot();
            let persisted = PersistedStats {
                records_sent: s.records_sent,
                records_failed: s.records_failed,
                anomalies_sent: s.anomalies_sent,
                duplicates_skipped: s.duplicates_skipped,
                lines_skipped: s.lines_skipped,
                sessions_completed: s.sessions_completed,
                anomalous_sessions: s.anomalous_sessions,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let p: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.records_sent.store(p.records_sent, Ordering::Relaxed);
                self.records_failed.store(p.records_failed, Ordering::Relaxed);
                self.anomalies_sent.store(p.anomalies_sent, Ordering::Relaxed);
                self.duplicates_skipped
                    .store(p.duplicates_skipped, Ordering::Relaxed);
                self.lines_skipped.store(p.lines_skipped, Ordering::Relaxed);
                self.sessions_completed
                    .store(p.sessions_completed, Ordering::Relaxed);
                self.anomalous_sessions
                    .store(p.anomalous_sessions, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub records_sent: u64,
    pub records_failed: u64,
    pub anomalies_sent: u64,
    pub duplicates_skipped: u64,
    pub lines_skipped: u64,
    pub sessions_completed: u64,
    pub anomalous_sessions: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStats {
    pub records_sent: u64,
    pub records_failed: u64,
    pub anomalies_sent: u64,
    pub duplicates_skipped: u64,
    pub lines_skipped: u64,
    pub sessions_completed: u64,
    pub anomalous_sessions: u64,
    pub last_updated: DateTime<Utc>,
}

/// Thread-safe shared stats.
pub type SharedDispatchStats = Arc<DispatchStats>;

pub fn create_shared_stats() -> SharedDispatchStats {
    Arc::new(DispatchStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedDispatchStats {
    Arc::new(DispatchStats::with_persistence(path))
}
