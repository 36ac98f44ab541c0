//! NotPortable Agent - sensor-backed anomaly detection and score ingestion
//! for arcade game sessions.
//!
//! While a game runs, a proximity or vibration sensor is sampled against a
//! baseline taken at session start; any large deviation marks the session
//! anomalous. Independently, each game's score log is watched, re-parsed
//! when it changes, and new records are posted to a collector with the
//! session's anomaly verdict attached.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Agent                                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  SessionEvent ──▶ ┌─────────────┐   ┌─────────────┐              │
//! │                   │  Anomaly    │──▶│  Baseline   │──▶ sensor    │
//! │                   │  Monitor    │   │  Tracker    │              │
//! │                   └──────┬──────┘   └─────────────┘              │
//! │                          │ AnomalyFlag                           │
//! │                          ▼                                       │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐             │
//! │  │   Change    │──▶│   Parser    │──▶│ Dispatcher  │──▶ collector│
//! │  │   Watcher   │   │ (per game)  │   │  (dedup)    │             │
//! │  └─────────────┘   └─────────────┘   └──────┬──────┘             │
//! │                                             ▼                    │
//! │                                      ┌─────────────┐             │
//! │                                      │  Dispatch   │             │
//! │                                      │   Stats     │             │
//! │                                      └─────────────┘             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use notportable_agent::{parser, Game};
//!
//! let bytes = std::fs::read("game_log.txt").unwrap();
//! let report = parser::parse_bytes(Game::Neverball, &bytes, "player");
//! for record in &report.records {
//!     println!("{}", serde_json::to_string(record).unwrap());
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod monitor;
pub mod parser;
pub mod sensor;
pub mod session;
pub mod stats;
pub mod watcher;

// Re-export key types at crate root for convenience
pub use config::{Config, LogPaths, SensorConfig};
pub use dispatch::{
    BlockingCollectorClient, CollectorClient, CollectorConfig, Delivery, DispatchError,
    Dispatcher, RecordSink, SubmitSummary,
};
pub use ingest::{IngestError, IngestReport, IngestWorker, Ingestor};
pub use monitor::{AnomalyFlag, AnomalyMonitor, MonitorConfig, MonitorOutcome, MonitorState};
pub use parser::{DedupKey, Game, ParseSkip, ScoreRecord, SkipReason};
pub use sensor::{RangeSampler, SensorError, SensorKind};
pub use session::{Agent, SessionEvent, SessionJournal, SessionReport};
pub use stats::{DispatchStats, SharedDispatchStats};
pub use watcher::{ChangeWatcher, PendingChange};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
