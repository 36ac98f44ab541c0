//! Session lifecycle and the agent context.
//!
//! The [`Agent`] owns everything that lives for the whole process: the
//! anomaly flag, the monitor (and through it the sensor), the dispatch
//! statistics and the ingest worker. Sessions are opened and closed by
//! launcher events; shutdown tears the pieces down in order so the sensor
//! is released only after sampling has stopped.

use crate::config::Config;
use crate::dispatch::{Dispatcher, RecordSink};
use crate::ingest::{IngestWorker, Ingestor};
use crate::monitor::{AnomalyFlag, AnomalyMonitor, MonitorConfig, MonitorOutcome};
use crate::parser::Game;
use crate::sensor::{open_sampler, Baseline, RangeSampler};
use crate::stats::{create_shared_stats_with_persistence, SharedDispatchStats};
use crate::watcher::ChangeWatcher;
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Signal from the game launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Launched { game: Game, player: Option<String> },
    Exited,
}

impl FromStr for SessionEvent {
    type Err = String;

    /// `launched <game> [player]` or `exited`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        match parts.next() {
            Some("launched") => {
                let game = parts
                    .next()
                    .ok_or_else(|| "launched requires a game".to_string())?
                    .parse()?;
                let player = parts.next().map(str::to_string);
                Ok(SessionEvent::Launched { game, player })
            }
            Some("exited") => Ok(SessionEvent::Exited),
            Some(other) => Err(format!("unknown session event '{other}'")),
            None => Err("empty session event".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveSession {
    id: Uuid,
    game: Game,
    player: String,
    started_at: DateTime<Utc>,
}

/// Verdict for one finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub id: Uuid,
    pub game: Game,
    pub player: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub anomaly: bool,
    pub baseline: Option<Baseline>,
    pub samples: u64,
}

impl SessionReport {
    pub fn verdict(&self) -> &'static str {
        if self.anomaly {
            "ANOMALY"
        } else {
            "NORMAL"
        }
    }

    pub fn journal_line(&self) -> String {
        format!(
            "{} {} {} {}",
            self.ended_at.to_rfc3339(),
            self.game,
            self.player,
            self.verdict()
        )
    }
}

/// Append-only text journal of session verdicts.
#[derive(Debug, Clone)]
pub struct SessionJournal {
    path: PathBuf,
}

impl SessionJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, report: &SessionReport) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", report.journal_line())
    }
}

/// Process-wide context.
pub struct Agent {
    flag: AnomalyFlag,
    monitor: Option<AnomalyMonitor<Box<dyn RangeSampler>>>,
    stats: SharedDispatchStats,
    journal: Option<SessionJournal>,
    default_player: String,
    active: Option<ActiveSession>,
    ingest: Option<IngestWorker>,
}

impl Agent {
    pub fn new(
        sampler: Option<Box<dyn RangeSampler>>,
        monitor_config: MonitorConfig,
        stats: SharedDispatchStats,
        journal: Option<SessionJournal>,
        default_player: impl Into<String>,
    ) -> Self {
        let flag = AnomalyFlag::new();
        let monitor = sampler.map(|s| AnomalyMonitor::new(s, monitor_config, flag.clone()));
        Self {
            flag,
            monitor,
            stats,
            journal,
            default_player: default_player.into(),
            active: None,
            ingest: None,
        }
    }

    /// Open the configured sensor and persistent state.
    ///
    /// A missing sensor is reported once and leaves detection disabled.
    pub fn from_config(config: &Config) -> Self {
        let sampler = match open_sampler(&config.sensor) {
            Ok(sampler) => {
                info!(kind = %sampler.kind(), "sensor opened");
                Some(sampler)
            }
            Err(e) => {
                warn!("{e}; anomaly detection disabled, records will not be flagged");
                None
            }
        };

        Self::new(
            sampler,
            MonitorConfig::from(&config.sensor),
            create_shared_stats_with_persistence(config.stats_path()),
            Some(SessionJournal::new(config.journal_path())),
            config.player.clone(),
        )
    }

    pub fn flag(&self) -> AnomalyFlag {
        self.flag.clone()
    }

    pub fn stats(&self) -> &SharedDispatchStats {
        &self.stats
    }

    pub fn has_sensor(&self) -> bool {
        self.monitor.is_some()
    }

    pub fn active_game(&self) -> Option<Game> {
        self.active.as_ref().map(|s| s.game)
    }

    /// Start a session. An already active session is closed first.
    pub fn begin_session(&mut self, game: Game, player: Option<String>) -> Uuid {
        if let Some(previous) = self.end_session() {
            warn!(game = %previous.game, "session replaced before exit event");
        }

        let session = ActiveSession {
            id: Uuid::new_v4(),
            game,
            player: player.unwrap_or_else(|| self.default_player.clone()),
            started_at: Utc::now(),
        };

        if let Some(monitor) = self.monitor.as_mut() {
            if let Err(e) = monitor.start() {
                warn!("anomaly monitor not started: {e}");
            }
        }

        info!(session = %session.id, %game, player = %session.player, "session started");
        let id = session.id;
        self.active = Some(session);
        id
    }

    /// Close the active session and record its verdict.
    pub fn end_session(&mut self) -> Option<SessionReport> {
        let session = self.active.take()?;

        let outcome = match self.monitor.as_mut() {
            Some(monitor) => monitor.stop().unwrap_or_else(|e| {
                debug!("monitor was not running: {e}");
                idle_outcome(&self.flag)
            }),
            None => idle_outcome(&self.flag),
        };

        let report = SessionReport {
            id: session.id,
            game: session.game,
            player: session.player,
            started_at: session.started_at,
            ended_at: Utc::now(),
            anomaly: outcome.anomaly,
            baseline: outcome.baseline,
            samples: outcome.samples,
        };

        if report.anomaly {
            warn!(session = %report.id, game = %report.game, player = %report.player, "session ended: ANOMALY");
        } else {
            info!(session = %report.id, game = %report.game, player = %report.player, "session ended: NORMAL");
        }

        self.stats.record_session(report.anomaly);
        if let Err(e) = self.stats.save() {
            warn!("could not persist dispatch stats: {e}");
        }
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&report) {
                warn!(path = %journal.path().display(), "could not write session journal: {e}");
            }
        }

        Some(report)
    }

    pub fn handle_event(&mut self, event: SessionEvent) -> Option<SessionReport> {
        match event {
            SessionEvent::Launched { game, player } => {
                self.begin_session(game, player);
                None
            }
            SessionEvent::Exited => {
                let report = self.end_session();
                if report.is_none() {
                    debug!("exit event without an active session");
                }
                report
            }
        }
    }

    /// Process launcher events until `running` clears or the channel closes.
    pub fn run_until(
        &mut self,
        events: &Receiver<SessionEvent>,
        running: &AtomicBool,
    ) -> Vec<SessionReport> {
        let mut reports = Vec::new();
        while running.load(Ordering::SeqCst) {
            match events.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => reports.extend(self.handle_event(event)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("session event channel closed");
                    break;
                }
            }
        }
        reports
    }

    /// Start background ingestion of every configured log.
    pub fn start_ingest<K>(&mut self, sink: K, config: &Config) -> std::io::Result<()>
    where
        K: RecordSink + Send + 'static,
    {
        if let Some(mut worker) = self.ingest.take() {
            worker.stop();
        }
        let ingestor = Ingestor::new(
            ChangeWatcher::from_logs(&config.logs),
            Dispatcher::new(sink, self.stats.clone()),
            config.player.clone(),
            self.flag.clone(),
        );
        self.ingest = Some(IngestWorker::spawn(ingestor, config.poll_interval)?);
        Ok(())
    }

    /// Stop ingestion, close any open session, then release the sensor.
    pub fn shutdown(&mut self) -> Option<SessionReport> {
        if let Some(mut worker) = self.ingest.take() {
            worker.stop();
        }
        let report = self.end_session();
        if let Some(monitor) = self.monitor.take() {
            monitor.release();
        }
        if let Err(e) = self.stats.save() {
            warn!("could not persist dispatch stats: {e}");
        }
        report
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn idle_outcome(flag: &AnomalyFlag) -> MonitorOutcome {
    MonitorOutcome {
        anomaly: flag.is_raised(),
        baseline: None,
        samples: 0,
        anomalous_samples: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::testing::ScriptedSampler;
    use crate::stats::create_shared_stats;

    fn fast_monitor() -> MonitorConfig {
        MonitorConfig {
            threshold: 10.0,
            check_interval: Duration::ZERO,
            tick: Duration::from_millis(2),
            baseline_spacing: Duration::ZERO,
        }
    }

    #[test]
    fn test_event_parsing() {
        assert_eq!(
            "launched neverball jungwoo".parse::<SessionEvent>().unwrap(),
            SessionEvent::Launched {
                game: Game::Neverball,
                player: Some("jungwoo".to_string())
            }
        );
        assert_eq!(
            "launched etr".parse::<SessionEvent>().unwrap(),
            SessionEvent::Launched {
                game: Game::ExtremeTuxRacer,
                player: None
            }
        );
        assert_eq!("exited".parse::<SessionEvent>().unwrap(), SessionEvent::Exited);
        assert!("launched".parse::<SessionEvent>().is_err());
        assert!("paused".parse::<SessionEvent>().is_err());
    }

    #[test]
    fn test_session_without_sensor_is_normal() {
        let dir = tempfile::tempdir().unwrap();
        let journal = SessionJournal::new(dir.path().join("sessions.log"));
        let stats = create_shared_stats();
        let mut agent = Agent::new(None, fast_monitor(), stats.clone(), Some(journal), "tux");

        assert!(!agent.has_sensor());
        agent.begin_session(Game::SuperTux, None);
        assert_eq!(agent.active_game(), Some(Game::SuperTux));
        let report = agent.end_session().unwrap();

        assert!(!report.anomaly);
        assert_eq!(report.player, "tux");
        assert_eq!(stats.snapshot().sessions_completed, 1);

        let journal = std::fs::read_to_string(dir.path().join("sessions.log")).unwrap();
        assert!(journal.trim_end().ends_with("supertux tux NORMAL"));
    }

    #[test]
    fn test_anomalous_session_through_events() {
        let sampler = ScriptedSampler::new([Some(100.0), Some(100.0), Some(100.0), Some(180.0)]);
        let calls = sampler.call_counter();
        let mut agent = Agent::new(
            Some(Box::new(sampler)),
            fast_monitor(),
            create_shared_stats(),
            None,
            "tux",
        );

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(SessionEvent::Launched {
            game: Game::Neverball,
            player: Some("jungwoo".to_string()),
        })
        .unwrap();

        assert!(agent.handle_event(rx.recv().unwrap()).is_none());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) < 5 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(agent.flag().is_raised());

        tx.send(SessionEvent::Exited).unwrap();
        drop(tx);
        let reports = agent.run_until(&rx, &AtomicBool::new(true));

        assert_eq!(reports.len(), 1);
        assert!(reports[0].anomaly);
        assert_eq!(reports[0].player, "jungwoo");
        assert_eq!(reports[0].journal_line().split(' ').last(), Some("ANOMALY"));
    }

    #[test]
    fn test_shutdown_releases_sensor_and_closes_session() {
        let sampler = ScriptedSampler::new([Some(50.0)]);
        let released = sampler.released_marker();
        let mut agent = Agent::new(
            Some(Box::new(sampler)),
            fast_monitor(),
            create_shared_stats(),
            None,
            "tux",
        );

        agent.begin_session(Game::ExtremeTuxRacer, None);
        let report = agent.shutdown();

        assert!(report.is_some());
        assert!(released.load(Ordering::SeqCst));
        assert!(!agent.has_sensor());
        assert!(agent.shutdown().is_none());
    }
}
