//! Modification-time polling of the score logs.

use crate::config::LogPaths;
use crate::parser::Game;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// A log whose mtime differs from the last ingested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChange {
    pub game: Game,
    pub modified: SystemTime,
}

/// Tracks the last successfully ingested mtime of each game's log.
#[derive(Debug, Clone)]
pub struct ChangeWatcher {
    paths: HashMap<Game, PathBuf>,
    last_ingested: HashMap<Game, SystemTime>,
}

impl ChangeWatcher {
    pub fn new(paths: impl IntoIterator<Item = (Game, PathBuf)>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
            last_ingested: HashMap::new(),
        }
    }

    pub fn from_logs(logs: &LogPaths) -> Self {
        Self::new(logs.iter())
    }

    pub fn path(&self, game: Game) -> Option<&Path> {
        self.paths.get(&game).map(PathBuf::as_path)
    }

    /// Check `game`'s log. A missing or unreadable file is "no update".
    pub fn poll(&self, game: Game) -> Option<PendingChange> {
        let path = self.paths.get(&game)?;
        let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                debug!(%game, path = %path.display(), "log not available: {e}");
                return None;
            }
        };

        match self.last_ingested.get(&game) {
            Some(last) if *last == modified => None,
            _ => Some(PendingChange { game, modified }),
        }
    }

    pub fn has_changed(&self, game: Game) -> bool {
        self.poll(game).is_some()
    }

    /// Record a change as ingested. Call only after a fully successful pass.
    pub fn confirm(&mut self, change: PendingChange) {
        self.last_ingested.insert(change.game, change.modified);
    }

    pub fn last_ingested(&self, game: Game) -> Option<SystemTime> {
        self.last_ingested.get(&game).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn watcher_for(path: &Path) -> ChangeWatcher {
        ChangeWatcher::new([(Game::Neverball, path.to_path_buf())])
    }

    #[test]
    fn test_missing_file_is_no_update() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher_for(&dir.path().join("absent.txt"));
        assert!(!watcher.has_changed(Game::Neverball));
        assert!(!watcher.has_changed(Game::SuperTux));
    }

    #[test]
    fn test_confirm_clears_until_next_modification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game_log.txt");
        std::fs::write(&path, "level 1 1 a.sol\n").unwrap();
        let mut watcher = watcher_for(&path);

        let change = watcher.poll(Game::Neverball).expect("new file is a change");
        watcher.confirm(change);
        assert!(!watcher.has_changed(Game::Neverball));
        assert_eq!(watcher.last_ingested(Game::Neverball), Some(change.modified));

        let later = change.modified + Duration::from_secs(5);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();
        assert_eq!(
            watcher.poll(Game::Neverball).map(|c| c.modified),
            Some(later)
        );
    }

    #[test]
    fn test_unconfirmed_change_stays_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game_log.txt");
        std::fs::write(&path, "x").unwrap();
        let watcher = watcher_for(&path);

        assert!(watcher.has_changed(Game::Neverball));
        assert!(watcher.has_changed(Game::Neverball));
    }
}
