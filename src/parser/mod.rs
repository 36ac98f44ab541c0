//! Score log parsers for the supported games.
//!
//! Each format is an explicit grammar: a classifier decides what a line (or
//! s-expression node) is, then an extractor pulls typed fields out of it.
//! Anything that fails extraction becomes a [`ParseSkip`] and parsing
//! carries on, so a damaged file still yields every well-formed record.

pub mod etr;
pub mod neverball;
pub mod supertux;

use serde::{Deserialize, Serialize};
use std::char::REPLACEMENT_CHARACTER;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use etr::EtrRecord;
pub use neverball::NeverballRecord;
pub use supertux::SuperTuxRecord;

/// A supported game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    Neverball,
    SuperTux,
    #[serde(rename = "etr")]
    ExtremeTuxRacer,
}

impl Game {
    pub const ALL: [Game; 3] = [Game::Neverball, Game::SuperTux, Game::ExtremeTuxRacer];

    /// Path segment used by the collector (`/{slug}/log`).
    pub fn slug(&self) -> &'static str {
        match self {
            Game::Neverball => "neverball",
            Game::SuperTux => "supertux",
            Game::ExtremeTuxRacer => "etr",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Game::Neverball => "Neverball",
            Game::SuperTux => "SuperTux",
            Game::ExtremeTuxRacer => "Extreme Tux Racer",
        }
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Game {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "neverball" => Ok(Game::Neverball),
            "supertux" | "supertux2" => Ok(Game::SuperTux),
            "etr" | "etracer" | "extremetuxracer" => Ok(Game::ExtremeTuxRacer),
            other => Err(format!("unknown game '{other}'")),
        }
    }
}

/// A parsed score record for any game.
///
/// Serializes to the flat per-game body the collector expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScoreRecord {
    Neverball(NeverballRecord),
    SuperTux(SuperTuxRecord),
    ExtremeTuxRacer(EtrRecord),
}

impl ScoreRecord {
    pub fn game(&self) -> Game {
        match self {
            ScoreRecord::Neverball(_) => Game::Neverball,
            ScoreRecord::SuperTux(_) => Game::SuperTux,
            ScoreRecord::ExtremeTuxRacer(_) => Game::ExtremeTuxRacer,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            ScoreRecord::Neverball(r) => &r.username,
            ScoreRecord::SuperTux(r) => &r.username,
            ScoreRecord::ExtremeTuxRacer(r) => &r.username,
        }
    }

    pub fn is_anomaly(&self) -> bool {
        match self {
            ScoreRecord::Neverball(r) => r.is_anomaly,
            ScoreRecord::SuperTux(r) => r.is_anomaly,
            ScoreRecord::ExtremeTuxRacer(r) => r.is_anomaly,
        }
    }

    /// Copy of this record with the anomaly tag set.
    pub fn with_anomaly(&self, is_anomaly: bool) -> Self {
        let mut tagged = self.clone();
        match &mut tagged {
            ScoreRecord::Neverball(r) => r.is_anomaly = is_anomaly,
            ScoreRecord::SuperTux(r) => r.is_anomaly = is_anomaly,
            ScoreRecord::ExtremeTuxRacer(r) => r.is_anomaly = is_anomaly,
        }
        tagged
    }

    /// Identity used to suppress re-delivery. Ignores the anomaly tag.
    pub fn dedup_key(&self) -> DedupKey {
        match self {
            ScoreRecord::Neverball(r) => DedupKey::new([
                r.level.clone(),
                r.username.clone(),
                r.score.to_string(),
                r.coins.to_string(),
            ]),
            ScoreRecord::SuperTux(r) => DedupKey::new([
                r.level.clone(),
                r.username.clone(),
                r.time.to_string(),
                r.coins.to_string(),
            ]),
            ScoreRecord::ExtremeTuxRacer(r) => DedupKey::new([
                r.course.clone(),
                r.username.clone(),
                r.time.to_string(),
                r.score.to_string(),
            ]),
        }
    }
}

/// Tuple of identifying fields for one record of one game.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(Vec<String>);

impl DedupKey {
    pub fn new(fields: impl IntoIterator<Item = String>) -> Self {
        Self(fields.into_iter().collect())
    }
}

/// Why a line or block produced no record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    #[error("unrecognized line")]
    Unrecognized,
    #[error("score line before any level directive")]
    NoLevel,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid number for `{field}`: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("line is not valid UTF-8")]
    InvalidEncoding,
    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),
}

/// One skipped line or block.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseSkip {
    /// 1-based line number where the skipped input starts
    pub line: usize,
    pub reason: SkipReason,
}

impl fmt::Display for ParseSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

/// Records and skips produced by one parse pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseReport<T> {
    pub records: Vec<T>,
    pub skipped: Vec<ParseSkip>,
}

impl<T> Default for ParseReport<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> ParseReport<T> {
    pub(crate) fn skip(&mut self, line: usize, reason: SkipReason) {
        self.skipped.push(ParseSkip { line, reason });
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ParseReport<U> {
        ParseReport {
            records: self.records.into_iter().map(f).collect(),
            skipped: self.skipped,
        }
    }
}

/// Parse a whole score log for `game`.
///
/// `player` names the records of formats that carry no player name.
pub fn parse(game: Game, text: &str, player: &str) -> ParseReport<ScoreRecord> {
    match game {
        Game::Neverball => neverball::parse(text).map(ScoreRecord::Neverball),
        Game::SuperTux => supertux::parse(text, player).map(ScoreRecord::SuperTux),
        Game::ExtremeTuxRacer => etr::parse(text).map(ScoreRecord::ExtremeTuxRacer),
    }
}

/// Parse a score log read as raw bytes.
///
/// Invalid UTF-8 is decoded lossily. Lines carrying a replacement character
/// are skipped with [`SkipReason::InvalidEncoding`], so the rest of the file
/// still parses.
pub fn parse_bytes(game: Game, bytes: &[u8], player: &str) -> ParseReport<ScoreRecord> {
    parse(game, &String::from_utf8_lossy(bytes), player)
}

pub(crate) fn is_mangled(text: &str) -> bool {
    text.contains(REPLACEMENT_CHARACTER)
}

pub(crate) fn parse_number<N: FromStr>(
    field: &'static str,
    raw: &str,
) -> Result<N, SkipReason> {
    raw.trim().parse().map_err(|_| SkipReason::InvalidNumber {
        field,
        value: raw.trim().to_string(),
    })
}

/// A duration in seconds: finite and not negative.
pub(crate) fn parse_seconds(field: &'static str, raw: &str) -> Result<f64, SkipReason> {
    let seconds: f64 = parse_number(field, raw)?;
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(seconds)
    } else {
        Err(SkipReason::InvalidNumber {
            field,
            value: raw.trim().to_string(),
        })
    }
}
