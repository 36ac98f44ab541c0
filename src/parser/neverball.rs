//! Neverball score log.
//!
//! Line oriented. A `level <a> <b> <file>` directive names the level that
//! the following `<score> <coins> <name>` lines belong to. The level goal
//! placeholders `Hard`, `Medium` and `Easy` look like score lines but are
//! target values, not player records.

use crate::parser::{is_mangled, parse_number, ParseReport, SkipReason};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static LEVEL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^level\s+\S+\s+\S+\s+(\S+)$").expect("valid regex"));

static SCORE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)\s+(\S+)\s+(\S+)$").expect("valid regex"));

const GOAL_SENTINELS: [&str; 3] = ["Hard", "Medium", "Easy"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeverballRecord {
    pub username: String,
    pub level: String,
    pub score: u32,
    pub coins: u32,
    pub is_anomaly: bool,
}

#[derive(Debug, PartialEq)]
enum Line<'a> {
    Blank,
    Level(&'a str),
    Score {
        score: &'a str,
        coins: &'a str,
        name: &'a str,
    },
    Other,
}

fn classify(line: &str) -> Line<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Line::Blank;
    }
    if let Some(caps) = LEVEL_LINE.captures(line) {
        return caps.get(1).map_or(Line::Other, |m| Line::Level(m.as_str()));
    }
    if line.starts_with("level") {
        return Line::Other;
    }
    match SCORE_LINE.captures(line) {
        Some(caps) => match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(score), Some(coins), Some(name)) => Line::Score {
                score: score.as_str(),
                coins: coins.as_str(),
                name: name.as_str(),
            },
            _ => Line::Other,
        },
        None => Line::Other,
    }
}

/// Parse a Neverball score log.
pub fn parse(text: &str) -> ParseReport<NeverballRecord> {
    let mut report = ParseReport::default();
    let mut level: Option<&str> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        if is_mangled(raw) {
            report.skip(line_no, SkipReason::InvalidEncoding);
            continue;
        }
        match classify(raw) {
            Line::Blank => {}
            Line::Level(file) => level = Some(file),
            Line::Score { name, .. } if GOAL_SENTINELS.contains(&name) => {}
            Line::Score { score, coins, name } => {
                let Some(level) = level else {
                    report.skip(line_no, SkipReason::NoLevel);
                    continue;
                };
                match extract(level, score, coins, name) {
                    Ok(record) => report.records.push(record),
                    Err(reason) => report.skip(line_no, reason),
                }
            }
            Line::Other => report.skip(line_no, SkipReason::Unrecognized),
        }
    }

    report
}

fn extract(level: &str, score: &str, coins: &str, name: &str) -> Result<NeverballRecord, SkipReason> {
    Ok(NeverballRecord {
        username: name.to_string(),
        level: level.to_string(),
        score: parse_number("score", score)?,
        coins: parse_number("coins", coins)?,
        is_anomaly: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_record() {
        let report = parse("level 2 1 map-easy/easy.sol\n2695 11 jungwooD\n");
        assert_eq!(
            report.records,
            vec![NeverballRecord {
                username: "jungwooD".to_string(),
                level: "map-easy/easy.sol".to_string(),
                score: 2695,
                coins: 11,
                is_anomaly: false,
            }]
        );
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_goal_sentinels_are_excluded() {
        let report = parse("level 2 1 map-easy/easy.sol\n3378 17 Hard\n3000 12 Medium\n2000 5 Easy\n");
        assert!(report.records.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_level_carries_across_lines() {
        let text = "\
level 1 1 map-easy/one.sol
3378 17 Hard
1200 9 alice
level 2 1 map-easy/two.sol
900 3 bob
950 4 carol
";
        let report = parse(text);
        let levels: Vec<_> = report.records.iter().map(|r| r.level.as_str()).collect();
        assert_eq!(levels, ["map-easy/one.sol", "map-easy/two.sol", "map-easy/two.sol"]);
        let users: Vec<_> = report.records.iter().map(|r| r.username.as_str()).collect();
        assert_eq!(users, ["alice", "bob", "carol"]);
    }

    #[test]
    fn test_malformed_lines_are_skipped_not_fatal() {
        let text = "\
neverball_scores v2
100 7 early
level 1 1 a.sol
12x 3 broken
100 7 tux
level missing-fields
";
        let report = parse(text);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].username, "tux");

        let reasons: Vec<_> = report.skipped.iter().map(|s| (s.line, s.reason.clone())).collect();
        assert_eq!(
            reasons,
            vec![
                (1, SkipReason::Unrecognized),
                (2, SkipReason::NoLevel),
                (
                    4,
                    SkipReason::InvalidNumber {
                        field: "score",
                        value: "12x".to_string()
                    }
                ),
                (6, SkipReason::Unrecognized),
            ]
        );
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("   "), Line::Blank);
        assert_eq!(classify("level 3 4 x.sol"), Line::Level("x.sol"));
        assert_eq!(classify("too many tokens here"), Line::Other);
    }
}
