//! Extreme Tux Racer score log.
//!
//! One record per line, written as bracketed key/value tokens:
//!
//! ```text
//! *[course] bunny_hill [plyr] tux [pts] 8562 [herr] 23 [time] 02:15.32
//! ```
//!
//! `time` is accepted either as plain seconds or as `mm:ss.ff`.

use crate::parser::{is_mangled, parse_number, parse_seconds, ParseReport, SkipReason};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

static FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([A-Za-z_]+)\]\s*([^\[]*)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtrRecord {
    pub username: String,
    pub course: String,
    pub score: u32,
    pub herring: u32,
    /// Seconds
    pub time: f64,
    pub is_anomaly: bool,
}

/// Parse an ETR score log.
pub fn parse(text: &str) -> ParseReport<EtrRecord> {
    let mut report = ParseReport::default();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        if is_mangled(line) {
            report.skip(line_no, SkipReason::InvalidEncoding);
            continue;
        }

        let fields: HashMap<&str, &str> = FIELD
            .captures_iter(line)
            .filter_map(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str().trim())))
            .collect();

        if fields.is_empty() {
            report.skip(line_no, SkipReason::Unrecognized);
            continue;
        }

        match extract(&fields) {
            Ok(record) => report.records.push(record),
            Err(reason) => report.skip(line_no, reason),
        }
    }

    report
}

fn extract(fields: &HashMap<&str, &str>) -> Result<EtrRecord, SkipReason> {
    let get = |key: &'static str| {
        fields
            .get(key)
            .copied()
            .filter(|v| !v.is_empty())
            .ok_or(SkipReason::MissingField(key))
    };

    let course = get("course")?;
    let player = get("plyr")?;
    let points = get("pts")?;
    let herring = get("herr")?;
    let time = get("time")?;

    Ok(EtrRecord {
        username: player.to_string(),
        course: course.to_string(),
        score: parse_number("pts", points)?,
        herring: parse_number("herr", herring)?,
        time: parse_time(time)?,
        is_anomaly: false,
    })
}

/// Seconds from `ss.ff` or `mm:ss.ff`.
fn parse_time(raw: &str) -> Result<f64, SkipReason> {
    let invalid = || SkipReason::InvalidNumber {
        field: "time",
        value: raw.to_string(),
    };
    match raw.split_once(':') {
        Some((minutes, seconds)) => {
            let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
            let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
            if !(0.0..60.0).contains(&seconds) {
                return Err(invalid());
            }
            Ok(f64::from(minutes) * 60.0 + seconds)
        }
        None => parse_seconds("time", raw),
    }
}
