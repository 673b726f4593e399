//! Consecutive-day streaks.
//!
//! Entries are bucketed into days since the Unix epoch and the longest run
//! of consecutive populated days is compared against configured thresholds.
//! Thresholds already awarded are recorded on the page as a pipe-joined list
//! (`"010|015|020"`) that only ever grows.

use crate::config::ActivityStreakConfig;
use chrono::{DateTime, FixedOffset, ParseError};
use std::collections::BTreeMap;
use std::fmt;
use upstream::{Donation, ExerciseLogEntry};

pub const EPOCH_DAY_SECONDS: i64 = 86_400;

/// Entries bucketed by epoch day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochDays {
    days: BTreeMap<i64, usize>,
}

impl EpochDays {
    /// Buckets RFC 3339 timestamps. Timestamps that fail to parse all land on
    /// day zero.
    pub fn from_timestamps<'a>(timestamps: impl IntoIterator<Item = &'a str>) -> Self {
        let mut days = BTreeMap::new();
        for timestamp in timestamps {
            let day = DateTime::parse_from_rfc3339(timestamp)
                .map(|t| t.timestamp().div_euclid(EPOCH_DAY_SECONDS))
                .unwrap_or_default();
            *days.entry(day).or_default() += 1;
        }
        EpochDays { days }
    }

    pub fn first_day(&self) -> Option<i64> {
        self.days.keys().next().copied()
    }

    pub fn last_day(&self) -> Option<i64> {
        self.days.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Length of the longest run of consecutive days.
    pub fn longest_run(&self) -> u32 {
        let mut longest = 0;
        let mut current = 0;
        let mut previous: Option<i64> = None;
        for &day in self.days.keys() {
            current = match previous {
                Some(p) if p + 1 == day => current + 1,
                _ => 1,
            };
            longest = longest.max(current);
            previous = Some(day);
        }
        longest
    }
}

/// Thresholds already awarded, as stored on the page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreakState {
    raw: String,
    awarded: Vec<u32>,
}

impl StreakState {
    /// Parts that are not numbers are ignored but kept in the raw value.
    pub fn parse(raw: &str) -> Self {
        let awarded = raw
            .split('|')
            .filter_map(|part| part.trim().parse::<u32>().ok())
            .collect();
        StreakState {
            raw: raw.to_string(),
            awarded,
        }
    }

    pub fn awarded(&self) -> &[u32] {
        &self.awarded
    }

    pub fn max_awarded(&self) -> u32 {
        self.awarded.iter().copied().max().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Appends every configured threshold not yet awarded that `run` reaches,
    /// in ascending order. Returns the thresholds that were added.
    pub fn award(&mut self, run: u32, thresholds: &[u32]) -> Vec<u32> {
        let mut due: Vec<u32> = thresholds
            .iter()
            .copied()
            .filter(|t| *t <= run && !self.awarded.contains(t))
            .collect();
        due.sort_unstable();
        due.dedup();

        for threshold in &due {
            if !self.raw.is_empty() {
                self.raw.push('|');
            }
            self.raw.push_str(&format!("{threshold:03}"));
            self.awarded.push(*threshold);
        }
        due
    }
}

impl fmt::Display for StreakState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_bound(bound: Option<&str>) -> Option<Result<DateTime<FixedOffset>, ParseError>> {
    bound.map(DateTime::parse_from_rfc3339)
}

/// Whether an exercise log counts towards the activity streak.
pub fn include_exercise_log(entry: &ExerciseLogEntry, config: &ActivityStreakConfig) -> bool {
    if entry.distance < 1.0 {
        return false;
    }
    if !config.filter.is_empty() && !config.filter.contains(&entry.activity) {
        return false;
    }

    let timestamp = DateTime::parse_from_rfc3339(&entry.date);
    if let Some(from) = parse_bound(config.from.as_deref()) {
        match (from, &timestamp) {
            (Ok(from), Ok(t)) if *t >= from => {}
            _ => return false,
        }
    }
    if let Some(to) = parse_bound(config.to.as_deref()) {
        match (to, &timestamp) {
            (Ok(to), Ok(t)) if *t <= to => {}
            _ => return false,
        }
    }
    true
}

pub fn include_donation(donation: &Donation) -> bool {
    donation.amount > 0.0
}
