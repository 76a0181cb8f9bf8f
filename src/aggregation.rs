//! Day-level aggregation: full refolds of scores, thanks deltas, and the lazy
//! per-role breakdown backfill used by roll-ups.

use crate::calendar::DateInfo;
use crate::errors::DiaryError;
use crate::models::{DayRecord, Entry, RoleScore, ScoreBreakdown};
use crate::roles::Role;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const BREAKDOWN_CACHE_CAPACITY: usize = 4096;

pub fn score_label(score: u8) -> Option<&'static str> {
    match score {
        4 => Some("good"),
        3 => Some("somewhat good"),
        2 => Some("somewhat bad"),
        1 => Some("bad"),
        _ => None,
    }
}

/// `sum / count`, or `None` when nothing was counted. Zero is a real average.
pub fn average(sum: u32, count: u32) -> Option<f64> {
    (count > 0).then(|| f64::from(sum) / f64::from(count))
}

fn empty_breakdown() -> ScoreBreakdown {
    Role::ALL
        .into_iter()
        .map(|role| {
            (
                role,
                RoleScore {
                    sum: Some(0),
                    count: Some(0),
                    average: None,
                },
            )
        })
        .collect()
}

pub fn new_day_record(info: &DateInfo, time_zone: &str, now: DateTime<Utc>) -> DayRecord {
    DayRecord {
        day_key: info.day_key.clone(),
        display_label: info.display_label.clone(),
        week_key: info.week_key.clone(),
        time_zone: time_zone.to_string(),
        score_sum: 0,
        score_count: 0,
        score_average: None,
        score_breakdown: Some(empty_breakdown()),
        thanks_total: 0,
        thanks_breakdown: Role::ALL.into_iter().map(|role| (role, 0)).collect(),
        created_at: now,
        updated_at: now,
        last_aggregate_at: Some(now),
    }
}

pub fn compute_breakdown(entries: &[Entry]) -> ScoreBreakdown {
    let mut totals: BTreeMap<Role, (u32, u32)> =
        Role::ALL.into_iter().map(|role| (role, (0, 0))).collect();

    for entry in entries {
        let Some(score) = entry.score else {
            continue;
        };
        let (sum, count) = totals.entry(entry.role).or_default();
        *sum = sum.saturating_add(u32::from(score));
        *count = count.saturating_add(1);
    }

    totals
        .into_iter()
        .map(|(role, (sum, count))| {
            (
                role,
                RoleScore {
                    sum: Some(sum),
                    count: Some(count),
                    average: average(sum, count),
                },
            )
        })
        .collect()
}

/// Recomputes every score field from the day's current entries. Never reads
/// the record's previous totals, so repeating it is harmless.
pub fn refold_day(record: &mut DayRecord, entries: &[Entry], now: DateTime<Utc>) {
    let breakdown = compute_breakdown(entries);
    let (sum, count) = breakdown.values().fold((0u32, 0u32), |(sum, count), role| {
        (
            sum.saturating_add(role.sum.unwrap_or(0)),
            count.saturating_add(role.count.unwrap_or(0)),
        )
    });

    record.score_sum = sum;
    record.score_count = count;
    record.score_average = average(sum, count);
    record.score_breakdown = Some(breakdown);
    record.last_aggregate_at = Some(now);
    record.updated_at = now;
}

/// Thanks delta. Callers must hold the store's write section.
pub fn apply_thanks(record: &mut DayRecord, role: Role, now: DateTime<Utc>) {
    let counter = record.thanks_breakdown.entry(role).or_insert(0);
    *counter = counter.saturating_add(1);
    record.thanks_total = record.thanks_total.saturating_add(1);
    record.updated_at = now;
}

/// A breakdown is usable only if every role has both `sum` and `count`.
pub fn breakdown_is_valid(record: &DayRecord) -> bool {
    record.score_breakdown.as_ref().is_some_and(|breakdown| {
        Role::ALL.iter().all(|role| {
            breakdown
                .get(role)
                .is_some_and(|score| score.sum.is_some() && score.count.is_some())
        })
    })
}

/// Where backfill re-reads a day's entries from.
pub trait EntrySource {
    fn entries_for_day(&self, day_key: &str) -> Result<Vec<Entry>, DiaryError>;
}

/// Process-lifetime memo of backfilled breakdowns, keyed by day key.
#[derive(Debug, Default)]
pub struct BreakdownCache {
    entries: Mutex<HashMap<String, ScoreBreakdown>>,
}

impl BreakdownCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, day_key: &str) -> Option<ScoreBreakdown> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(day_key).cloned()
    }

    pub fn insert(&self, day_key: &str, breakdown: ScoreBreakdown) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= BREAKDOWN_CACHE_CAPACITY && !entries.contains_key(day_key) {
            debug!(day_key, "breakdown cache full, not caching");
            return;
        }
        entries.insert(day_key.to_string(), breakdown);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn resolve_breakdown(
    record: &DayRecord,
    cache: &BreakdownCache,
    source: &dyn EntrySource,
) -> Result<ScoreBreakdown, DiaryError> {
    if breakdown_is_valid(record) {
        if let Some(breakdown) = &record.score_breakdown {
            return Ok(breakdown.clone());
        }
    }
    if let Some(cached) = cache.get(&record.day_key) {
        return Ok(cached);
    }

    let entries = source
        .entries_for_day(&record.day_key)
        .map_err(|err| DiaryError::BackfillFailure {
            day_key: record.day_key.clone(),
            reason: err.to_string(),
        })?;
    let breakdown = compute_breakdown(&entries);
    debug!(day_key = %record.day_key, entries = entries.len(), "backfilled role breakdown");
    cache.insert(&record.day_key, breakdown.clone());
    Ok(breakdown)
}
