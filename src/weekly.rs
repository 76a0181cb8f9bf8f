//! Input for the weekly reflection comment.
//!
//! The text itself comes from an external language model. This module only
//! gathers the week's numbers, the previous weeks for comparison, and short
//! note excerpts, renders them as a prompt, and clips whatever comes back.

use crate::aggregation::{BreakdownCache, EntrySource};
use crate::calendar::{self, day_key};
use crate::errors::DiaryError;
use crate::models::DayRecord;
use crate::roles::{Role, RoleRegistry};
use crate::stats::{Scope, format_average, roll_up};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const PREVIOUS_WEEKS: usize = 3;
pub const NOTE_EXCERPT_CHARS: usize = 120;
pub const MAX_NOTES: usize = 28;
pub const TRUNCATION_MARKER: char = '…';

#[derive(Debug, Clone, Serialize)]
pub struct WeekStats {
    pub week_key: String,
    pub days_recorded: usize,
    pub score_count: u32,
    pub average: Option<f64>,
    pub average_by_role: BTreeMap<Role, Option<f64>>,
    pub thanks_total: u32,
    pub thanks_by_role: BTreeMap<Role, u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteExcerpt {
    pub day_key: String,
    pub role: Role,
    pub author: String,
    pub score: u8,
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklySummaryInput {
    pub week_key: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub stats: WeekStats,
    pub previous_weeks: Vec<WeekStats>,
    pub notes: Vec<NoteExcerpt>,
    pub prompt: String,
}

/// Day-key range a summary for `week_key` needs: the oldest compared week through the target week.
pub fn summary_range(week_key: &str) -> Result<(NaiveDate, NaiveDate), DiaryError> {
    let (_, end) = calendar::week_bounds(week_key)?;
    let mut oldest = week_key.to_string();
    for _ in 0..PREVIOUS_WEEKS {
        oldest = calendar::previous_week_key(&oldest)?;
    }
    let (start, _) = calendar::week_bounds(&oldest)?;
    Ok((start, end))
}

fn week_stats(
    days: &[DayRecord],
    week_key: &str,
    cache: &BreakdownCache,
    source: &dyn EntrySource,
) -> Result<WeekStats, DiaryError> {
    let scope = Scope::week(week_key)?;
    let rolled = roll_up(days, &scope, Role::Master, cache, source);
    Ok(WeekStats {
        week_key: week_key.to_string(),
        days_recorded: rolled.days_matched,
        score_count: rolled.score_count,
        average: rolled.average,
        average_by_role: rolled
            .by_role
            .iter()
            .map(|(role, totals)| (*role, totals.average))
            .collect(),
        thanks_total: rolled.thanks_total,
        thanks_by_role: rolled
            .by_role
            .iter()
            .map(|(role, totals)| (*role, totals.thanks))
            .collect(),
    })
}

pub fn build_weekly_summary_input(
    week_key: &str,
    days: &[DayRecord],
    source: &dyn EntrySource,
    cache: &BreakdownCache,
    registry: &RoleRegistry,
) -> Result<WeeklySummaryInput, DiaryError> {
    let (start_date, end_date) = calendar::week_bounds(week_key)?;
    let stats = week_stats(days, week_key, cache, source)?;

    let mut previous_weeks = Vec::with_capacity(PREVIOUS_WEEKS);
    let mut previous = week_key.to_string();
    for _ in 0..PREVIOUS_WEEKS {
        previous = calendar::previous_week_key(&previous)?;
        previous_weeks.push(week_stats(days, &previous, cache, source)?);
    }

    let mut notes = Vec::new();
    let mut date = start_date;
    while date <= end_date && notes.len() < MAX_NOTES {
        let key = day_key(date);
        for entry in source.entries_for_day(&key)? {
            let Some(score) = entry.score else {
                continue;
            };
            let note = entry.note.trim();
            if note.is_empty() || notes.len() >= MAX_NOTES {
                continue;
            }
            notes.push(NoteExcerpt {
                day_key: key.clone(),
                role: entry.role,
                author: registry.label_for(entry.role).to_string(),
                score,
                note: truncate_comment(note, NOTE_EXCERPT_CHARS),
            });
        }
        date += Duration::days(1);
    }

    let mut input = WeeklySummaryInput {
        week_key: week_key.to_string(),
        start_date,
        end_date,
        stats,
        previous_weeks,
        notes,
        prompt: String::new(),
    };
    input.prompt = build_prompt(&input, registry);
    Ok(input)
}

fn describe_week(out: &mut String, stats: &WeekStats, registry: &RoleRegistry) {
    let _ = write!(
        out,
        "{}: average {} over {} scores, {} thanks",
        stats.week_key,
        format_average(stats.average),
        stats.score_count,
        stats.thanks_total
    );
    for role in Role::ALL {
        let average = stats.average_by_role.get(&role).copied().flatten();
        let thanks = stats.thanks_by_role.get(&role).copied().unwrap_or(0);
        let _ = write!(
            out,
            "; {} average {}, sent {} thanks",
            registry.label_for(role),
            format_average(average),
            thanks
        );
    }
    out.push('\n');
}

pub fn build_prompt(input: &WeeklySummaryInput, registry: &RoleRegistry) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Write a short, warm reflection for a couple on their week {} ({} to {}).",
        input.week_key, input.start_date, input.end_date
    );
    prompt.push_str(
        "Scores run from 1 (bad) to 4 (good). \"-\" means no scores were recorded.\n\n",
    );
    prompt.push_str("This week\n");
    describe_week(&mut prompt, &input.stats, registry);

    if !input.previous_weeks.is_empty() {
        prompt.push_str("\nPrevious weeks\n");
        for week in &input.previous_weeks {
            describe_week(&mut prompt, week, registry);
        }
    }

    if !input.notes.is_empty() {
        prompt.push_str("\nNotes\n");
        for note in &input.notes {
            let _ = writeln!(
                prompt,
                "{} {} ({}): {}",
                note.day_key, note.author, note.score, note.note
            );
        }
    }
    prompt
}

/// Trims `text` and clips it to at most `max_chars` characters, the `…`
/// marking the cut included.
pub fn truncate_comment(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut clipped: String = trimmed.chars().take(max_chars - 1).collect();
    clipped.truncate(clipped.trim_end().len());
    clipped.push(TRUNCATION_MARKER);
    clipped
}
