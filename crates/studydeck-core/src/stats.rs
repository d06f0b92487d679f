//! Dashboard numbers derived from store records.
//!
//! A record with an unexpected shape contributes zero and is logged; the
//! dashboard never fails because one record is off.

use chrono::{Days, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::catalog::{TIME_COUNTERS, keys};
use crate::error::SyncError;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total_seconds: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub completed_days: usize,
    pub completed_lessons: usize,
    pub contacts: usize,
    pub conversations: usize,
    pub messages: usize,
    pub mastered_grammar: usize,
    pub vocabulary: u64,
}

/// Compute the dashboard summary as of `today`.
///
/// # Errors
///
/// Returns [`SyncError::StorageRead`] if the store cannot be read. Corrupt
/// individual records count as absent.
pub fn compute(store: &dyn Store, today: NaiveDate) -> Result<DashboardStats, SyncError> {
    let mut stats = DashboardStats::default();

    for key in TIME_COUNTERS {
        if let Some(value) = read(store, key)? {
            let seconds = value.as_u64().unwrap_or_else(|| {
                tracing::warn!(key, "counter is not a non-negative integer");
                0
            });
            stats.total_seconds = stats.total_seconds.saturating_add(seconds);
        }
    }

    let done = read(store, keys::CALENDAR)?
        .map(|calendar| completed_dates(&calendar))
        .unwrap_or_default();
    stats.completed_days = done.len();
    stats.current_streak = current_streak(&done, today);
    stats.longest_streak = longest_streak(&done);

    stats.completed_lessons = read(store, keys::COMPLETED_LESSONS)?
        .and_then(|lessons| lessons.as_array().map(Vec::len))
        .unwrap_or_default();
    stats.contacts = read(store, keys::CONTACTS)?
        .map(|contacts| entries(&contacts).len())
        .unwrap_or_default();
    stats.mastered_grammar = read(store, keys::GRAMMAR_MASTERY)?
        .map(|grammar| {
            entries(&grammar)
                .into_iter()
                .filter(|entry| entry.get("mastered").and_then(Value::as_bool) == Some(true))
                .count()
        })
        .unwrap_or_default();
    stats.vocabulary = read(store, keys::PROGRESS_STATS)?
        .and_then(|progress| progress.get("vocabularyCount").and_then(Value::as_u64))
        .unwrap_or_default();

    let all_keys = store.keys().map_err(|source| SyncError::StorageRead {
        key: "*".to_string(),
        source,
    })?;
    for key in all_keys.iter().filter(|k| k.starts_with(keys::CHAT_PREFIX)) {
        let count = read(store, key)?
            .and_then(|transcript| transcript.as_array().map(Vec::len))
            .unwrap_or_default();
        if count > 0 {
            stats.conversations += 1;
            stats.messages += count;
        }
    }

    tracing::debug!(?stats, %today, "dashboard stats computed");
    Ok(stats)
}

fn read(store: &dyn Store, key: &str) -> Result<Option<Value>, SyncError> {
    match store.get(key) {
        Ok(value) => Ok(value),
        Err(err @ StoreError::Corrupt { .. }) => {
            tracing::warn!(key, error = %err, "ignoring unreadable record");
            Ok(None)
        }
        Err(source) => Err(SyncError::StorageRead {
            key: key.to_string(),
            source,
        }),
    }
}

/// Entries of an id-keyed collection in either of its shapes.
fn entries(value: &Value) -> Vec<&Value> {
    match value {
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().collect(),
        _ => Vec::new(),
    }
}

fn completed_dates(calendar: &Value) -> BTreeSet<NaiveDate> {
    let Some(map) = calendar.as_object() else {
        tracing::warn!("calendar is not an object");
        return BTreeSet::new();
    };
    map.iter()
        .filter(|(_, flag)| flag.as_bool() == Some(true))
        .filter_map(|(date, _)| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
        .collect()
}

fn run_ending_at(done: &BTreeSet<NaiveDate>, mut day: NaiveDate) -> u32 {
    let mut run = 0;
    while done.contains(&day) {
        run += 1;
        match day.checked_sub_days(Days::new(1)) {
            Some(previous) => day = previous,
            None => break,
        }
    }
    run
}

/// Consecutive completed days ending today, or ending yesterday if today is
/// not marked yet.
fn current_streak(done: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    if done.contains(&today) {
        return run_ending_at(done, today);
    }
    today
        .checked_sub_days(Days::new(1))
        .map_or(0, |yesterday| run_ending_at(done, yesterday))
}

fn longest_streak(done: &BTreeSet<NaiveDate>) -> u32 {
    let mut longest = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;
    for &day in done {
        let continues = previous
            .and_then(|p| p.checked_add_days(Days::new(1)))
            .is_some_and(|next| next == day);
        run = if continues { run + 1 } else { 1 };
        longest = longest.max(run);
        previous = Some(day);
    }
    longest
}
