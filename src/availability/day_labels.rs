//! Turns a raw calendar snapshot into times per date.
//!
//! The vendor prints relative day headings ("Hoy", "Mañana", "Esta semana")
//! above blocks of time buttons, but the buttons carry no date. Headings are
//! detected in page text, then the buttons are split into days by DOM order:
//! whenever the hour does not increase, the next heading starts.

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::configuration::types::DayLabel;
use crate::site::types::CalendarSnapshot;

/// Times shown on one court's calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "times", rename_all = "snake_case")]
pub enum CourtAvailability {
    ByDate(BTreeMap<NaiveDate, Vec<String>>),
    /// No day heading was recognized; the times cannot be tied to a date.
    Flat(Vec<String>),
}

impl CourtAvailability {
    pub fn is_empty(&self) -> bool {
        match self {
            CourtAvailability::ByDate(dates) => dates.values().all(Vec::is_empty),
            CourtAvailability::Flat(times) => times.is_empty(),
        }
    }

    /// Whether `time` is shown for `date`. Flat listings match any date.
    pub fn offers(&self, date: NaiveDate, time: NaiveTime) -> bool {
        let label = time.format("%H:%M").to_string();
        let matches = |times: &Vec<String>| times.iter().any(|t| same_time(t, &label));
        match self {
            CourtAvailability::ByDate(dates) => dates.get(&date).is_some_and(matches),
            CourtAvailability::Flat(times) => matches(times),
        }
    }

    /// Every `(date, time)` pair, in date then DOM order. Empty for flat listings.
    pub fn dated_slots(&self) -> Vec<(NaiveDate, String)> {
        match self {
            CourtAvailability::ByDate(dates) => dates
                .iter()
                .flat_map(|(date, times)| times.iter().map(move |t| (*date, t.clone())))
                .collect(),
            CourtAvailability::Flat(_) => Vec::new(),
        }
    }
}

/// Labels present in `text`, kept in configuration order.
pub fn detect_days<'a>(text: &str, labels: &'a [DayLabel]) -> Vec<&'a DayLabel> {
    let lowered = text.to_lowercase();
    labels
        .iter()
        .filter(|label| label.patterns.iter().any(|p| lowered.contains(p.as_str())))
        .collect()
}

fn hour_of(time: &str) -> u32 {
    match time.trim().split(':').next().map(str::parse::<u32>) {
        Some(Ok(hour)) => hour,
        _ => {
            warn!("Could not read an hour from time label '{}'", time);
            0
        }
    }
}

/// Splits `times` (DOM order) into `days` groups. A time whose hour is not
/// after the previous one starts the next group, except in the last group.
pub fn group_by_order(times: &[String], days: usize) -> Vec<Vec<String>> {
    if times.is_empty() || days == 0 {
        return Vec::new();
    }
    let mut groups = vec![Vec::new(); days];
    let mut current = 0;
    let mut previous: Option<u32> = None;
    for time in times {
        let hour = hour_of(time);
        if previous.is_some_and(|p| hour <= p) && current < days - 1 {
            current += 1;
        }
        groups[current].push(time.trim().to_string());
        previous = Some(hour);
    }
    groups
}

fn parse_time(label: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(label.trim(), "%H:%M").ok()
}

fn same_time(a: &str, b: &str) -> bool {
    match (parse_time(a), parse_time(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

/// Interprets a snapshot relative to `now`.
///
/// Labels that map to the same date are merged. Times already past on
/// today's date are dropped.
pub fn availability_from_snapshot(
    snapshot: &CalendarSnapshot,
    labels: &[DayLabel],
    now: NaiveDateTime,
) -> CourtAvailability {
    let days = detect_days(&snapshot.text, labels);
    if days.is_empty() {
        debug!("No day heading recognized, returning {} times flat", snapshot.times.len());
        return CourtAvailability::Flat(snapshot.times.iter().map(|t| t.trim().to_string()).collect());
    }

    let today = now.date();
    let mut by_date: BTreeMap<NaiveDate, Vec<String>> = BTreeMap::new();
    for (label, times) in days.iter().zip(group_by_order(&snapshot.times, days.len())) {
        let Some(date) = shift(today, label.offset_days) else {
            warn!("Day offset {} out of range, skipping", label.offset_days);
            continue;
        };
        let entry = by_date.entry(date).or_default();
        for time in times {
            if !entry.contains(&time) {
                entry.push(time);
            }
        }
    }

    if let Some(times) = by_date.get_mut(&today) {
        times.retain(|t| parse_time(t).is_none_or(|time| time > now.time()));
    }
    CourtAvailability::ByDate(by_date)
}

fn shift(date: NaiveDate, offset_days: i64) -> Option<NaiveDate> {
    if offset_days >= 0 {
        date.checked_add_days(Days::new(offset_days as u64))
    } else {
        date.checked_sub_days(Days::new(offset_days.unsigned_abs()))
    }
}
