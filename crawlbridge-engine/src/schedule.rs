//! Weekly hour-slot scheduling.
//!
//! A schedule is a comma-separated set of slots like `"sat-03,sun-14"`:
//! a lowercase 3-letter weekday, a hyphen, and a 2-digit hour 00–23. The
//! wait calculation is unconditional: a schedule containing the current
//! slot means "run now", an empty schedule means "effectively never".

use chrono::{Datelike, Local, Timelike};
use std::collections::HashSet;

const DAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// Hours in one week: the walk bound for the wait calculation.
const HOURS_PER_WEEK: i64 = 24 * 7;

/// "Effectively never": the wait returned for an empty schedule.
pub const NEVER_WAIT_HOURS: i64 = 24 * 36500;

/// Normalizes a slot: trimmed, lowercased, single-digit hours padded
/// (`"sat-3"` becomes `"sat-03"`).
pub fn normalize_slot(slot: &str) -> String {
    let slot = slot.trim().to_lowercase();
    if slot.len() == 5 && slot.as_bytes()[3] == b'-' {
        format!("{}-0{}", &slot[..3], &slot[4..])
    } else {
        slot
    }
}

fn parse_slot(slot: &str) -> Option<(usize, u32)> {
    let (day_str, hour_str) = slot.split_once('-')?;
    let day = DAYS.iter().position(|d| *d == day_str)?;
    let hour: u32 = hour_str.parse().ok()?;
    if hour > 23 {
        return None;
    }
    Some((day, hour))
}

fn format_slot(day: usize, hour: u32) -> String {
    format!("{}-{hour:02}", DAYS[day % DAYS.len()])
}

/// Advances a slot one hour, wrapping the weekday at hour 23.
/// Unparseable slots are returned unchanged.
pub fn next_slot(slot: &str) -> String {
    match parse_slot(&normalize_slot(slot)) {
        Some((day, 23)) => format_slot(day + 1, 0),
        Some((day, hour)) => format_slot(day, hour + 1),
        None => slot.to_string(),
    }
}

/// Hours to wait from `current_slot` until the schedule permits a run.
///
/// Empty schedule: [`NEVER_WAIT_HOURS`]. Current slot in the set: 0.
/// Otherwise the hour-by-hour walk forward, bounded at one week.
pub fn wait_hours(current_slot: &str, schedule: &str) -> i64 {
    let slots: HashSet<String> = schedule
        .split(',')
        .map(normalize_slot)
        .filter(|s| !s.is_empty())
        .collect();
    if slots.is_empty() {
        return NEVER_WAIT_HOURS;
    }

    let mut slot = normalize_slot(current_slot);
    if slots.contains(&slot) {
        return 0;
    }
    for hours in 1..=HOURS_PER_WEEK {
        slot = next_slot(&slot);
        if slots.contains(&slot) {
            return hours;
        }
    }
    NEVER_WAIT_HOURS
}

/// The slot for the local wall-clock time right now.
pub fn current_slot() -> String {
    let now = Local::now();
    format_slot(now.weekday().num_days_from_monday() as usize, now.hour())
}
