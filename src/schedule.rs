//! Working-hours resolution and slot generation.
//!
//! A calendar date resolves through two tables: a date-specific override
//! wins over the recurring weekly template; a missing weekday row means
//! non-working. Slots are whole hours over the half-open window
//! `[open, close)` — the closing hour itself is never offered as a start
//! time.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use rusqlite::Connection;

use crate::booking::BookingError;
use crate::db::repository;
use crate::db::DatabaseError;
use crate::models::{DateOverride, LunchBreak, WorkDay};

/// Whether the date is a working day. Override precedence: a date override
/// answers alone; otherwise the weekly template row for the weekday.
pub fn is_working_day(conn: &Connection, date: NaiveDate) -> Result<bool, DatabaseError> {
    if let Some(ov) = repository::date_override(conn, date)? {
        return Ok(ov.is_working);
    }
    let dow = date.weekday().number_from_monday();
    Ok(repository::work_day(conn, dow)?.is_some_and(|day| day.is_working))
}

/// Open/close times for the date, or `None` on non-working days.
///
/// A row flagged working but missing either time is partial data: it is
/// treated as non-working and logged, never surfaced as an error.
pub fn work_hours(
    conn: &Connection,
    date: NaiveDate,
) -> Result<Option<(NaiveTime, NaiveTime)>, DatabaseError> {
    if let Some(ov) = repository::date_override(conn, date)? {
        if !ov.is_working {
            return Ok(None);
        }
        return Ok(resolve_hours(date, ov.open_time, ov.close_time));
    }

    let dow = date.weekday().number_from_monday();
    match repository::work_day(conn, dow)? {
        Some(day) if day.is_working => Ok(resolve_hours(date, day.open_time, day.close_time)),
        _ => Ok(None),
    }
}

fn resolve_hours(
    date: NaiveDate,
    open: Option<NaiveTime>,
    close: Option<NaiveTime>,
) -> Option<(NaiveTime, NaiveTime)> {
    match (open, close) {
        (Some(open), Some(close)) if open < close => Some((open, close)),
        _ => {
            tracing::warn!(%date, "working day without resolvable hours, treating as non-working");
            None
        }
    }
}

/// Bookable start times for the date, chronological. Empty on non-working
/// days. Excludes slots not strictly after `now`, slots starting inside an
/// active lunch window, and slots already occupied by a non-canceled
/// appointment. Side-effect-free; recomputed on every call.
pub fn available_slots(
    conn: &Connection,
    date: NaiveDate,
    now: NaiveDateTime,
) -> Result<Vec<NaiveDateTime>, DatabaseError> {
    let Some((open, close)) = work_hours(conn, date)? else {
        return Ok(Vec::new());
    };

    let lunch = repository::lunch_break(conn, date.weekday().number_from_monday())?;

    let mut slots = Vec::new();
    let mut current = date.and_time(open);
    let end = date.and_time(close);

    while current < end {
        if current > now
            && !starts_during_lunch(lunch.as_ref(), current.time())
            && !repository::slot_taken(conn, current)?
        {
            slots.push(current);
        }
        current += TimeDelta::hours(1);
    }
    Ok(slots)
}

/// A slot is skipped only when its start falls inside the lunch window:
/// lunch 14:00–15:00 drops the 14:00 slot but keeps 13:00 and 15:00.
fn starts_during_lunch(lunch: Option<&LunchBreak>, slot_start: NaiveTime) -> bool {
    let Some(lunch) = lunch else { return false };
    if !lunch.is_active {
        return false;
    }
    match (lunch.start_time, lunch.end_time) {
        (Some(start), Some(end)) => slot_start >= start && slot_start < end,
        _ => false,
    }
}

// ─── Administrative edits ─────────────────────────────────────────────────────

/// Update the weekly template for one weekday. Marking a day working
/// requires coherent hours; marking it non-working clears them.
pub fn update_work_day(
    conn: &Connection,
    day_of_week: u32,
    open: Option<NaiveTime>,
    close: Option<NaiveTime>,
    is_working: bool,
) -> Result<(), BookingError> {
    if !(1..=7).contains(&day_of_week) {
        return Err(BookingError::ValidationFailed(format!(
            "day of week {day_of_week} out of range 1-7"
        )));
    }
    let (open_time, close_time) = if is_working {
        match (open, close) {
            (Some(open), Some(close)) if open < close => (Some(open), Some(close)),
            _ => {
                return Err(BookingError::ScheduleMisconfigured(format!(
                    "working day {day_of_week} needs open < close"
                )))
            }
        }
    } else {
        (None, None)
    };

    repository::upsert_work_day(conn, &WorkDay {
        day_of_week,
        is_working,
        open_time,
        close_time,
    })?;
    tracing::info!(day_of_week, is_working, "weekly schedule updated");
    Ok(())
}

/// Create or replace a date override. A non-working override with no times
/// and no prior row is not persisted — it would only restate the template.
pub fn set_date_override(
    conn: &Connection,
    date: NaiveDate,
    open: Option<NaiveTime>,
    close: Option<NaiveTime>,
    is_working: bool,
    reason: Option<String>,
) -> Result<(), BookingError> {
    if is_working {
        match (open, close) {
            (Some(open), Some(close)) if open < close => {}
            _ => {
                return Err(BookingError::ScheduleMisconfigured(format!(
                    "working override for {date} needs open < close"
                )))
            }
        }
    } else if open.is_none() && close.is_none() && repository::date_override(conn, date)?.is_none()
    {
        // Day off with nothing to record beyond the flag: only persist when
        // replacing an existing override.
        if reason.is_none() {
            return Ok(());
        }
    }

    repository::upsert_date_override(conn, &DateOverride {
        date,
        is_working,
        open_time: if is_working { open } else { None },
        close_time: if is_working { close } else { None },
        reason,
    })?;
    tracing::info!(%date, is_working, "date override set");
    Ok(())
}

pub fn clear_date_override(conn: &Connection, date: NaiveDate) -> Result<(), BookingError> {
    repository::delete_date_override(conn, date)?;
    Ok(())
}

/// Update the recurring lunch window for one weekday. Deactivating clears
/// its times.
pub fn update_lunch_break(
    conn: &Connection,
    day_of_week: u32,
    start: Option<NaiveTime>,
    end: Option<NaiveTime>,
    is_active: bool,
) -> Result<(), BookingError> {
    if !(1..=7).contains(&day_of_week) {
        return Err(BookingError::ValidationFailed(format!(
            "day of week {day_of_week} out of range 1-7"
        )));
    }
    let (start_time, end_time) = if is_active {
        match (start, end) {
            (Some(start), Some(end)) if start < end => (Some(start), Some(end)),
            _ => {
                return Err(BookingError::ScheduleMisconfigured(format!(
                    "lunch break for day {day_of_week} needs start < end"
                )))
            }
        }
    } else {
        (None, None)
    };

    repository::upsert_lunch_break(conn, &LunchBreak {
        day_of_week,
        is_active,
        start_time,
        end_time,
    })?;
    Ok(())
}
