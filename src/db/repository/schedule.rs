use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection};

use super::{fmt_date, fmt_time, parse_date, parse_time};
use crate::db::DatabaseError;
use crate::models::{DateOverride, LunchBreak, WorkDay};

// ─── Weekly template ──────────────────────────────────────────────────────────

pub fn upsert_work_day(conn: &Connection, day: &WorkDay) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO work_days (day_of_week, is_working, open_time, close_time)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (day_of_week) DO UPDATE
         SET is_working = ?2, open_time = ?3, close_time = ?4",
        params![
            day.day_of_week,
            day.is_working,
            day.open_time.map(fmt_time),
            day.close_time.map(fmt_time),
        ],
    )?;
    Ok(())
}

pub fn work_day(conn: &Connection, day_of_week: u32) -> Result<Option<WorkDay>, DatabaseError> {
    let result = conn.query_row(
        "SELECT day_of_week, is_working, open_time, close_time
         FROM work_days WHERE day_of_week = ?1",
        params![day_of_week],
        |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        },
    );

    match result {
        Ok((dow, is_working, open, close)) => Ok(Some(WorkDay {
            day_of_week: dow,
            is_working,
            open_time: open.as_deref().map(parse_time).transpose()?,
            close_time: close.as_deref().map(parse_time).transpose()?,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_work_days(conn: &Connection) -> Result<Vec<WorkDay>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT day_of_week, is_working, open_time, close_time
         FROM work_days ORDER BY day_of_week ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, u32>(0)?,
            row.get::<_, bool>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
        ))
    })?;

    let mut days = Vec::new();
    for row in rows {
        let (dow, is_working, open, close) = row?;
        days.push(WorkDay {
            day_of_week: dow,
            is_working,
            open_time: open.as_deref().map(parse_time).transpose()?,
            close_time: close.as_deref().map(parse_time).transpose()?,
        });
    }
    Ok(days)
}

// ─── Date overrides ───────────────────────────────────────────────────────────

pub fn upsert_date_override(conn: &Connection, ov: &DateOverride) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO date_overrides (date, is_working, open_time, close_time, reason)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (date) DO UPDATE
         SET is_working = ?2, open_time = ?3, close_time = ?4, reason = ?5",
        params![
            fmt_date(ov.date),
            ov.is_working,
            ov.open_time.map(fmt_time),
            ov.close_time.map(fmt_time),
            ov.reason,
        ],
    )?;
    Ok(())
}

pub fn date_override(
    conn: &Connection,
    date: NaiveDate,
) -> Result<Option<DateOverride>, DatabaseError> {
    let result = conn.query_row(
        "SELECT date, is_working, open_time, close_time, reason
         FROM date_overrides WHERE date = ?1",
        params![fmt_date(date)],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        },
    );

    match result {
        Ok((date, is_working, open, close, reason)) => Ok(Some(DateOverride {
            date: parse_date(&date)?,
            is_working,
            open_time: open.as_deref().map(parse_time).transpose()?,
            close_time: close.as_deref().map(parse_time).transpose()?,
            reason,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn delete_date_override(conn: &Connection, date: NaiveDate) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM date_overrides WHERE date = ?1",
        params![fmt_date(date)],
    )?;
    Ok(changed)
}

// ─── Lunch breaks ─────────────────────────────────────────────────────────────

pub fn upsert_lunch_break(conn: &Connection, lunch: &LunchBreak) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO lunch_breaks (day_of_week, is_active, start_time, end_time)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (day_of_week) DO UPDATE
         SET is_active = ?2, start_time = ?3, end_time = ?4",
        params![
            lunch.day_of_week,
            lunch.is_active,
            lunch.start_time.map(fmt_time),
            lunch.end_time.map(fmt_time),
        ],
    )?;
    Ok(())
}

pub fn lunch_break(
    conn: &Connection,
    day_of_week: u32,
) -> Result<Option<LunchBreak>, DatabaseError> {
    let result = conn.query_row(
        "SELECT day_of_week, is_active, start_time, end_time
         FROM lunch_breaks WHERE day_of_week = ?1",
        params![day_of_week],
        |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        },
    );

    match result {
        Ok((dow, is_active, start, end)) => Ok(Some(LunchBreak {
            day_of_week: dow,
            is_active,
            start_time: start.as_deref().map(parse_time).transpose()?,
            end_time: end.as_deref().map(parse_time).transpose()?,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
