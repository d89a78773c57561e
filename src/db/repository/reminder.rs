use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{fmt_datetime, parse_datetime, parse_uuid};
use crate::db::DatabaseError;
use crate::models::enums::{ReminderKind, ReminderStatus};
use crate::models::Reminder;

pub fn insert_reminder(conn: &Connection, reminder: &Reminder) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO reminders (id, appointment_id, kind, due_at, status)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            reminder.id.to_string(),
            reminder.appointment_id.to_string(),
            reminder.kind.as_str(),
            fmt_datetime(reminder.due_at),
            reminder.status.as_str(),
        ],
    )?;
    Ok(())
}

/// Compare-and-set pending → fired. Returns true when this caller won the
/// transition; false means the reminder was already fired or canceled, and
/// no delivery must happen.
pub fn mark_reminder_fired(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE reminders SET status = 'fired' WHERE id = ?1 AND status = 'pending'",
        params![id.to_string()],
    )?;
    Ok(changed > 0)
}

/// Compare-and-set pending → canceled for a single reminder.
pub fn cancel_reminder_if_pending(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE reminders SET status = 'canceled' WHERE id = ?1 AND status = 'pending'",
        params![id.to_string()],
    )?;
    Ok(changed > 0)
}

/// Cancel every pending reminder of an appointment. Fired or already
/// canceled rows are untouched. Returns the number of rows transitioned.
pub fn cancel_pending_reminders(
    conn: &Connection,
    appointment_id: &Uuid,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE reminders SET status = 'canceled'
         WHERE appointment_id = ?1 AND status = 'pending'",
        params![appointment_id.to_string()],
    )?;
    Ok(changed)
}

/// All pending reminders, soonest first. Used to re-arm timers at startup.
pub fn list_pending_reminders(conn: &Connection) -> Result<Vec<Reminder>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, appointment_id, kind, due_at, status
         FROM reminders WHERE status = 'pending' ORDER BY due_at ASC",
    )?;
    let rows = stmt.query_map([], row_to_raw)?;

    let mut reminders = Vec::new();
    for row in rows {
        reminders.push(reminder_from_row(row?)?);
    }
    Ok(reminders)
}

pub fn list_reminders_for_appointment(
    conn: &Connection,
    appointment_id: &Uuid,
) -> Result<Vec<Reminder>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, appointment_id, kind, due_at, status
         FROM reminders WHERE appointment_id = ?1 ORDER BY due_at ASC",
    )?;
    let rows = stmt.query_map(params![appointment_id.to_string()], row_to_raw)?;

    let mut reminders = Vec::new();
    for row in rows {
        reminders.push(reminder_from_row(row?)?);
    }
    Ok(reminders)
}

struct ReminderRow {
    id: String,
    appointment_id: String,
    kind: String,
    due_at: String,
    status: String,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReminderRow> {
    Ok(ReminderRow {
        id: row.get(0)?,
        appointment_id: row.get(1)?,
        kind: row.get(2)?,
        due_at: row.get(3)?,
        status: row.get(4)?,
    })
}

fn reminder_from_row(row: ReminderRow) -> Result<Reminder, DatabaseError> {
    Ok(Reminder {
        id: parse_uuid(&row.id)?,
        appointment_id: parse_uuid(&row.appointment_id)?,
        kind: ReminderKind::from_str(&row.kind)?,
        due_at: parse_datetime(&row.due_at)?,
        status: ReminderStatus::from_str(&row.status)?,
    })
}
