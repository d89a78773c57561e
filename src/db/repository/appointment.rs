use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{fmt_datetime, parse_datetime, parse_uuid};
use crate::db::DatabaseError;
use crate::models::enums::AppointmentStatus;
use crate::models::Appointment;

/// Insert a new appointment row. A non-canceled row already occupying the
/// same start time makes this fail with a constraint violation (partial
/// unique index `idx_appointments_slot`).
pub fn insert_appointment(conn: &Connection, app: &Appointment) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO appointments (id, client_chat_id, client_name, client_phone, start_at, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            app.id.to_string(),
            app.client_chat_id,
            app.client_name,
            app.client_phone,
            fmt_datetime(app.start_at),
            app.status.as_str(),
            fmt_datetime(app.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_appointment(conn: &Connection, id: &Uuid) -> Result<Option<Appointment>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, client_chat_id, client_name, client_phone, start_at, status, created_at
         FROM appointments WHERE id = ?1",
        params![id.to_string()],
        row_to_raw,
    );

    match result {
        Ok(raw) => Ok(Some(appointment_from_row(raw)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn set_appointment_status(
    conn: &Connection,
    id: &Uuid,
    status: AppointmentStatus,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE appointments SET status = ?2 WHERE id = ?1",
        params![id.to_string(), status.as_str()],
    )?;
    Ok(changed)
}

/// Move an appointment to a new start time. Subject to the same slot
/// uniqueness as insertion.
pub fn set_appointment_start(
    conn: &Connection,
    id: &Uuid,
    start_at: NaiveDateTime,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE appointments SET start_at = ?2 WHERE id = ?1",
        params![id.to_string(), fmt_datetime(start_at)],
    )?;
    Ok(changed)
}

/// True when a non-canceled appointment already occupies the slot.
pub fn slot_taken(conn: &Connection, start_at: NaiveDateTime) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM appointments WHERE start_at = ?1 AND status != 'canceled'",
        params![fmt_datetime(start_at)],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// All appointments of one client, chronological.
pub fn list_appointments_for_client(
    conn: &Connection,
    client_chat_id: i64,
) -> Result<Vec<Appointment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, client_chat_id, client_name, client_phone, start_at, status, created_at
         FROM appointments WHERE client_chat_id = ?1 ORDER BY start_at ASC",
    )?;
    let rows = stmt.query_map(params![client_chat_id], row_to_raw)?;

    let mut appointments = Vec::new();
    for row in rows {
        appointments.push(appointment_from_row(row?)?);
    }
    Ok(appointments)
}

/// Non-canceled appointments with start time in `[start, end)`, chronological.
pub fn list_appointments_in_range(
    conn: &Connection,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<Appointment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, client_chat_id, client_name, client_phone, start_at, status, created_at
         FROM appointments
         WHERE status != 'canceled' AND start_at >= ?1 AND start_at < ?2
         ORDER BY start_at ASC",
    )?;
    let rows = stmt.query_map(params![fmt_datetime(start), fmt_datetime(end)], row_to_raw)?;

    let mut appointments = Vec::new();
    for row in rows {
        appointments.push(appointment_from_row(row?)?);
    }
    Ok(appointments)
}

/// The client's most recent appointment by start time, any status.
pub fn last_appointment_for_client(
    conn: &Connection,
    client_chat_id: i64,
) -> Result<Option<Appointment>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, client_chat_id, client_name, client_phone, start_at, status, created_at
         FROM appointments WHERE client_chat_id = ?1
         ORDER BY start_at DESC LIMIT 1",
        params![client_chat_id],
        row_to_raw,
    );

    match result {
        Ok(raw) => Ok(Some(appointment_from_row(raw)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

struct AppointmentRow {
    id: String,
    client_chat_id: i64,
    client_name: String,
    client_phone: String,
    start_at: String,
    status: String,
    created_at: String,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<AppointmentRow> {
    Ok(AppointmentRow {
        id: row.get(0)?,
        client_chat_id: row.get(1)?,
        client_name: row.get(2)?,
        client_phone: row.get(3)?,
        start_at: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn appointment_from_row(row: AppointmentRow) -> Result<Appointment, DatabaseError> {
    Ok(Appointment {
        id: parse_uuid(&row.id)?,
        client_chat_id: row.client_chat_id,
        client_name: row.client_name,
        client_phone: row.client_phone,
        start_at: parse_datetime(&row.start_at)?,
        status: AppointmentStatus::from_str(&row.status)?,
        created_at: parse_datetime(&row.created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::NaiveDate;

    fn dt(y: i32, mo: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn make(chat: i64, start: NaiveDateTime, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            client_chat_id: chat,
            client_name: "Anna".into(),
            client_phone: "+79160000001".into(),
            start_at: start,
            status,
            created_at: dt(2026, 9, 1, 9),
        }
    }

    #[test]
    fn insert_and_retrieve_roundtrip() {
        let conn = open_memory_database().unwrap();
        let app = make(100, dt(2026, 9, 7, 14), AppointmentStatus::Active);
        insert_appointment(&conn, &app).unwrap();

        let stored = get_appointment(&conn, &app.id).unwrap().unwrap();
        assert_eq!(stored.client_chat_id, 100);
        assert_eq!(stored.start_at, dt(2026, 9, 7, 14));
        assert_eq!(stored.status, AppointmentStatus::Active);
    }

    #[test]
    fn second_insert_for_same_slot_is_rejected() {
        let conn = open_memory_database().unwrap();
        insert_appointment(&conn, &make(100, dt(2026, 9, 7, 14), AppointmentStatus::Active)).unwrap();

        let err = insert_appointment(&conn, &make(101, dt(2026, 9, 7, 14), AppointmentStatus::Active))
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn canceled_row_releases_the_slot() {
        let conn = open_memory_database().unwrap();
        let first = make(100, dt(2026, 9, 7, 14), AppointmentStatus::Active);
        insert_appointment(&conn, &first).unwrap();
        set_appointment_status(&conn, &first.id, AppointmentStatus::Canceled).unwrap();

        assert!(!slot_taken(&conn, dt(2026, 9, 7, 14)).unwrap());
        insert_appointment(&conn, &make(101, dt(2026, 9, 7, 14), AppointmentStatus::Active)).unwrap();
    }

    #[test]
    fn client_list_is_chronological() {
        let conn = open_memory_database().unwrap();
        insert_appointment(&conn, &make(100, dt(2026, 9, 9, 11), AppointmentStatus::Active)).unwrap();
        insert_appointment(&conn, &make(100, dt(2026, 9, 7, 14), AppointmentStatus::Canceled)).unwrap();
        insert_appointment(&conn, &make(200, dt(2026, 9, 8, 10), AppointmentStatus::Active)).unwrap();

        let mine = list_appointments_for_client(&conn, 100).unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine[0].start_at < mine[1].start_at);
    }

    #[test]
    fn range_list_excludes_canceled_and_out_of_range() {
        let conn = open_memory_database().unwrap();
        insert_appointment(&conn, &make(100, dt(2026, 9, 7, 14), AppointmentStatus::Active)).unwrap();
        insert_appointment(&conn, &make(101, dt(2026, 9, 7, 15), AppointmentStatus::Canceled)).unwrap();
        insert_appointment(&conn, &make(102, dt(2026, 9, 8, 10), AppointmentStatus::Active)).unwrap();

        let day = list_appointments_in_range(&conn, dt(2026, 9, 7, 0), dt(2026, 9, 8, 0)).unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].client_chat_id, 100);
    }

    #[test]
    fn last_appointment_picks_latest_start() {
        let conn = open_memory_database().unwrap();
        assert!(last_appointment_for_client(&conn, 100).unwrap().is_none());

        insert_appointment(&conn, &make(100, dt(2026, 9, 7, 14), AppointmentStatus::Canceled)).unwrap();
        insert_appointment(&conn, &make(100, dt(2026, 9, 9, 11), AppointmentStatus::Active)).unwrap();

        let last = last_appointment_for_client(&conn, 100).unwrap().unwrap();
        assert_eq!(last.start_at, dt(2026, 9, 9, 11));
    }
}
