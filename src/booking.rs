//! Appointment lifecycle: create, cancel, reschedule, list.
//!
//! Two layers defend a slot against double booking. The service pre-checks
//! availability for a friendly error, and the partial unique index on
//! `appointments(start_at)` closes the remaining race: when two clients
//! confirm the same slot at once, exactly one insert lands and the loser
//! gets [`BookingError::SlotConflict`].

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use regex::Regex;
use rusqlite::Connection;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{BookingConfig, PHONE_PATTERN};
use crate::db::repository;
use crate::db::DatabaseError;
use crate::models::enums::AppointmentStatus;
use crate::models::{Appointment, NewAppointment};
use crate::reminders::ReminderScheduler;
use crate::schedule;

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("appointment {0} not found")]
    NotFound(Uuid),

    #[error("slot {0} is already booked")]
    SlotConflict(NaiveDateTime),

    #[error("schedule misconfigured: {0}")]
    ScheduleMisconfigured(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

pub(crate) fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The pattern is a compile-time constant; it cannot fail to parse.
    RE.get_or_init(|| Regex::new(PHONE_PATTERN).unwrap_or_else(|e| panic!("{e}")))
}

pub struct BookingService {
    conn: Arc<Mutex<Connection>>,
    reminders: Arc<ReminderScheduler>,
    config: BookingConfig,
}

impl BookingService {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        reminders: Arc<ReminderScheduler>,
        config: BookingConfig,
    ) -> Self {
        Self { conn, reminders, config }
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Book a slot. Validates the candidate, re-checks availability at
    /// write time, persists, and arranges the reminders. The unique index
    /// turns a lost race into `SlotConflict` rather than a double booking.
    pub fn create_appointment(
        &self,
        new: NewAppointment,
        now: NaiveDateTime,
    ) -> Result<Appointment, BookingError> {
        let name = new.client_name.trim();
        if name.is_empty() {
            return Err(BookingError::ValidationFailed("client name is empty".into()));
        }
        if !phone_regex().is_match(&new.client_phone) {
            return Err(BookingError::ValidationFailed(format!(
                "phone {:?} does not match the accepted format",
                new.client_phone
            )));
        }
        if new.start_at <= now {
            return Err(BookingError::ValidationFailed(format!(
                "slot {} is in the past",
                new.start_at
            )));
        }

        let appointment = Appointment {
            id: Uuid::new_v4(),
            client_chat_id: new.client_chat_id,
            client_name: name.to_string(),
            client_phone: new.client_phone,
            start_at: new.start_at,
            status: AppointmentStatus::Active,
            created_at: now,
        };

        {
            let conn = self.conn();
            if repository::slot_taken(&conn, appointment.start_at)? {
                return Err(BookingError::SlotConflict(appointment.start_at));
            }
            repository::insert_appointment(&conn, &appointment).map_err(|e| {
                if e.is_constraint_violation() {
                    BookingError::SlotConflict(appointment.start_at)
                } else {
                    e.into()
                }
            })?;
        }

        self.reminders.schedule(&appointment, now)?;
        tracing::info!(
            appointment_id = %appointment.id,
            client_chat_id = appointment.client_chat_id,
            start_at = %appointment.start_at,
            "appointment created"
        );
        Ok(appointment)
    }

    /// Cancel an appointment and its pending reminders. Canceling an
    /// already-canceled appointment is a no-op, not an error; the slot is
    /// released either way.
    pub fn cancel_appointment(&self, id: &Uuid) -> Result<Appointment, BookingError> {
        let mut appointment = {
            let conn = self.conn();
            let Some(app) = repository::get_appointment(&conn, id)? else {
                return Err(BookingError::NotFound(*id));
            };
            if app.status.is_canceled() {
                return Ok(app);
            }
            repository::set_appointment_status(&conn, id, AppointmentStatus::Canceled)?;
            app
        };
        appointment.status = AppointmentStatus::Canceled;

        self.reminders.cancel(id)?;
        tracing::info!(appointment_id = %id, "appointment canceled");
        Ok(appointment)
    }

    /// Move an appointment to a new slot. The move is conflict-checked
    /// first; only after it lands are the old reminders dropped and new
    /// ones arranged, so a failed move leaves everything untouched.
    pub fn reschedule_appointment(
        &self,
        id: &Uuid,
        new_start: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Result<Appointment, BookingError> {
        if new_start <= now {
            return Err(BookingError::ValidationFailed(format!(
                "slot {new_start} is in the past"
            )));
        }

        let mut appointment = {
            let conn = self.conn();
            let Some(app) = repository::get_appointment(&conn, id)? else {
                return Err(BookingError::NotFound(*id));
            };
            if app.status.is_canceled() {
                return Err(BookingError::ValidationFailed(format!(
                    "appointment {id} is canceled and cannot be moved"
                )));
            }
            if new_start != app.start_at {
                if repository::slot_taken(&conn, new_start)? {
                    return Err(BookingError::SlotConflict(new_start));
                }
                repository::set_appointment_start(&conn, id, new_start).map_err(|e| {
                    if e.is_constraint_violation() {
                        BookingError::SlotConflict(new_start)
                    } else {
                        e.into()
                    }
                })?;
            }
            app
        };
        appointment.start_at = new_start;

        self.reminders.cancel(id)?;
        self.reminders.schedule(&appointment, now)?;
        tracing::info!(appointment_id = %id, start_at = %new_start, "appointment rescheduled");
        Ok(appointment)
    }

    pub fn find_by_id(&self, id: &Uuid) -> Result<Option<Appointment>, BookingError> {
        Ok(repository::get_appointment(&self.conn(), id)?)
    }

    // ── Schedule queries ─────────────────────────────────────

    pub fn is_working_day(&self, date: NaiveDate) -> Result<bool, BookingError> {
        Ok(schedule::is_working_day(&self.conn(), date)?)
    }

    pub fn available_slots(
        &self,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<Vec<NaiveDateTime>, BookingError> {
        Ok(schedule::available_slots(&self.conn(), date, now)?)
    }

    /// Dates the date picker offers: today through the booking horizon,
    /// keeping only dates that still have at least one free slot. Today
    /// stays bookable as long as a slot later than `now` remains open.
    pub fn bookable_dates(&self, now: NaiveDateTime) -> Result<Vec<NaiveDate>, BookingError> {
        let conn = self.conn();
        let mut dates = Vec::new();
        for offset in 0..self.config.booking_horizon_days {
            let date = now.date() + TimeDelta::days(offset);
            if !schedule::available_slots(&conn, date, now)?.is_empty() {
                dates.push(date);
            }
        }
        Ok(dates)
    }

    // ── Schedule edits ───────────────────────────────────────

    pub fn update_work_day(
        &self,
        day_of_week: u32,
        open: Option<NaiveTime>,
        close: Option<NaiveTime>,
        is_working: bool,
    ) -> Result<(), BookingError> {
        schedule::update_work_day(&self.conn(), day_of_week, open, close, is_working)
    }

    pub fn set_date_override(
        &self,
        date: NaiveDate,
        open: Option<NaiveTime>,
        close: Option<NaiveTime>,
        is_working: bool,
        reason: Option<String>,
    ) -> Result<(), BookingError> {
        schedule::set_date_override(&self.conn(), date, open, close, is_working, reason)
    }

    pub fn clear_date_override(&self, date: NaiveDate) -> Result<(), BookingError> {
        schedule::clear_date_override(&self.conn(), date)
    }

    pub fn update_lunch_break(
        &self,
        day_of_week: u32,
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
        is_active: bool,
    ) -> Result<(), BookingError> {
        schedule::update_lunch_break(&self.conn(), day_of_week, start, end, is_active)
    }

    // ── Listings ─────────────────────────────────────────────

    /// The client's upcoming appointments: non-canceled and not yet
    /// started, chronological.
    pub fn list_active_for_client(
        &self,
        client_chat_id: i64,
        now: NaiveDateTime,
    ) -> Result<Vec<Appointment>, BookingError> {
        let all = repository::list_appointments_for_client(&self.conn(), client_chat_id)?;
        Ok(all.into_iter().filter(|a| a.is_active_at(now)).collect())
    }

    /// The client's history: elapsed or canceled appointments, most recent
    /// first.
    pub fn list_past_for_client(
        &self,
        client_chat_id: i64,
        now: NaiveDateTime,
    ) -> Result<Vec<Appointment>, BookingError> {
        let all = repository::list_appointments_for_client(&self.conn(), client_chat_id)?;
        let mut past: Vec<_> = all.into_iter().filter(|a| !a.is_active_at(now)).collect();
        past.reverse();
        Ok(past)
    }

    /// Non-canceled appointments starting in `[start, end)`. The operator's
    /// day view.
    pub fn list_active_in_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Appointment>, BookingError> {
        Ok(repository::list_appointments_in_range(&self.conn(), start, end)?)
    }

    pub fn last_appointment(&self, client_chat_id: i64) -> Result<Option<Appointment>, BookingError> {
        Ok(repository::last_appointment_for_client(&self.conn(), client_chat_id)?)
    }

    /// The live appointment blocking a repeat booking, if any: active or
    /// confirmed, starting within the repeat window around `at` (either an
    /// upcoming visit or one inside the last `repeat_window_days`).
    pub fn recent_booking(
        &self,
        client_chat_id: i64,
        at: NaiveDateTime,
    ) -> Result<Option<Appointment>, BookingError> {
        let window_start = at - TimeDelta::days(self.config.repeat_window_days);
        let all = repository::list_appointments_for_client(&self.conn(), client_chat_id)?;
        Ok(all
            .into_iter()
            .filter(|a| {
                matches!(
                    a.status,
                    AppointmentStatus::Active | AppointmentStatus::Confirmed
                )
            })
            .find(|a| a.start_at > window_start))
    }

    pub fn has_recent_booking(
        &self,
        client_chat_id: i64,
        at: NaiveDateTime,
    ) -> Result<bool, BookingError> {
        Ok(self.recent_booking(client_chat_id, at)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::messenger::testing::RecordingMessenger;
    use crate::models::enums::ReminderStatus;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        // Monday 2026-09-07 09:00
        NaiveDate::from_ymd_opt(2026, 9, 7).unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn service() -> (BookingService, Arc<RecordingMessenger>) {
        service_with(BookingConfig::default())
    }

    fn service_with(config: BookingConfig) -> (BookingService, Arc<RecordingMessenger>) {
        let conn = Arc::new(Mutex::new(open_memory_database().unwrap()));
        let messenger = Arc::new(RecordingMessenger::new());
        let reminders = Arc::new(ReminderScheduler::new(conn.clone(), messenger.clone(), 2));
        let service = BookingService::new(conn, reminders, config);
        // Every weekday works 10:00-18:00.
        for dow in 1..=5 {
            service.update_work_day(dow, Some(t(10)), Some(t(18)), true).unwrap();
        }
        (service, messenger)
    }

    fn candidate(chat: i64, start: NaiveDateTime) -> NewAppointment {
        NewAppointment {
            client_chat_id: chat,
            client_name: "Anna".into(),
            client_phone: "+79160000001".into(),
            start_at: start,
        }
    }

    #[tokio::test]
    async fn create_persists_and_schedules_reminders() {
        let (service, _) = service();
        let start = now() + TimeDelta::hours(49);
        let app = service.create_appointment(candidate(100, start), now()).unwrap();

        assert_eq!(app.status, AppointmentStatus::Active);
        let stored = service.find_by_id(&app.id).unwrap().unwrap();
        assert_eq!(stored.start_at, start);

        let reminders = {
            let conn = service.conn();
            repository::list_reminders_for_appointment(&conn, &app.id).unwrap()
        };
        assert_eq!(reminders.len(), 2);
        assert!(reminders.iter().all(|r| r.status == ReminderStatus::Pending));
    }

    #[tokio::test]
    async fn create_rejects_bad_phone_and_empty_name() {
        let (service, _) = service();
        let start = now() + TimeDelta::hours(25);

        let mut bad = candidate(100, start);
        bad.client_phone = "12345".into();
        let err = service.create_appointment(bad, now()).unwrap_err();
        assert!(matches!(err, BookingError::ValidationFailed(_)));

        let mut anon = candidate(100, start);
        anon.client_name = "   ".into();
        let err = service.create_appointment(anon, now()).unwrap_err();
        assert!(matches!(err, BookingError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn taken_slot_is_a_conflict() {
        let (service, _) = service();
        let start = now() + TimeDelta::hours(25);
        service.create_appointment(candidate(100, start), now()).unwrap();

        let err = service.create_appointment(candidate(200, start), now()).unwrap_err();
        assert!(matches!(err, BookingError::SlotConflict(at) if at == start));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_creates_end_with_one_winner() {
        let (service, _) = service();
        let service = Arc::new(service);
        let start = now() + TimeDelta::hours(25);

        let mut handles = Vec::new();
        for chat in [100, 200] {
            let service = service.clone();
            handles.push(std::thread::spawn(move || {
                service.create_appointment(candidate(chat, start), now())
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(BookingError::SlotConflict(_)))));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_frees_the_slot() {
        let (service, _) = service();
        let start = now() + TimeDelta::hours(25);
        let app = service.create_appointment(candidate(100, start), now()).unwrap();

        let canceled = service.cancel_appointment(&app.id).unwrap();
        assert!(canceled.status.is_canceled());
        // Second cancel changes nothing.
        let again = service.cancel_appointment(&app.id).unwrap();
        assert!(again.status.is_canceled());

        // Pending reminders went down with the appointment.
        let reminders = {
            let conn = service.conn();
            repository::list_reminders_for_appointment(&conn, &app.id).unwrap()
        };
        assert!(reminders.iter().all(|r| r.status == ReminderStatus::Canceled));

        // The slot is bookable again.
        service.create_appointment(candidate(200, start), now()).unwrap();
    }

    #[tokio::test]
    async fn cancel_unknown_id_is_not_found() {
        let (service, _) = service();
        let err = service.cancel_appointment(&Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, BookingError::NotFound(_)));
    }

    #[tokio::test]
    async fn reschedule_moves_slot_and_reminders() {
        let (service, _) = service();
        let start = now() + TimeDelta::hours(49);
        let moved = now() + TimeDelta::hours(73);
        let app = service.create_appointment(candidate(100, start), now()).unwrap();

        let updated = service.reschedule_appointment(&app.id, moved, now()).unwrap();
        assert_eq!(updated.start_at, moved);

        let reminders = {
            let conn = service.conn();
            repository::list_reminders_for_appointment(&conn, &app.id).unwrap()
        };
        // Two canceled from the original slot, two pending for the new one.
        let mut pending: Vec<_> = reminders
            .iter()
            .filter(|r| r.status == ReminderStatus::Pending)
            .map(|r| r.due_at)
            .collect();
        pending.sort();
        assert_eq!(pending, vec![moved - TimeDelta::days(1), moved - TimeDelta::hours(2)]);
        assert_eq!(
            reminders.iter().filter(|r| r.status == ReminderStatus::Canceled).count(),
            2
        );
    }

    #[tokio::test]
    async fn reschedule_into_taken_slot_leaves_everything_untouched() {
        let (service, _) = service();
        let start = now() + TimeDelta::hours(25);
        let other = now() + TimeDelta::hours(26);
        let app = service.create_appointment(candidate(100, start), now()).unwrap();
        service.create_appointment(candidate(200, other), now()).unwrap();

        let err = service.reschedule_appointment(&app.id, other, now()).unwrap_err();
        assert!(matches!(err, BookingError::SlotConflict(_)));

        let stored = service.find_by_id(&app.id).unwrap().unwrap();
        assert_eq!(stored.start_at, start);
        let reminders = {
            let conn = service.conn();
            repository::list_reminders_for_appointment(&conn, &app.id).unwrap()
        };
        assert!(reminders.iter().all(|r| r.status == ReminderStatus::Pending));
    }

    #[tokio::test]
    async fn listings_split_upcoming_from_history() {
        let (service, _) = service();
        let upcoming = now() + TimeDelta::hours(25);
        let app = service.create_appointment(candidate(100, upcoming), now()).unwrap();
        let canceled = service
            .create_appointment(candidate(100, now() + TimeDelta::hours(26)), now())
            .unwrap();
        service.cancel_appointment(&canceled.id).unwrap();

        let later = now() + TimeDelta::hours(30);
        let active = service.list_active_for_client(100, now()).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, app.id);

        let past = service.list_past_for_client(100, now()).unwrap();
        assert_eq!(past.len(), 1);
        assert_eq!(past[0].id, canceled.id);

        // Once the appointment has started it moves to history.
        let past_later = service.list_past_for_client(100, later).unwrap();
        assert_eq!(past_later.len(), 2);
        assert!(past_later[0].start_at >= past_later[1].start_at);
    }

    #[tokio::test]
    async fn repeat_window_blocks_only_live_bookings() {
        let (service, _) = service();
        let start = now() + TimeDelta::hours(25);
        let app = service.create_appointment(candidate(100, start), now()).unwrap();

        assert!(service.has_recent_booking(100, now()).unwrap());
        assert!(!service.has_recent_booking(200, now()).unwrap());

        service.cancel_appointment(&app.id).unwrap();
        assert!(!service.has_recent_booking(100, now()).unwrap());
    }

    #[tokio::test]
    async fn repeat_window_length_is_configurable() {
        let config = BookingConfig { repeat_window_days: 1, ..BookingConfig::default() };
        let (service, _) = service_with(config);
        let start = now() + TimeDelta::hours(25);
        service.create_appointment(candidate(100, start), now()).unwrap();

        assert!(service.has_recent_booking(100, now()).unwrap());
        // Two days after the visit the window has passed.
        assert!(!service.has_recent_booking(100, start + TimeDelta::days(2)).unwrap());
    }

    #[tokio::test]
    async fn bookable_dates_start_today_and_skip_non_working_days() {
        let (service, _) = service();
        // Monday 09:00: the day's own slots are all still ahead, so today
        // leads the list; Sat/Sun have no weekly row.
        let dates = service.bookable_dates(now()).unwrap();
        assert_eq!(dates.len(), 5);
        assert_eq!(dates[0], NaiveDate::from_ymd_opt(2026, 9, 7).unwrap());
        assert_eq!(*dates.last().unwrap(), NaiveDate::from_ymd_opt(2026, 9, 11).unwrap());
        assert!(!dates.contains(&NaiveDate::from_ymd_opt(2026, 9, 12).unwrap()));
    }

    #[tokio::test]
    async fn fully_booked_day_is_not_offered() {
        let (service, _) = service();
        // Shrink Tuesday to a single slot and book it.
        let tuesday = NaiveDate::from_ymd_opt(2026, 9, 8).unwrap();
        service.set_date_override(tuesday, Some(t(10)), Some(t(11)), true, None).unwrap();
        service
            .create_appointment(candidate(100, tuesday.and_time(t(10))), now())
            .unwrap();

        let dates = service.bookable_dates(now()).unwrap();
        assert!(!dates.contains(&tuesday));
        assert!(dates.contains(&NaiveDate::from_ymd_opt(2026, 9, 7).unwrap()));
    }
}
