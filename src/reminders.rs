//! Timed reminder delivery.
//!
//! Every reminder is a persisted row plus an in-process one-shot timer.
//! Timers enqueue delivery jobs into a fixed-size worker pool; a worker
//! first wins the pending → fired transition in the database and only then
//! talks to the transport, so a reminder canceled while its timer raced is
//! never delivered. Persisted rows survive restarts and are re-armed via
//! [`ReminderScheduler::rearm_pending`]; overdue rows are never caught up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDateTime, TimeDelta};
use rusqlite::Connection;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{DISPLAY_DATE_FORMAT, DISPLAY_TIME_FORMAT};
use crate::db::repository;
use crate::db::DatabaseError;
use crate::messenger::Messenger;
use crate::models::enums::{ReminderKind, ReminderStatus};
use crate::models::{Appointment, Reminder};

/// Delivery queue depth. Deliveries are infrequent; a small buffer only
/// smooths bursts of simultaneously-due timers.
const JOB_QUEUE_DEPTH: usize = 64;

struct DeliveryJob {
    reminder_id: Uuid,
    chat_id: i64,
    text: String,
}

pub struct ReminderScheduler {
    conn: Arc<Mutex<Connection>>,
    jobs: mpsc::Sender<DeliveryJob>,
    /// Live timer handles per appointment, aborted on cancel.
    timers: Mutex<HashMap<Uuid, Vec<JoinHandle<()>>>>,
    runtime: tokio::runtime::Handle,
}

impl ReminderScheduler {
    /// Spawn the worker pool and return the scheduler. Must be called from
    /// within a tokio runtime; the captured handle lets synchronous booking
    /// code register timers later.
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        messenger: Arc<dyn Messenger>,
        workers: usize,
    ) -> Self {
        let (jobs, rx) = mpsc::channel(JOB_QUEUE_DEPTH);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let runtime = tokio::runtime::Handle::current();

        for worker in 0..workers.max(1) {
            runtime.spawn(worker_loop(
                worker,
                rx.clone(),
                conn.clone(),
                messenger.clone(),
            ));
        }

        Self {
            conn,
            jobs,
            timers: Mutex::new(HashMap::new()),
            runtime,
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock only means another holder panicked; the
        // connection itself remains usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arrange the day-before and two-hours-before deliveries for an
    /// appointment. Targets already in the past are silently skipped — no
    /// catch-up delivery. Never blocks beyond registering the timers.
    pub fn schedule(
        &self,
        appointment: &Appointment,
        now: NaiveDateTime,
    ) -> Result<(), DatabaseError> {
        let targets = [
            (ReminderKind::DayBefore, appointment.start_at - TimeDelta::days(1)),
            (ReminderKind::TwoHoursBefore, appointment.start_at - TimeDelta::hours(2)),
        ];

        for (kind, due_at) in targets {
            if due_at <= now {
                tracing::debug!(
                    appointment_id = %appointment.id,
                    kind = kind.as_str(),
                    "reminder target already past, skipping"
                );
                continue;
            }

            let reminder = Reminder {
                id: Uuid::new_v4(),
                appointment_id: appointment.id,
                kind,
                due_at,
                status: ReminderStatus::Pending,
            };
            repository::insert_reminder(&self.conn(), &reminder)?;

            self.arm(
                reminder.id,
                appointment.id,
                appointment.client_chat_id,
                appointment.start_at,
                kind,
                due_at,
                now,
            );
        }
        Ok(())
    }

    /// Cancel every pending delivery of an appointment. Safe when the
    /// timers already fired, were canceled before, or were never armed.
    pub fn cancel(&self, appointment_id: &Uuid) -> Result<usize, DatabaseError> {
        let handles = {
            let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
            timers.remove(appointment_id)
        };
        if let Some(handles) = handles {
            for handle in handles {
                handle.abort();
            }
        }

        let canceled = repository::cancel_pending_reminders(&self.conn(), appointment_id)?;
        if canceled > 0 {
            tracing::info!(%appointment_id, canceled, "pending reminders canceled");
        }
        Ok(canceled)
    }

    /// Re-arm persisted pending reminders after a restart. Future targets
    /// get fresh timers; overdue or orphaned rows are marked canceled (no
    /// catch-up delivery). Returns the number of timers armed.
    pub fn rearm_pending(&self, now: NaiveDateTime) -> Result<usize, DatabaseError> {
        let pending = repository::list_pending_reminders(&self.conn())?;

        let mut armed = 0;
        for reminder in pending {
            if reminder.due_at <= now {
                repository::cancel_reminder_if_pending(&self.conn(), &reminder.id)?;
                tracing::warn!(
                    reminder_id = %reminder.id,
                    due_at = %reminder.due_at,
                    "overdue reminder dropped at startup"
                );
                continue;
            }

            let appointment = repository::get_appointment(&self.conn(), &reminder.appointment_id)?;
            match appointment {
                Some(app) if !app.status.is_canceled() => {
                    self.arm(
                        reminder.id,
                        app.id,
                        app.client_chat_id,
                        app.start_at,
                        reminder.kind,
                        reminder.due_at,
                        now,
                    );
                    armed += 1;
                }
                _ => {
                    repository::cancel_reminder_if_pending(&self.conn(), &reminder.id)?;
                    tracing::warn!(
                        reminder_id = %reminder.id,
                        appointment_id = %reminder.appointment_id,
                        "pending reminder without live appointment dropped"
                    );
                }
            }
        }

        if armed > 0 {
            tracing::info!(armed, "pending reminders re-armed");
        }
        Ok(armed)
    }

    #[allow(clippy::too_many_arguments)]
    fn arm(
        &self,
        reminder_id: Uuid,
        appointment_id: Uuid,
        chat_id: i64,
        start_at: NaiveDateTime,
        kind: ReminderKind,
        due_at: NaiveDateTime,
        now: NaiveDateTime,
    ) {
        let delay = (due_at - now).to_std().unwrap_or_default();
        let jobs = self.jobs.clone();
        let text = reminder_text(kind, start_at);

        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let job = DeliveryJob { reminder_id, chat_id, text };
            if jobs.send(job).await.is_err() {
                tracing::warn!(%reminder_id, "delivery queue closed before reminder fired");
            }
        });

        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        // Fired timers leave finished handles behind; sweep them so the
        // registry stays bounded by the number of live reminders.
        timers.retain(|_, handles| {
            handles.retain(|h| !h.is_finished());
            !handles.is_empty()
        });
        timers.entry(appointment_id).or_default().push(handle);
    }

    #[cfg(test)]
    fn tracked_appointments(&self) -> usize {
        self.timers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handles) in timers.drain() {
            for handle in handles {
                handle.abort();
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<DeliveryJob>>>,
    conn: Arc<Mutex<Connection>>,
    messenger: Arc<dyn Messenger>,
) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else { break };

        // Win the pending → fired transition before touching the transport:
        // a reminder canceled while its timer raced must never deliver.
        let won = {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            repository::mark_reminder_fired(&guard, &job.reminder_id)
        };

        match won {
            Ok(true) => match messenger.send_text(job.chat_id, &job.text) {
                Ok(_) => tracing::info!(
                    reminder_id = %job.reminder_id,
                    chat_id = job.chat_id,
                    "reminder delivered"
                ),
                // Failures are isolated per reminder: the sibling reminder
                // and the appointment itself are untouched.
                Err(e) => tracing::warn!(
                    reminder_id = %job.reminder_id,
                    chat_id = job.chat_id,
                    error = %e,
                    "reminder delivery failed"
                ),
            },
            Ok(false) => tracing::debug!(
                reminder_id = %job.reminder_id,
                "reminder no longer pending, delivery skipped"
            ),
            Err(e) => tracing::warn!(
                reminder_id = %job.reminder_id,
                error = %e,
                "reminder state check failed"
            ),
        }
    }
    tracing::debug!(worker, "reminder worker stopped");
}

fn reminder_text(kind: ReminderKind, start_at: NaiveDateTime) -> String {
    let date = start_at.format(DISPLAY_DATE_FORMAT);
    let time = start_at.format(DISPLAY_TIME_FORMAT);
    match kind {
        ReminderKind::DayBefore => {
            format!("Reminder: you have an appointment tomorrow, {date} at {time}.")
        }
        ReminderKind::TwoHoursBefore => {
            format!("Reminder: your appointment starts in 2 hours, {date} at {time}.")
        }
    }
}
