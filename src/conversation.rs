//! Dialog engine over the booking service.
//!
//! Each chat advances through a small step machine kept in the session
//! store: date, then time, then name, then phone for clients; operators
//! have their own steps for booking on a client's behalf and editing the
//! schedule. Events arrive already classified (a picked date, a picked
//! time, free text) and carry an explicit `now`. Outbound delivery
//! failures are logged and never abort a flow.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use crate::booking::{phone_regex, BookingError, BookingService};
use crate::config::{
    BookingConfig, DB_DATE_FORMAT, DB_TIME_FORMAT, DISPLAY_DATE_FORMAT, DISPLAY_TIME_FORMAT,
};
use crate::messenger::Messenger;
use crate::models::enums::{OperatorStep, UserStep};
use crate::models::NewAppointment;
use crate::session::{ConversationSession, SessionStore};

pub struct ConversationEngine {
    booking: Arc<BookingService>,
    sessions: Arc<dyn SessionStore>,
    messenger: Arc<dyn Messenger>,
    config: BookingConfig,
}

impl ConversationEngine {
    pub fn new(
        booking: Arc<BookingService>,
        sessions: Arc<dyn SessionStore>,
        messenger: Arc<dyn Messenger>,
        config: BookingConfig,
    ) -> Self {
        Self { booking, sessions, messenger, config }
    }

    fn session(&self, chat_id: i64) -> ConversationSession<'_> {
        ConversationSession::new(self.sessions.as_ref(), chat_id, self.config.session_ttl)
    }

    /// Send, logging failures instead of propagating them. A chat that
    /// cannot be reached must not wedge the flow.
    fn send(&self, chat_id: i64, text: &str) -> Option<i64> {
        match self.messenger.send_text(chat_id, text) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(chat_id, error = %e, "outbound message failed");
                None
            }
        }
    }

    /// Refresh the chat's single menu message in place where possible.
    fn show_menu(&self, session: &ConversationSession<'_>, chat_id: i64, text: &str) {
        let previous = session.pending_message_id();
        match self.messenger.edit_or_resend(chat_id, previous, text) {
            Ok(id) => session.set_pending_message_id(id),
            Err(e) => tracing::warn!(chat_id, error = %e, "menu update failed"),
        }
    }

    // ── Client flow ──────────────────────────────────────────

    /// Entry point: offer the bookable dates and wait for a pick.
    pub fn start_booking(&self, chat_id: i64, now: NaiveDateTime) -> Result<(), BookingError> {
        let session = self.session(chat_id);
        session.clear();
        session.set_user_step(UserStep::AwaitingDate);

        let dates = self.booking.bookable_dates(now)?;
        self.show_menu(&session, chat_id, &dates_prompt(&dates));
        Ok(())
    }

    /// A date was picked: show its free times, or ask for another date.
    pub fn handle_date_picked(
        &self,
        chat_id: i64,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<(), BookingError> {
        let session = self.session(chat_id);
        let slots = self.booking.available_slots(date, now)?;
        if slots.is_empty() {
            self.show_menu(
                &session,
                chat_id,
                &format!(
                    "No free times on {}. Choose another date.",
                    date.format(DISPLAY_DATE_FORMAT)
                ),
            );
            return Ok(());
        }

        let times: Vec<String> = slots
            .iter()
            .map(|s| s.format(DISPLAY_TIME_FORMAT).to_string())
            .collect();
        self.show_menu(
            &session,
            chat_id,
            &format!(
                "Free times on {}:\n{}",
                date.format(DISPLAY_DATE_FORMAT),
                times.join("  ")
            ),
        );
        Ok(())
    }

    /// A time was picked. Operators staging a booking move on to the client
    /// name; clients are checked against the repeat window first, and a
    /// retry after a slot conflict reuses the contact details already given.
    pub fn handle_time_picked(
        &self,
        chat_id: i64,
        slot: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Result<(), BookingError> {
        let session = self.session(chat_id);

        if session.operator_step() == Some(OperatorStep::AwaitingDate) {
            session.set_pending_date(slot);
            session.set_operator_step(OperatorStep::AwaitingName);
            self.send(chat_id, "Client name?");
            return Ok(());
        }

        if let Some(existing) = self.booking.recent_booking(chat_id, now)? {
            self.send(
                chat_id,
                &format!(
                    "You already have an appointment on {}. One booking per {} days.",
                    format_slot(existing.start_at),
                    self.config.repeat_window_days
                ),
            );
            session.clear();
            return Ok(());
        }

        // Contact details survive a slot conflict: a returning pick books
        // straight away.
        if let (Some(name), Some(phone)) = (session.pending_name(), session.pending_phone()) {
            let candidate = NewAppointment {
                client_chat_id: chat_id,
                client_name: name,
                client_phone: phone,
                start_at: slot,
            };
            return self.finalize(&session, chat_id, candidate, now);
        }

        session.set_pending_date(slot);
        session.set_user_step(UserStep::AwaitingName);
        self.send(chat_id, "Your name?");
        Ok(())
    }

    /// Free-text dispatch. Operator steps take precedence so an operator
    /// mid-edit is never mistaken for a client typing a name.
    pub fn handle_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        now: NaiveDateTime,
    ) -> Result<(), BookingError> {
        let session = self.session(chat_id);
        let text = text.trim();

        if let Some(step) = session.operator_step() {
            return self.handle_operator_text(&session, chat_id, step, text, now);
        }

        match session.user_step() {
            Some(UserStep::AwaitingName) => {
                // The name message is removed to keep the chat a single
                // menu exchange.
                if let Err(e) = self.messenger.delete(chat_id, message_id) {
                    tracing::debug!(chat_id, message_id, error = %e, "could not delete reply");
                }
                session.set_pending_name(text);
                session.set_user_step(UserStep::AwaitingPhone);
                self.send(chat_id, "Your phone number? (+7 or 8 and ten digits)");
                Ok(())
            }
            Some(UserStep::AwaitingPhone) => {
                if !phone_regex().is_match(text) {
                    self.send(
                        chat_id,
                        "That does not look like a phone number. \
                         Use +7 or 8 followed by ten digits.",
                    );
                    return Ok(());
                }
                session.set_pending_phone(text);

                let Some(start_at) = session.pending_date() else {
                    session.clear();
                    self.send(chat_id, "This booking expired. Start again.");
                    return Ok(());
                };
                let candidate = NewAppointment {
                    client_chat_id: chat_id,
                    client_name: session.pending_name().unwrap_or_default(),
                    client_phone: text.to_string(),
                    start_at,
                };
                self.finalize(&session, chat_id, candidate, now)
            }
            _ => {
                tracing::debug!(chat_id, "text outside any flow ignored");
                Ok(())
            }
        }
    }

    /// Create the appointment and close the flow. A lost race sends the
    /// client back to date selection with their contact details intact.
    fn finalize(
        &self,
        session: &ConversationSession<'_>,
        chat_id: i64,
        candidate: NewAppointment,
        now: NaiveDateTime,
    ) -> Result<(), BookingError> {
        match self.booking.create_appointment(candidate, now) {
            Ok(app) => {
                self.send(chat_id, &format!("Booked: {}. See you!", format_slot(app.start_at)));
                session.clear();
                Ok(())
            }
            Err(BookingError::SlotConflict(at)) => {
                tracing::info!(chat_id, slot = %at, "slot lost while confirming, restarting date pick");
                session.clear_pending_date();
                session.set_user_step(UserStep::AwaitingDate);
                let dates = self.booking.bookable_dates(now)?;
                self.send(
                    chat_id,
                    &format!("That time was just taken. {}", dates_prompt(&dates)),
                );
                Ok(())
            }
            Err(BookingError::ValidationFailed(reason)) => {
                tracing::warn!(chat_id, reason, "booking rejected");
                session.clear();
                self.send(chat_id, "This booking could not be completed. Start again.");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel one of the client's own upcoming appointments.
    pub fn cancel_appointment(
        &self,
        chat_id: i64,
        appointment_id: &Uuid,
        now: NaiveDateTime,
    ) -> Result<(), BookingError> {
        let Some(app) = self.booking.find_by_id(appointment_id)? else {
            self.send(chat_id, "That appointment no longer exists.");
            return Ok(());
        };
        if app.client_chat_id != chat_id {
            tracing::warn!(chat_id, appointment_id = %appointment_id, "cancel for foreign appointment refused");
            self.send(chat_id, "That appointment no longer exists.");
            return Ok(());
        }
        if !app.is_active_at(now) {
            self.send(chat_id, "That appointment can no longer be canceled.");
            return Ok(());
        }

        self.booking.cancel_appointment(appointment_id)?;
        self.send(
            chat_id,
            &format!("Appointment on {} canceled.", format_slot(app.start_at)),
        );
        Ok(())
    }

    /// Paged view over elapsed and canceled appointments, newest first. An
    /// out-of-range page clamps to the last one.
    pub fn show_history(
        &self,
        chat_id: i64,
        page: usize,
        now: NaiveDateTime,
    ) -> Result<(), BookingError> {
        let session = self.session(chat_id);
        let past = self.booking.list_past_for_client(chat_id, now)?;
        if past.is_empty() {
            self.show_menu(&session, chat_id, "No past appointments yet.");
            return Ok(());
        }

        let page_size = self.config.history_page_size.max(1);
        let pages = past.len().div_ceil(page_size);
        let page = page.min(pages - 1);
        session.set_history_page(page);

        let lines: Vec<String> = past
            .iter()
            .skip(page * page_size)
            .take(page_size)
            .map(|a| {
                let mark = if a.status.is_canceled() { " (canceled)" } else { "" };
                format!("{}{}", format_slot(a.start_at), mark)
            })
            .collect();
        self.show_menu(
            &session,
            chat_id,
            &format!("Your visits, page {}/{}:\n{}", page + 1, pages, lines.join("\n")),
        );
        Ok(())
    }

    /// Drop the chat's flow state without booking anything.
    pub fn abandon(&self, chat_id: i64) {
        self.session(chat_id).clear();
        self.send(chat_id, "Booking canceled.");
    }

    // ── Operator flow ────────────────────────────────────────

    /// Book on a client's behalf: ask whose chat this booking is for.
    pub fn start_operator_booking(&self, chat_id: i64) {
        let session = self.session(chat_id);
        session.clear();
        session.set_operator_step(OperatorStep::AwaitingClient);
        self.send(chat_id, "Client chat id?");
    }

    /// Edit the weekly template: `<day 1-7> <open> <close>` or `<day> off`.
    pub fn start_work_day_edit(&self, chat_id: i64) {
        let session = self.session(chat_id);
        session.clear();
        session.set_operator_step(OperatorStep::EditingWorkDay);
        self.send(chat_id, "Send: <day 1-7> <open HH:MM> <close HH:MM>, or <day> off");
    }

    /// Edit a single date: `YYYY-MM-DD <open> <close>` or `YYYY-MM-DD off [reason]`.
    pub fn start_override_edit(&self, chat_id: i64) {
        let session = self.session(chat_id);
        session.clear();
        session.set_operator_step(OperatorStep::EditingOverride);
        self.send(chat_id, "Send: <YYYY-MM-DD> <open HH:MM> <close HH:MM>, or <YYYY-MM-DD> off [reason]");
    }

    fn handle_operator_text(
        &self,
        session: &ConversationSession<'_>,
        chat_id: i64,
        step: OperatorStep,
        text: &str,
        now: NaiveDateTime,
    ) -> Result<(), BookingError> {
        match step {
            OperatorStep::AwaitingClient => {
                let Ok(client) = text.parse::<i64>() else {
                    self.send(chat_id, "A chat id is a number. Try again.");
                    return Ok(());
                };
                session.set_pending_client(client);
                session.set_operator_step(OperatorStep::AwaitingDate);
                let dates = self.booking.bookable_dates(now)?;
                self.show_menu(session, chat_id, &dates_prompt(&dates));
                Ok(())
            }
            OperatorStep::AwaitingDate => {
                self.send(chat_id, "Pick a date and time from the menu first.");
                Ok(())
            }
            OperatorStep::AwaitingName => {
                session.set_pending_name(text);
                session.set_operator_step(OperatorStep::AwaitingPhone);
                self.send(chat_id, "Client phone number?");
                Ok(())
            }
            OperatorStep::AwaitingPhone => {
                if !phone_regex().is_match(text) {
                    self.send(chat_id, "Use +7 or 8 followed by ten digits.");
                    return Ok(());
                }
                let (Some(client), Some(start_at)) =
                    (session.pending_client(), session.pending_date())
                else {
                    session.clear();
                    self.send(chat_id, "This booking expired. Start again.");
                    return Ok(());
                };
                let candidate = NewAppointment {
                    client_chat_id: client,
                    client_name: session.pending_name().unwrap_or_default(),
                    client_phone: text.to_string(),
                    start_at,
                };
                match self.booking.create_appointment(candidate, now) {
                    Ok(app) => {
                        self.send(
                            chat_id,
                            &format!("Booked for client {}: {}.", client, format_slot(app.start_at)),
                        );
                        session.clear();
                        Ok(())
                    }
                    Err(BookingError::SlotConflict(_)) => {
                        session.clear_pending_date();
                        session.set_operator_step(OperatorStep::AwaitingDate);
                        let dates = self.booking.bookable_dates(now)?;
                        self.send(
                            chat_id,
                            &format!("That time was just taken. {}", dates_prompt(&dates)),
                        );
                        Ok(())
                    }
                    Err(BookingError::ValidationFailed(reason)) => {
                        self.send(chat_id, &format!("Rejected: {reason}"));
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            OperatorStep::EditingWorkDay => {
                match parse_work_day_command(text) {
                    Ok((dow, open, close, working)) => {
                        match self.booking.update_work_day(dow, open, close, working) {
                            Ok(()) => {
                                session.clear_operator_step();
                                self.send(chat_id, "Weekly schedule updated.");
                            }
                            Err(e) => {
                                self.send(chat_id, &format!("Rejected: {e}"));
                            }
                        }
                    }
                    Err(reason) => {
                        self.send(chat_id, &format!("Could not read that: {reason}"));
                    }
                }
                Ok(())
            }
            OperatorStep::EditingOverride => {
                match parse_override_command(text) {
                    Ok((date, open, close, working, reason)) => {
                        match self.booking.set_date_override(date, open, close, working, reason) {
                            Ok(()) => {
                                session.clear_operator_step();
                                self.send(chat_id, "Date override set.");
                            }
                            Err(e) => {
                                self.send(chat_id, &format!("Rejected: {e}"));
                            }
                        }
                    }
                    Err(reason) => {
                        self.send(chat_id, &format!("Could not read that: {reason}"));
                    }
                }
                Ok(())
            }
        }
    }
}

fn format_slot(at: NaiveDateTime) -> String {
    format!(
        "{} at {}",
        at.format(DISPLAY_DATE_FORMAT),
        at.format(DISPLAY_TIME_FORMAT)
    )
}

fn dates_prompt(dates: &[NaiveDate]) -> String {
    if dates.is_empty() {
        return "No dates are open for booking right now.".to_string();
    }
    let list: Vec<String> = dates
        .iter()
        .map(|d| d.format(DISPLAY_DATE_FORMAT).to_string())
        .collect();
    format!("Choose a date:\n{}", list.join("\n"))
}

type WorkDayEdit = (u32, Option<NaiveTime>, Option<NaiveTime>, bool);

fn parse_work_day_command(text: &str) -> Result<WorkDayEdit, String> {
    let mut parts = text.split_whitespace();
    let day: u32 = parts
        .next()
        .ok_or("empty command")?
        .parse()
        .map_err(|_| "the day must be a number 1-7".to_string())?;

    match parts.next() {
        Some("off") => Ok((day, None, None, false)),
        Some(open) => {
            let close = parts.next().ok_or("missing close time")?;
            let open = parse_time(open)?;
            let close = parse_time(close)?;
            Ok((day, Some(open), Some(close), true))
        }
        None => Err("expected opening hours or 'off'".to_string()),
    }
}

type OverrideEdit = (NaiveDate, Option<NaiveTime>, Option<NaiveTime>, bool, Option<String>);

fn parse_override_command(text: &str) -> Result<OverrideEdit, String> {
    let mut parts = text.split_whitespace();
    let date = parts.next().ok_or("empty command")?;
    let date = NaiveDate::parse_from_str(date, DB_DATE_FORMAT)
        .map_err(|_| format!("{date:?} is not a YYYY-MM-DD date"))?;

    match parts.next() {
        Some("off") => {
            let rest: Vec<&str> = parts.collect();
            let reason = (!rest.is_empty()).then(|| rest.join(" "));
            Ok((date, None, None, false, reason))
        }
        Some(open) => {
            let close = parts.next().ok_or("missing close time")?;
            let open = parse_time(open)?;
            let close = parse_time(close)?;
            let rest: Vec<&str> = parts.collect();
            let reason = (!rest.is_empty()).then(|| rest.join(" "));
            Ok((date, Some(open), Some(close), true, reason))
        }
        None => Err("expected opening hours or 'off'".to_string()),
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw, DB_TIME_FORMAT).map_err(|_| format!("{raw:?} is not HH:MM"))
}
