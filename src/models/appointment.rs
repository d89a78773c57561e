use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::AppointmentStatus;

/// A booked (or canceled) time slot. Never hard-deleted: history is derived
/// from `status` plus elapsed time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    /// Chat of the client who owns the appointment.
    pub client_chat_id: i64,
    pub client_name: String,
    pub client_phone: String,
    /// Slot start. Slot granularity is one hour.
    pub start_at: NaiveDateTime,
    pub status: AppointmentStatus,
    pub created_at: NaiveDateTime,
}

impl Appointment {
    /// Non-canceled and not yet started.
    pub fn is_active_at(&self, now: NaiveDateTime) -> bool {
        !self.status.is_canceled() && self.start_at > now
    }
}

/// Candidate assembled by the booking dialog before persistence.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub client_chat_id: i64,
    pub client_name: String,
    pub client_phone: String,
    pub start_at: NaiveDateTime,
}
