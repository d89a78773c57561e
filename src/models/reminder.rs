use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ReminderKind, ReminderStatus};

/// A persisted one-shot reminder delivery. Rows survive restarts so pending
/// reminders can be re-armed; status transitions are pending → fired and
/// pending → canceled, both terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub kind: ReminderKind,
    pub due_at: NaiveDateTime,
    pub status: ReminderStatus,
}
