use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// One row of the recurring weekly template (1 = Monday .. 7 = Sunday).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkDay {
    pub day_of_week: u32,
    pub is_working: bool,
    pub open_time: Option<NaiveTime>,
    pub close_time: Option<NaiveTime>,
}

/// A date-specific exception to the weekly template. Takes precedence over
/// `WorkDay` for its date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateOverride {
    pub date: NaiveDate,
    pub is_working: bool,
    pub open_time: Option<NaiveTime>,
    pub close_time: Option<NaiveTime>,
    pub reason: Option<String>,
}

/// Recurring lunch window per weekday. Slots starting inside an active
/// window are not bookable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LunchBreak {
    pub day_of_week: u32,
    pub is_active: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
}
