//! Repository layer — entity-scoped database operations.
//!
//! Free functions over `&Connection`, split into domain sub-modules.
//! All public functions are re-exported here.

mod appointment;
mod reminder;
mod schedule;

pub use appointment::*;
pub use reminder::*;
pub use schedule::*;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use super::DatabaseError;
use crate::config::{DB_DATETIME_FORMAT, DB_DATE_FORMAT, DB_TIME_FORMAT};

pub(crate) fn parse_datetime(value: &str) -> Result<NaiveDateTime, DatabaseError> {
    NaiveDateTime::parse_from_str(value, DB_DATETIME_FORMAT).map_err(|e| {
        DatabaseError::ConstraintViolation(format!("bad datetime '{value}': {e}"))
    })
}

pub(crate) fn parse_date(value: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(value, DB_DATE_FORMAT).map_err(|e| {
        DatabaseError::ConstraintViolation(format!("bad date '{value}': {e}"))
    })
}

pub(crate) fn parse_time(value: &str) -> Result<NaiveTime, DatabaseError> {
    NaiveTime::parse_from_str(value, DB_TIME_FORMAT).map_err(|e| {
        DatabaseError::ConstraintViolation(format!("bad time '{value}': {e}"))
    })
}

pub(crate) fn parse_uuid(value: &str) -> Result<uuid::Uuid, DatabaseError> {
    uuid::Uuid::parse_str(value)
        .map_err(|e| DatabaseError::ConstraintViolation(format!("bad uuid '{value}': {e}")))
}

pub(crate) fn fmt_datetime(value: NaiveDateTime) -> String {
    value.format(DB_DATETIME_FORMAT).to_string()
}

pub(crate) fn fmt_date(value: NaiveDate) -> String {
    value.format(DB_DATE_FORMAT).to_string()
}

pub(crate) fn fmt_time(value: NaiveTime) -> String {
    value.format(DB_TIME_FORMAT).to_string()
}
