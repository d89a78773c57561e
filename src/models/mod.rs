//! Domain entities, one file per entity plus shared string-backed enums.

pub mod enums;

mod appointment;
mod reminder;
mod schedule;

pub use appointment::*;
pub use reminder::*;
pub use schedule::*;
