//! Appointment scheduling and booking engine for a chat-driven salon bot.
//!
//! The crate owns the working-hours calendar, slot availability, the
//! appointment lifecycle with its reminders, and the conversation step
//! machines for clients and operators. The chat transport is a trait
//! ([`messenger::Messenger`]); wiring it to an actual bot API lives in the
//! embedding application.

pub mod booking;
pub mod config;
pub mod conversation;
pub mod db;
pub mod messenger;
pub mod models;
pub mod reminders;
pub mod schedule;
pub mod session;

pub use booking::{BookingError, BookingService};
pub use config::BookingConfig;
pub use conversation::ConversationEngine;
pub use messenger::{Messenger, MessengerError};
pub use reminders::ReminderScheduler;
pub use session::{ConversationSession, MemorySessionStore, SessionStore};

use tracing_subscriber::EnvFilter;

/// Initialize tracing for the embedding application. Honors `RUST_LOG`,
/// falling back to the crate's default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);
}
