//! Transport collaborator. The engine composes plain text and records
//! message ids; rendering, keyboards, and the actual chat protocol live
//! outside this crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessengerError {
    #[error("recipient {0} unreachable: {1}")]
    Unreachable(i64, String),

    #[error("message {0} not found")]
    UnknownMessage(i64),
}

/// Outbound messaging seam. Implementations must be cheap to call from
/// async worker tasks; delivery failures are reported, never panicked.
pub trait Messenger: Send + Sync {
    /// Send a new message, returning its id.
    fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, MessengerError>;

    /// Edit an existing message in place, or send a new one when there is
    /// nothing to edit. Returns the id of the resulting message.
    fn edit_or_resend(
        &self,
        chat_id: i64,
        message_id: Option<i64>,
        text: &str,
    ) -> Result<i64, MessengerError>;

    /// Delete a message. Deleting an already-gone message is a no-op for
    /// callers; implementations may report `UnknownMessage`.
    fn delete(&self, chat_id: i64, message_id: i64) -> Result<(), MessengerError>;
}
