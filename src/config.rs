use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "aura-booking";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Storage format for timestamps (matches SQLite TEXT columns).
pub const DB_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Storage format for calendar dates.
pub const DB_DATE_FORMAT: &str = "%Y-%m-%d";
/// Storage format for times of day.
pub const DB_TIME_FORMAT: &str = "%H:%M";

/// Client-facing date format (dd.MM.yyyy).
pub const DISPLAY_DATE_FORMAT: &str = "%d.%m.%Y";
/// Client-facing time format.
pub const DISPLAY_TIME_FORMAT: &str = "%H:%M";

/// Accepted phone numbers: +7 or 8 followed by exactly ten digits.
pub const PHONE_PATTERN: &str = r"^(\+7|8)\d{10}$";

/// Default log filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    format!("{}=info", APP_NAME.replace('-', "_"))
}

/// Engine tunables. `Default` gives the production values; tests override
/// individual fields.
#[derive(Debug, Clone)]
pub struct BookingConfig {
    /// Slot granularity in minutes. Slots are whole hours.
    pub slot_minutes: i64,
    /// A client may not book again within this many days of an existing
    /// active appointment.
    pub repeat_window_days: i64,
    /// How many days ahead the date selection offers.
    pub booking_horizon_days: i64,
    /// Size of the reminder delivery worker pool.
    pub reminder_workers: usize,
    /// Conversation state retention. Abandoned sessions expire after this.
    pub session_ttl: Duration,
    /// Appointments per page in the history view.
    pub history_page_size: usize,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            slot_minutes: 60,
            repeat_window_days: 7,
            booking_horizon_days: 7,
            reminder_workers: 4,
            session_ttl: Duration::from_secs(24 * 60 * 60),
            history_page_size: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_values() {
        let config = BookingConfig::default();
        assert_eq!(config.slot_minutes, 60);
        assert_eq!(config.repeat_window_days, 7);
        assert_eq!(config.reminder_workers, 4);
        assert_eq!(config.session_ttl, Duration::from_secs(86_400));
        assert_eq!(config.history_page_size, 5);
    }

    #[test]
    fn phone_pattern_accepts_both_prefixes() {
        let re = regex::Regex::new(PHONE_PATTERN).unwrap();
        assert!(re.is_match("+79161234567"));
        assert!(re.is_match("89161234567"));
        assert!(!re.is_match("79161234567"));
        assert!(!re.is_match("8916123456"));
        assert!(!re.is_match("+7916123456789"));
    }
}
