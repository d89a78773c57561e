use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(AppointmentStatus {
    Active => "active",
    Pending => "pending",
    Confirmed => "confirmed",
    Canceled => "canceled",
});

impl AppointmentStatus {
    /// Canceled appointments release their slot and receive no reminders.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

str_enum!(ReminderKind {
    DayBefore => "day_before",
    TwoHoursBefore => "two_hours_before",
});

str_enum!(ReminderStatus {
    Pending => "pending",
    Fired => "fired",
    Canceled => "canceled",
});

/// Steps of the client booking dialog. Stored in the session store as the
/// string tag; absence of a tag means the chat is idle.
str_enum!(UserStep {
    AwaitingDate => "awaiting_date",
    AwaitingName => "awaiting_name",
    AwaitingPhone => "awaiting_phone",
});

/// Steps of the operator dialog: the booking flow with a leading
/// target-client step, plus the schedule editing steps.
str_enum!(OperatorStep {
    AwaitingClient => "op_awaiting_client",
    AwaitingDate => "op_awaiting_date",
    AwaitingName => "op_awaiting_name",
    AwaitingPhone => "op_awaiting_phone",
    EditingWorkDay => "op_editing_work_day",
    EditingOverride => "op_editing_override",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_roundtrip() {
        for status in [
            AppointmentStatus::Active,
            AppointmentStatus::Pending,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Canceled,
        ] {
            assert_eq!(AppointmentStatus::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = AppointmentStatus::from_str("deleted").unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidEnum { .. }));
    }

    #[test]
    fn only_canceled_is_canceled() {
        assert!(AppointmentStatus::Canceled.is_canceled());
        assert!(!AppointmentStatus::Active.is_canceled());
        assert!(!AppointmentStatus::Confirmed.is_canceled());
    }
}
