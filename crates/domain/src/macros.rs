//! Macro for the string conversions of persisted enums
//!
//! Every enum that lands in a TEXT column (sync direction, log status, retry
//! status, ...) needs the same three things: a stable lowercase string, a
//! `Display` impl and a case-insensitive `FromStr`. This macro generates all
//! three from one mapping table.
//!
//! # Example
//!
//! ```rust
//! use calsync_domain::impl_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum ChannelState {
//!     Active,
//!     Stopped,
//! }
//!
//! impl_status_conversions!(ChannelState {
//!     Active => "active",
//!     Stopped => "stopped",
//! });
//!
//! assert_eq!(ChannelState::Stopped.as_str(), "stopped");
//! ```

/// Implements `as_str`, `Display` and `FromStr` for persisted enums.
#[macro_export]
macro_rules! impl_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Stable string form used in storage and logs.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum ResourceKind {
        Event,
        Calendar,
        FailedPermanently,
    }

    impl_status_conversions!(ResourceKind {
        Event => "event",
        Calendar => "calendar",
        FailedPermanently => "failed_permanently",
    });

    #[test]
    fn display_uses_mapping() {
        assert_eq!(ResourceKind::Event.to_string(), "event");
        assert_eq!(ResourceKind::FailedPermanently.to_string(), "failed_permanently");
    }

    #[test]
    fn parsing_ignores_case() {
        assert_eq!(ResourceKind::from_str("CALENDAR").unwrap(), ResourceKind::Calendar);
        assert_eq!(
            ResourceKind::from_str("Failed_Permanently").unwrap(),
            ResourceKind::FailedPermanently
        );
    }

    #[test]
    fn parsing_rejects_unknown_values() {
        let err = ResourceKind::from_str("attendee").unwrap_err();
        assert!(err.contains("Invalid ResourceKind: attendee"));
        assert!(ResourceKind::from_str("").is_err());
    }
}
