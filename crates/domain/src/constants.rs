//! Engine constants
//!
//! Values fixed by the Google Calendar API or by the sync contract. Tunables
//! live in [`crate::config`].

/// Google Calendar v3 REST base.
pub const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Google OAuth token endpoint used for refresh grants.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Private extended property carrying the appointment id on pushed events.
pub const APPOINTMENT_ID_PROPERTY: &str = "appointmentId";

/// Push notification headers sent by Google.
pub const HEADER_CHANNEL_ID: &str = "x-goog-channel-id";
pub const HEADER_RESOURCE_ID: &str = "x-goog-resource-id";
pub const HEADER_RESOURCE_STATE: &str = "x-goog-resource-state";
pub const HEADER_MESSAGE_NUMBER: &str = "x-goog-message-number";
pub const HEADER_CHANNEL_TOKEN: &str = "x-goog-channel-token";

/// Page size requested from `events.list`.
pub const EVENTS_PAGE_SIZE: u32 = 250;

/// Hard cap on pages followed in one listing, guarding against a provider
/// that keeps returning page tokens.
pub const MAX_LIST_PAGES: usize = 50;

/// Default bulk sync window around "now".
pub const BULK_SYNC_LOOKBACK_DAYS: i64 = 30;
pub const BULK_SYNC_LOOKAHEAD_DAYS: i64 = 90;

/// Window used by the status view for "recent" counters.
pub const STATUS_RECENT_WINDOW_HOURS: i64 = 24;
