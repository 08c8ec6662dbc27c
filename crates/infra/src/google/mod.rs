//! Google Calendar integration
//!
//! - [`oauth`]: refresh-token grant
//! - [`pacing`]: per-connection spacing and quota accounting
//! - [`http`]: retrying, rate-limited transport
//! - [`client`]: the `CalendarApi` implementation

pub mod client;
pub mod http;
pub mod oauth;
pub mod pacing;

pub use client::GoogleCalendarClient;
pub use http::{ProviderResponse, RateLimitedHttp, RateLimitedHttpBuilder};
pub use oauth::{GoogleTokenRefresher, RefreshedToken, TokenRefresher};
pub use pacing::{QuotaCounter, RequestPacer};
