//! Appointment and external event read models

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_status_conversions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Cancelled,
    Deleted,
}

impl_status_conversions!(AppointmentStatus {
    Scheduled => "scheduled",
    Cancelled => "cancelled",
    Deleted => "deleted",
});

/// Appointment as seen through the booking store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub operator_id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Active appointments must have a matching calendar event.
    pub fn is_active(&self) -> bool {
        self.status == AppointmentStatus::Scheduled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalEventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

impl_status_conversions!(ExternalEventStatus {
    Confirmed => "confirmed",
    Tentative => "tentative",
    Cancelled => "cancelled",
});

/// Calendar event as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEvent {
    pub id: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub status: ExternalEventStatus,
    pub updated_at: DateTime<Utc>,
    /// Set on events this engine pushed.
    pub appointment_id: Option<String>,
}

impl ExternalEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status == ExternalEventStatus::Cancelled
    }

    /// True when the event already carries exactly the payload's data.
    pub fn matches(&self, payload: &EventPayload) -> bool {
        self.summary == payload.summary
            && normalize(self.description.as_deref()) == normalize(payload.description.as_deref())
            && normalize(self.location.as_deref()) == normalize(payload.location.as_deref())
            && self.starts_at.map(whole_seconds) == Some(whole_seconds(payload.starts_at))
            && self.ends_at.map(whole_seconds) == Some(whole_seconds(payload.ends_at))
    }
}

/// Event times are stored by the provider at second precision.
fn whole_seconds(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.trunc_subsecs(0)
}

fn normalize(value: Option<&str>) -> &str {
    value.map_or("", str::trim)
}

/// Event body written to the provider, derived from an appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub appointment_id: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl From<&Appointment> for EventPayload {
    fn from(appointment: &Appointment) -> Self {
        Self {
            appointment_id: appointment.id.clone(),
            summary: appointment.title.clone(),
            description: appointment.description.clone(),
            location: appointment.location.clone(),
            starts_at: whole_seconds(appointment.starts_at),
            ends_at: whole_seconds(appointment.ends_at),
        }
    }
}

/// How to list upstream events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventQuery {
    /// Only changes since the given sync token.
    Incremental { sync_token: String },
    /// Everything overlapping a time window, deleted events included.
    Window { from: DateTime<Utc>, to: DateTime<Utc> },
}

/// One listing pass, all pages merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventChanges {
    pub events: Vec<ExternalEvent>,
    pub next_sync_token: Option<String>,
}
