//! Appointment ↔ external event link

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_status_conversions;

/// Which side created the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Appointment pushed to the calendar.
    Push,
    /// Existing calendar event adopted for an appointment.
    Pull,
}

impl_status_conversions!(SyncDirection {
    Push => "push",
    Pull => "pull",
});

/// Join record between one appointment and one external event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMapping {
    pub id: String,
    pub appointment_id: String,
    pub connection_id: String,
    pub external_event_id: String,
    pub last_synced_at: DateTime<Utc>,
    pub direction: SyncDirection,
    pub created_at: DateTime<Utc>,
}

impl EventMapping {
    pub fn new(
        appointment_id: impl Into<String>,
        connection_id: impl Into<String>,
        external_event_id: impl Into<String>,
        direction: SyncDirection,
        synced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: super::new_id(),
            appointment_id: appointment_id.into(),
            connection_id: connection_id.into(),
            external_event_id: external_event_id.into(),
            last_synced_at: synced_at,
            direction,
            created_at: synced_at,
        }
    }
}
