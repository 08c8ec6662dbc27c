//! Local-wins resolution rules
//!
//! Pure decision step of the sync state machine: given the appointment, its
//! mapping and the current external event, pick the action. No I/O happens
//! here, so the same triple always yields the same resolution.

use calsync_domain::{Appointment, EventMapping, EventPayload, ExternalEvent, SyncOperation};

/// Action chosen for one appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Active appointment never pushed: create the event and the mapping.
    PushCreate,
    /// Active appointment whose event vanished: create a fresh one and
    /// replace the stale mapping.
    Recreate,
    /// Both sides changed since the last sync: overwrite with local data.
    OverwriteConflict,
    /// Local change, drift or forced re-push: overwrite with local data.
    PushUpdate,
    /// Only the calendar side changed. Booking data is never pulled back.
    SkipExternalOnly,
    /// Appointment gone or cancelled while its event still exists.
    DeleteExternal,
    /// Appointment and event both gone; only the mapping remains.
    DropMapping,
    UpToDate,
    /// Nothing to reconcile (unknown or inactive appointment, no mapping).
    Nothing,
}

impl Resolution {
    /// Log operation for this resolution, if it mutates anything.
    pub const fn operation(self) -> Option<SyncOperation> {
        match self {
            Self::PushCreate => Some(SyncOperation::Create),
            Self::Recreate => Some(SyncOperation::Recreated),
            Self::OverwriteConflict | Self::PushUpdate | Self::SkipExternalOnly => {
                Some(SyncOperation::Update)
            }
            Self::DeleteExternal | Self::DropMapping => Some(SyncOperation::Delete),
            Self::UpToDate | Self::Nothing => None,
        }
    }

    /// Whether the resolution writes appointment data to the calendar.
    pub const fn writes_local_data(self) -> bool {
        matches!(
            self,
            Self::PushCreate | Self::Recreate | Self::OverwriteConflict | Self::PushUpdate
        )
    }
}

/// Decide what to do for one appointment.
///
/// `force` re-pushes local data even when nothing appears to have changed or
/// when only the calendar side changed.
pub fn resolve(
    appointment: Option<&Appointment>,
    mapping: Option<&EventMapping>,
    external: Option<&ExternalEvent>,
    force: bool,
) -> Resolution {
    let live_external = external.filter(|event| !event.is_cancelled());

    let Some(appointment) = appointment.filter(|appt| appt.is_active()) else {
        return match (mapping, live_external) {
            (Some(_), Some(_)) => Resolution::DeleteExternal,
            (Some(_), None) => Resolution::DropMapping,
            (None, _) => Resolution::Nothing,
        };
    };

    let Some(mapping) = mapping else {
        return Resolution::PushCreate;
    };

    let Some(event) = live_external else {
        return Resolution::Recreate;
    };

    let local_changed = appointment.updated_at > mapping.last_synced_at;
    let external_changed = event.updated_at > mapping.last_synced_at;

    match (local_changed, external_changed) {
        (true, true) => Resolution::OverwriteConflict,
        (true, false) => Resolution::PushUpdate,
        (false, true) if force => Resolution::PushUpdate,
        (false, true) => Resolution::SkipExternalOnly,
        (false, false) => {
            if force || !event.matches(&EventPayload::from(appointment)) {
                Resolution::PushUpdate
            } else {
                Resolution::UpToDate
            }
        }
    }
}
