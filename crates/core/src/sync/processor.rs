//! Sync processor - the local-wins reconciliation state machine
//!
//! Every appointment is reconciled under its own lock: resolve the mapping,
//! fetch the external event, decide with [`resolve`], re-validate the
//! appointment before writing, apply, and append a sync log row for every
//! mutation. Transient failures at the public boundary become retry items;
//! fatal ones deactivate the connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use calsync_domain::{
    Appointment, CalSyncError, Connection, EventChanges, EventMapping, EventPayload, EventQuery,
    ExternalEvent, Result, RetryKind, RetryQueueItem, SyncAction, SyncDirection, SyncLogEntry,
    SyncOperation, SyncOutcome, SyncStatus, SyncType,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use super::ports::{
    AppointmentStore, ConnectionRepository, EventMappingRepository, SyncJob, SyncLogRepository,
};
use super::resolution::{resolve, Resolution};
use crate::calendar_ports::CalendarApi;
use crate::clock::Clock;
use crate::locks::KeyedLocks;
use crate::retry::{RetryHandler, RetryQueue};

/// Tunables for [`SyncProcessor`].
#[derive(Debug, Clone)]
pub struct SyncProcessorConfig {
    /// Wait for another task working on the same appointment.
    pub lock_timeout: Duration,
    /// Deadline for one appointment's full resolution, network included.
    pub resolution_timeout: Duration,
    /// Window listed when no sync token is stored.
    pub window_lookback: chrono::Duration,
    pub window_lookahead: chrono::Duration,
}

impl Default for SyncProcessorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            resolution_timeout: Duration::from_secs(120),
            window_lookback: chrono::Duration::days(
                calsync_domain::constants::BULK_SYNC_LOOKBACK_DAYS,
            ),
            window_lookahead: chrono::Duration::days(
                calsync_domain::constants::BULK_SYNC_LOOKAHEAD_DAYS,
            ),
        }
    }
}

/// Reconciles appointments with the external calendar.
pub struct SyncProcessor {
    pub(super) connections: Arc<dyn ConnectionRepository>,
    mappings: Arc<dyn EventMappingRepository>,
    sync_log: Arc<dyn SyncLogRepository>,
    pub(super) appointments: Arc<dyn AppointmentStore>,
    calendar: Arc<dyn CalendarApi>,
    retry_queue: Arc<RetryQueue>,
    pub(super) clock: Arc<dyn Clock>,
    locks: KeyedLocks,
    pub(super) config: SyncProcessorConfig,
}

/// One reconciliation pass for one appointment.
struct Pass<'a> {
    connection: &'a Connection,
    appointment_id: &'a str,
    sync_type: SyncType,
    force: bool,
    /// Changed event from an upstream listing, when webhook-driven.
    hint: Option<&'a ExternalEvent>,
    started: Instant,
}

/// Failed pass, with what the sync log needs to describe it.
struct Failure {
    operation: SyncOperation,
    error: CalSyncError,
    details: Value,
}

impl From<CalSyncError> for Failure {
    fn from(error: CalSyncError) -> Self {
        Self { operation: SyncOperation::Update, error, details: Value::Null }
    }
}

impl SyncProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        mappings: Arc<dyn EventMappingRepository>,
        sync_log: Arc<dyn SyncLogRepository>,
        appointments: Arc<dyn AppointmentStore>,
        calendar: Arc<dyn CalendarApi>,
        retry_queue: Arc<RetryQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            connections,
            mappings,
            sync_log,
            appointments,
            calendar,
            retry_queue,
            clock,
            locks: KeyedLocks::new(),
            config: SyncProcessorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SyncProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Worker entry point. Failures are logged and, when transient, queued.
    pub async fn handle_job(&self, job: SyncJob) {
        match job {
            SyncJob::ConnectionChanged { connection_id } => {
                if let Err(err) = self.process_connection_changes(&connection_id).await {
                    warn!(%connection_id, error = %err, "upstream change processing failed");
                    let item = RetryQueueItem::connection_changes(&connection_id, self.clock.now());
                    self.defer_on_transient(item, &err).await;
                }
            }
            SyncJob::Appointment { connection_id, appointment_id, sync_type } => {
                if let Err(err) =
                    self.sync_appointment(&connection_id, &appointment_id, sync_type, false).await
                {
                    warn!(%connection_id, %appointment_id, error = %err, "appointment sync failed");
                }
            }
        }
    }

    /// Reconcile one appointment; transient failures are queued for retry.
    pub async fn sync_appointment(
        &self,
        connection_id: &str,
        appointment_id: &str,
        sync_type: SyncType,
        force: bool,
    ) -> Result<SyncOutcome> {
        let result = self.reconcile_appointment(connection_id, appointment_id, sync_type, force).await;
        if let Err(err) = &result {
            let item = RetryQueueItem::sync_appointment(
                connection_id,
                appointment_id,
                sync_type,
                self.clock.now(),
            );
            self.defer_on_transient(item, err).await;
        }
        result
    }

    /// Reconcile one appointment without queueing on failure.
    pub async fn reconcile_appointment(
        &self,
        connection_id: &str,
        appointment_id: &str,
        sync_type: SyncType,
        force: bool,
    ) -> Result<SyncOutcome> {
        let Some(connection) = self.active_connection(connection_id).await? else {
            return Ok(SyncOutcome {
                connection_id: connection_id.to_string(),
                appointment_id: Some(appointment_id.to_string()),
                external_event_id: None,
                action: SyncAction::Ignored,
            });
        };

        let pass = Pass {
            connection: &connection,
            appointment_id,
            sync_type,
            force,
            hint: None,
            started: Instant::now(),
        };
        self.reconcile(&pass).await
    }

    /// List upstream changes for a connection and reconcile each affected
    /// appointment. The new sync token is stored only after every event was
    /// handled or queued.
    #[instrument(skip(self))]
    pub async fn process_connection_changes(&self, connection_id: &str) -> Result<Vec<SyncOutcome>> {
        let Some(connection) = self.active_connection(connection_id).await? else {
            return Ok(Vec::new());
        };

        let started = Instant::now();
        let changes = match self.list_changes(&connection).await {
            Ok(changes) => changes,
            Err(err) => {
                let failure = Failure {
                    operation: SyncOperation::Import,
                    error: err.clone(),
                    details: json!({ "stage": "list_changes" }),
                };
                self.record_failure(&connection, None, SyncType::Webhook, &failure, started.elapsed())
                    .await;
                return Err(err);
            }
        };

        debug!(
            connection_id = %connection.id,
            changed = changes.events.len(),
            "upstream changes listed"
        );

        let mut outcomes = Vec::with_capacity(changes.events.len());
        for event in &changes.events {
            match self.reconcile_external_event(&connection, event).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) if err.is_fatal_to_connection() => return Err(err),
                Err(err) => {
                    debug!(event_id = %event.id, error = %err, "changed event not reconciled");
                }
            }
        }

        if let Some(token) = changes.next_sync_token.as_deref() {
            self.connections.update_sync_token(&connection.id, Some(token)).await?;
        }
        Ok(outcomes)
    }

    async fn list_changes(&self, connection: &Connection) -> Result<EventChanges> {
        if let Some(sync_token) = connection.sync_token.clone() {
            let query = EventQuery::Incremental { sync_token };
            match self.calendar.list_events_since(connection, &query).await {
                Err(CalSyncError::SyncTokenExpired(reason)) => {
                    info!(connection_id = %connection.id, %reason, "sync token expired; relisting window");
                    self.connections.update_sync_token(&connection.id, None).await?;
                }
                other => return other,
            }
        }

        let now = self.clock.now();
        let query = EventQuery::Window {
            from: now - self.config.window_lookback,
            to: now + self.config.window_lookahead,
        };
        self.calendar.list_events_since(connection, &query).await
    }

    async fn reconcile_external_event(
        &self,
        connection: &Connection,
        event: &ExternalEvent,
    ) -> Result<SyncOutcome> {
        let appointment_id =
            match self.mappings.find_by_external_id(&connection.id, &event.id).await? {
                Some(mapping) => mapping.appointment_id,
                None => match &event.appointment_id {
                    Some(id) => id.clone(),
                    None => {
                        return Ok(SyncOutcome {
                            connection_id: connection.id.clone(),
                            appointment_id: None,
                            external_event_id: Some(event.id.clone()),
                            action: SyncAction::Ignored,
                        });
                    }
                },
            };

        let pass = Pass {
            connection,
            appointment_id: &appointment_id,
            sync_type: SyncType::Webhook,
            force: false,
            hint: Some(event),
            started: Instant::now(),
        };
        let result = self.reconcile(&pass).await;
        if let Err(err) = &result {
            let item = RetryQueueItem::sync_appointment(
                &connection.id,
                &appointment_id,
                SyncType::Webhook,
                self.clock.now(),
            );
            self.defer_on_transient(item, err).await;
        }
        result
    }

    async fn reconcile(&self, pass: &Pass<'_>) -> Result<SyncOutcome> {
        let deadline = self.config.resolution_timeout;
        let result = match tokio::time::timeout(deadline, self.reconcile_locked(pass)).await {
            Ok(result) => result,
            Err(_) => Err(Failure::from(CalSyncError::Timeout(format!(
                "resolution of appointment {} exceeded {}s",
                pass.appointment_id,
                deadline.as_secs()
            )))),
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(failure) => {
                self.record_failure(
                    pass.connection,
                    Some(pass.appointment_id),
                    pass.sync_type,
                    &failure,
                    pass.started.elapsed(),
                )
                .await;
                Err(failure.error)
            }
        }
    }

    async fn reconcile_locked(&self, pass: &Pass<'_>) -> std::result::Result<SyncOutcome, Failure> {
        let _guard = self
            .locks
            .acquire(&format!("appointment:{}", pass.appointment_id), self.config.lock_timeout)
            .await?;

        let mut mapping = self.mappings.find(pass.appointment_id).await?;
        let mut appointment = self.appointments.get(pass.appointment_id).await?;

        if let Some(event) = pass.hint {
            match &mapping {
                Some(existing) if existing.external_event_id == event.id => {}
                Some(existing) => {
                    if event.is_cancelled() {
                        return Ok(self.outcome(pass, Some(&event.id), SyncAction::Ignored));
                    }
                    return Err(Failure {
                        operation: SyncOperation::Update,
                        error: CalSyncError::MappingInconsistent(format!(
                            "appointment {} is mapped to {} but event {} also claims it",
                            pass.appointment_id, existing.external_event_id, event.id
                        )),
                        details: json!({
                            "appointmentId": pass.appointment_id,
                            "mappedExternalEventId": existing.external_event_id,
                            "claimingExternalEventId": event.id,
                            "claimingEvent": event,
                        }),
                    });
                }
                None => {
                    if event.is_cancelled() || appointment.is_none() {
                        return Ok(self.outcome(pass, Some(&event.id), SyncAction::Ignored));
                    }
                    mapping = Some(self.adopt(pass, event).await?);
                }
            }
        }

        let external = match &mapping {
            Some(existing) => {
                self.calendar.get_event(pass.connection, &existing.external_event_id).await?
            }
            None => None,
        };

        let mut resolution =
            resolve(appointment.as_ref(), mapping.as_ref(), external.as_ref(), pass.force);

        if resolution.writes_local_data() {
            let fresh = self.appointments.get(pass.appointment_id).await?;
            if appointment_moved(appointment.as_ref(), fresh.as_ref()) {
                debug!(
                    appointment_id = pass.appointment_id,
                    "appointment changed during resolution; re-evaluating"
                );
                appointment = fresh;
                resolution =
                    resolve(appointment.as_ref(), mapping.as_ref(), external.as_ref(), pass.force);
            }
        }

        let operation = resolution.operation().unwrap_or(SyncOperation::Update);
        self.apply(pass, resolution, appointment.as_ref(), mapping.as_ref(), external.as_ref())
            .await
            .map_err(|error| Failure {
                operation,
                error,
                details: json!({ "resolution": format!("{resolution:?}") }),
            })
    }

    async fn apply(
        &self,
        pass: &Pass<'_>,
        resolution: Resolution,
        appointment: Option<&Appointment>,
        mapping: Option<&EventMapping>,
        external: Option<&ExternalEvent>,
    ) -> Result<SyncOutcome> {
        match (resolution, appointment, mapping) {
            (Resolution::PushCreate, Some(appointment), _) => {
                self.push_create(pass, appointment).await
            }
            (Resolution::Recreate, Some(appointment), Some(mapping)) => {
                self.recreate(pass, appointment, mapping).await
            }
            (Resolution::OverwriteConflict, Some(appointment), Some(mapping)) => {
                self.overwrite(pass, appointment, mapping, external, true).await
            }
            (Resolution::PushUpdate, Some(appointment), Some(mapping)) => {
                self.overwrite(pass, appointment, mapping, external, false).await
            }
            (Resolution::SkipExternalOnly, _, Some(mapping)) => {
                self.skip_external_only(pass, mapping, external).await
            }
            (Resolution::DeleteExternal, _, Some(mapping)) => {
                self.delete_external(pass, mapping).await
            }
            (Resolution::DropMapping, _, Some(mapping)) => self.drop_mapping(pass, mapping).await,
            (Resolution::UpToDate, _, mapping) => Ok(self.outcome(
                pass,
                mapping.map(|m| m.external_event_id.as_str()),
                SyncAction::UpToDate,
            )),
            _ => Ok(self.outcome(pass, None, SyncAction::Ignored)),
        }
    }

    /// Link an untracked event that carries our appointment id.
    async fn adopt(
        &self,
        pass: &Pass<'_>,
        event: &ExternalEvent,
    ) -> std::result::Result<EventMapping, Failure> {
        let mapping = EventMapping::new(
            pass.appointment_id,
            &pass.connection.id,
            &event.id,
            SyncDirection::Pull,
            event.updated_at,
        );
        let stored = self.mappings.create(&mapping).await?;

        info!(
            connection_id = %pass.connection.id,
            appointment_id = pass.appointment_id,
            external_event_id = %event.id,
            "adopted untracked calendar event"
        );
        self.append_log(
            self.entry(pass, SyncOperation::Import, SyncStatus::Success)
                .with_details(json!({ "externalEventId": event.id, "reason": "untracked_event" })),
        )
        .await;
        Ok(stored)
    }

    async fn push_create(&self, pass: &Pass<'_>, appointment: &Appointment) -> Result<SyncOutcome> {
        let payload = EventPayload::from(appointment);
        let event = self.calendar.create_event(pass.connection, &payload).await?;
        let mapping = EventMapping::new(
            &appointment.id,
            &pass.connection.id,
            &event.id,
            SyncDirection::Push,
            self.watermark(appointment, &event),
        );
        let stored = self.mappings.create(&mapping).await?;

        if stored.external_event_id != event.id {
            warn!(
                appointment_id = %appointment.id,
                kept = %stored.external_event_id,
                duplicate = %event.id,
                "appointment linked concurrently; removing duplicate event"
            );
            self.calendar.delete_event(pass.connection, &event.id).await?;
            return Err(CalSyncError::MappingInconsistent(format!(
                "appointment {} was linked to {} while creating {}",
                appointment.id, stored.external_event_id, event.id
            )));
        }

        self.append_log(
            self.entry(pass, SyncOperation::Create, SyncStatus::Success)
                .with_details(json!({ "externalEventId": event.id })),
        )
        .await;
        Ok(self.outcome(pass, Some(&event.id), SyncAction::Created))
    }

    async fn recreate(
        &self,
        pass: &Pass<'_>,
        appointment: &Appointment,
        stale: &EventMapping,
    ) -> Result<SyncOutcome> {
        let payload = EventPayload::from(appointment);
        let event = self.calendar.create_event(pass.connection, &payload).await?;

        self.mappings.delete(&stale.id).await?;
        let mapping = EventMapping::new(
            &appointment.id,
            &pass.connection.id,
            &event.id,
            SyncDirection::Push,
            self.watermark(appointment, &event),
        );
        self.mappings.create(&mapping).await?;

        info!(
            appointment_id = %appointment.id,
            previous = %stale.external_event_id,
            external_event_id = %event.id,
            "recreated missing calendar event"
        );
        self.append_log(self.entry(pass, SyncOperation::Recreated, SyncStatus::Success).with_details(
            json!({
                "previousExternalEventId": stale.external_event_id,
                "externalEventId": event.id,
            }),
        ))
        .await;
        Ok(self.outcome(pass, Some(&event.id), SyncAction::Recreated))
    }

    async fn overwrite(
        &self,
        pass: &Pass<'_>,
        appointment: &Appointment,
        mapping: &EventMapping,
        external: Option<&ExternalEvent>,
        conflict: bool,
    ) -> Result<SyncOutcome> {
        let payload = EventPayload::from(appointment);
        let written = match self
            .calendar
            .update_event(pass.connection, &mapping.external_event_id, &payload)
            .await
        {
            Err(CalSyncError::NotFound(_)) => {
                return self.recreate(pass, appointment, mapping).await;
            }
            other => other?,
        };

        self.mappings.update_last_synced(&mapping.id, self.watermark(appointment, &written)).await?;

        let (action, details) = if conflict {
            info!(
                appointment_id = %appointment.id,
                external_event_id = %mapping.external_event_id,
                "conflict resolved in favour of the appointment"
            );
            (
                SyncAction::ConflictResolved,
                json!({
                    "externalEventId": mapping.external_event_id,
                    "resolution": "local_wins",
                    "conflict": {
                        "lastSyncedAt": mapping.last_synced_at,
                        "local": appointment,
                        "external": external,
                    },
                }),
            )
        } else {
            (SyncAction::Updated, json!({ "externalEventId": mapping.external_event_id }))
        };

        self.append_log(
            self.entry(pass, SyncOperation::Update, SyncStatus::Success).with_details(details),
        )
        .await;
        Ok(self.outcome(pass, Some(&mapping.external_event_id), action))
    }

    async fn skip_external_only(
        &self,
        pass: &Pass<'_>,
        mapping: &EventMapping,
        external: Option<&ExternalEvent>,
    ) -> Result<SyncOutcome> {
        self.append_log(self.entry(pass, SyncOperation::Update, SyncStatus::Skipped).with_details(
            json!({
                "reason": "external_only_change",
                "externalEventId": mapping.external_event_id,
                "lastSyncedAt": mapping.last_synced_at,
                "externalUpdatedAt": external.map(|event| event.updated_at),
            }),
        ))
        .await;
        Ok(self.outcome(pass, Some(&mapping.external_event_id), SyncAction::Skipped))
    }

    async fn delete_external(&self, pass: &Pass<'_>, mapping: &EventMapping) -> Result<SyncOutcome> {
        self.calendar.delete_event(pass.connection, &mapping.external_event_id).await?;
        self.mappings.delete(&mapping.id).await?;

        self.append_log(
            self.entry(pass, SyncOperation::Delete, SyncStatus::Success)
                .with_details(json!({ "externalEventId": mapping.external_event_id })),
        )
        .await;
        Ok(self.outcome(pass, Some(&mapping.external_event_id), SyncAction::Deleted))
    }

    async fn drop_mapping(&self, pass: &Pass<'_>, mapping: &EventMapping) -> Result<SyncOutcome> {
        self.mappings.delete(&mapping.id).await?;

        self.append_log(self.entry(pass, SyncOperation::Delete, SyncStatus::Success).with_details(
            json!({
                "externalEventId": mapping.external_event_id,
                "externalAlreadyMissing": true,
            }),
        ))
        .await;
        Ok(self.outcome(pass, Some(&mapping.external_event_id), SyncAction::MappingRemoved))
    }

    /// `last_synced_at` after a write: never behind the appointment or the
    /// provider's own timestamp, so the write's echo reads as unchanged.
    fn watermark(&self, appointment: &Appointment, written: &ExternalEvent) -> DateTime<Utc> {
        self.clock.now().max(appointment.updated_at).max(written.updated_at)
    }

    pub(super) async fn active_connection(&self, connection_id: &str) -> Result<Option<Connection>> {
        let connection = self
            .connections
            .find(connection_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("connection {connection_id}")))?;

        if connection.is_active {
            Ok(Some(connection))
        } else {
            debug!(%connection_id, "connection inactive; sync skipped");
            Ok(None)
        }
    }

    fn entry(&self, pass: &Pass<'_>, operation: SyncOperation, status: SyncStatus) -> SyncLogEntry {
        SyncLogEntry::new(&pass.connection.id, operation, pass.sync_type, status, self.clock.now())
            .with_appointment(pass.appointment_id)
            .with_duration(pass.started.elapsed())
    }

    fn outcome(
        &self,
        pass: &Pass<'_>,
        external_event_id: Option<&str>,
        action: SyncAction,
    ) -> SyncOutcome {
        SyncOutcome {
            connection_id: pass.connection.id.clone(),
            appointment_id: Some(pass.appointment_id.to_string()),
            external_event_id: external_event_id.map(str::to_string),
            action,
        }
    }

    async fn append_log(&self, entry: SyncLogEntry) {
        if let Err(err) = self.sync_log.append(&entry).await {
            error!(error = %err, connection_id = %entry.connection_id, "failed to append sync log entry");
        }
    }

    async fn record_failure(
        &self,
        connection: &Connection,
        appointment_id: Option<&str>,
        sync_type: SyncType,
        failure: &Failure,
        elapsed: Duration,
    ) {
        let mut entry = SyncLogEntry::new(
            &connection.id,
            failure.operation,
            sync_type,
            SyncStatus::Failed,
            self.clock.now(),
        )
        .with_error(&failure.error)
        .with_details(failure.details.clone())
        .with_duration(elapsed);
        if let Some(appointment_id) = appointment_id {
            entry = entry.with_appointment(appointment_id);
        }
        self.append_log(entry).await;

        if failure.error.is_fatal_to_connection() {
            warn!(
                connection_id = %connection.id,
                reason = failure.error.code(),
                "deactivating connection after fatal sync error"
            );
            if let Err(err) = self.connections.deactivate(&connection.id, failure.error.code()).await {
                error!(connection_id = %connection.id, error = %err, "failed to deactivate connection");
            }
        }
    }

    pub(super) async fn defer_on_transient(&self, item: RetryQueueItem, err: &CalSyncError) {
        if !err.is_transient() {
            return;
        }
        let item = item.with_error(err.to_string());
        if let Err(queue_err) = self.retry_queue.enqueue(item).await {
            error!(error = %queue_err, "failed to queue sync retry");
        }
    }
}

fn appointment_moved(before: Option<&Appointment>, after: Option<&Appointment>) -> bool {
    match (before, after) {
        (Some(before), Some(after)) => {
            before.updated_at != after.updated_at || before.status != after.status
        }
        (None, None) => false,
        _ => true,
    }
}

#[async_trait]
impl RetryHandler for SyncProcessor {
    async fn retry(&self, item: &RetryQueueItem) -> Result<()> {
        match item.kind {
            RetryKind::SyncAppointment => {
                let appointment_id = item.appointment_id.as_deref().ok_or_else(|| {
                    CalSyncError::InvalidInput(format!("retry item {} has no appointment", item.id))
                })?;
                self.reconcile_appointment(&item.connection_id, appointment_id, item.sync_type, false)
                    .await
                    .map(|_| ())
            }
            RetryKind::ConnectionChanges => {
                self.process_connection_changes(&item.connection_id).await.map(|_| ())
            }
        }
    }
}
