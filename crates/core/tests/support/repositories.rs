//! Mock repository implementations for testing
//!
//! In-memory versions of the storage ports with the same contracts as the
//! SQLCipher repositories: idempotent mapping creation, deduplicated retry
//! items and conditional token writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use calsync_core::{
    AppointmentStore, ConnectionRepository, EventMappingRepository, RetryQueueRepository,
    SyncLogRepository,
};
use calsync_domain::{
    Appointment, Connection, EventMapping, Result as DomainResult, RetryQueueItem, RetryStatus,
    SyncCounts, SyncLogEntry, SyncStatus, WebhookChannel,
};
use chrono::{DateTime, Utc};

#[derive(Default, Clone)]
pub struct MockConnectionRepository {
    rows: Arc<Mutex<HashMap<String, Connection>>>,
}

impl MockConnectionRepository {
    pub fn put(&self, connection: Connection) {
        self.rows.lock().unwrap().insert(connection.id.clone(), connection);
    }

    pub fn get(&self, id: &str) -> Connection {
        self.rows.lock().unwrap().get(id).cloned().expect("connection exists")
    }

    fn with_row(&self, id: &str, apply: impl FnOnce(&mut Connection)) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(id) {
            apply(row);
        }
    }
}

#[async_trait]
impl ConnectionRepository for MockConnectionRepository {
    async fn insert(&self, connection: &Connection) -> DomainResult<()> {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.values_mut() {
            if row.operator_id == connection.operator_id && row.is_active {
                row.is_active = false;
                row.deactivation_reason = Some("replaced".to_string());
            }
        }
        rows.insert(connection.id.clone(), connection.clone());
        Ok(())
    }

    async fn find(&self, id: &str) -> DomainResult<Option<Connection>> {
        Ok(self.rows.lock().unwrap().get(id).cloned())
    }

    async fn find_active_by_operator(&self, operator_id: &str) -> DomainResult<Option<Connection>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|row| row.operator_id == operator_id && row.is_active)
            .cloned())
    }

    async fn find_by_channel(&self, channel_id: &str) -> DomainResult<Option<Connection>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|row| row.is_active && row.webhook_channel_id.as_deref() == Some(channel_id))
            .cloned())
    }

    async fn list_active(&self) -> DomainResult<Vec<Connection>> {
        let mut active: Vec<_> =
            self.rows.lock().unwrap().values().filter(|row| row.is_active).cloned().collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    async fn list(&self, operator_id: Option<&str>) -> DomainResult<Vec<Connection>> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| operator_id.map_or(true, |op| row.operator_id == op))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn update_tokens(
        &self,
        id: &str,
        access_token_encrypted: &str,
        refresh_token_encrypted: &str,
        expires_at: DateTime<Utc>,
        expected_version: i64,
    ) -> DomainResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(id) {
            Some(row) if row.token_version == expected_version => {
                row.access_token_encrypted = access_token_encrypted.to_string();
                row.refresh_token_encrypted = refresh_token_encrypted.to_string();
                row.token_expires_at = expires_at;
                row.token_version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_channel(&self, id: &str, channel: Option<&WebhookChannel>) -> DomainResult<()> {
        self.with_row(id, |row| {
            row.webhook_channel_id = channel.map(|c| c.channel_id.clone());
            row.webhook_resource_id = channel.map(|c| c.resource_id.clone());
            row.webhook_expires_at = channel.map(|c| c.expires_at);
        });
        Ok(())
    }

    async fn update_sync_token(&self, id: &str, sync_token: Option<&str>) -> DomainResult<()> {
        self.with_row(id, |row| row.sync_token = sync_token.map(str::to_string));
        Ok(())
    }

    async fn record_full_sync(&self, id: &str, at: DateTime<Utc>) -> DomainResult<()> {
        self.with_row(id, |row| row.last_full_sync_at = Some(at));
        Ok(())
    }

    async fn deactivate(&self, id: &str, reason: &str) -> DomainResult<()> {
        self.with_row(id, |row| {
            row.is_active = false;
            row.deactivation_reason = Some(reason.to_string());
        });
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MockMappingRepository {
    rows: Arc<Mutex<Vec<EventMapping>>>,
}

impl MockMappingRepository {
    pub fn all(&self) -> Vec<EventMapping> {
        self.rows.lock().unwrap().clone()
    }

    pub fn for_appointment(&self, appointment_id: &str) -> Option<EventMapping> {
        self.rows.lock().unwrap().iter().find(|m| m.appointment_id == appointment_id).cloned()
    }

    pub fn insert_raw(&self, mapping: EventMapping) {
        self.rows.lock().unwrap().push(mapping);
    }
}

#[async_trait]
impl EventMappingRepository for MockMappingRepository {
    async fn find(&self, appointment_id: &str) -> DomainResult<Option<EventMapping>> {
        Ok(self.for_appointment(appointment_id))
    }

    async fn find_by_external_id(
        &self,
        connection_id: &str,
        external_event_id: &str,
    ) -> DomainResult<Option<EventMapping>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.connection_id == connection_id && m.external_event_id == external_event_id)
            .cloned())
    }

    async fn create(&self, mapping: &EventMapping) -> DomainResult<EventMapping> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows.iter().find(|m| m.appointment_id == mapping.appointment_id) {
            return Ok(existing.clone());
        }
        rows.push(mapping.clone());
        Ok(mapping.clone())
    }

    async fn update_last_synced(&self, mapping_id: &str, at: DateTime<Utc>) -> DomainResult<()> {
        if let Some(row) = self.rows.lock().unwrap().iter_mut().find(|m| m.id == mapping_id) {
            row.last_synced_at = at;
        }
        Ok(())
    }

    async fn delete(&self, mapping_id: &str) -> DomainResult<()> {
        self.rows.lock().unwrap().retain(|m| m.id != mapping_id);
        Ok(())
    }

    async fn list_for_connection(&self, connection_id: &str) -> DomainResult<Vec<EventMapping>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.connection_id == connection_id)
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct MockSyncLogRepository {
    rows: Arc<Mutex<Vec<SyncLogEntry>>>,
}

impl MockSyncLogRepository {
    pub fn entries(&self) -> Vec<SyncLogEntry> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncLogRepository for MockSyncLogRepository {
    async fn append(&self, entry: &SyncLogEntry) -> DomainResult<()> {
        self.rows.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn recent(&self, connection_id: &str, limit: usize) -> DomainResult<Vec<SyncLogEntry>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|e| e.connection_id == connection_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn counts_since(
        &self,
        connection_id: &str,
        since: DateTime<Utc>,
    ) -> DomainResult<SyncCounts> {
        let mut counts = SyncCounts::default();
        for entry in self.rows.lock().unwrap().iter() {
            if entry.connection_id != connection_id || entry.created_at < since {
                continue;
            }
            match entry.status {
                SyncStatus::Success => counts.success += 1,
                SyncStatus::Failed => counts.failed += 1,
                SyncStatus::Skipped | SyncStatus::Partial => counts.skipped += 1,
            }
        }
        Ok(counts)
    }

    async fn last_success_at(&self, connection_id: &str) -> DomainResult<Option<DateTime<Utc>>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.connection_id == connection_id && e.status == SyncStatus::Success)
            .map(|e| e.created_at)
            .max())
    }
}

#[derive(Default, Clone)]
pub struct MockRetryRepository {
    rows: Arc<Mutex<Vec<RetryQueueItem>>>,
}

impl MockRetryRepository {
    pub fn all(&self) -> Vec<RetryQueueItem> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetryQueueRepository for MockRetryRepository {
    async fn upsert_pending(&self, item: &RetryQueueItem) -> DomainResult<RetryQueueItem> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows.iter_mut().find(|row| {
            row.status == RetryStatus::Pending
                && row.connection_id == item.connection_id
                && row.kind == item.kind
                && row.appointment_id == item.appointment_id
        }) {
            existing.last_error = item.last_error.clone();
            existing.updated_at = item.updated_at;
            return Ok(existing.clone());
        }
        rows.push(item.clone());
        Ok(item.clone())
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> DomainResult<Vec<RetryQueueItem>> {
        let mut due: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.status == RetryStatus::Pending && row.next_retry_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|row| row.next_retry_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn update(&self, item: &RetryQueueItem) -> DomainResult<()> {
        if let Some(row) = self.rows.lock().unwrap().iter_mut().find(|row| row.id == item.id) {
            *row = item.clone();
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> DomainResult<()> {
        self.rows.lock().unwrap().retain(|row| row.id != id);
        Ok(())
    }

    async fn count(&self, connection_id: &str, status: RetryStatus) -> DomainResult<u64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.connection_id == connection_id && row.status == status)
            .count() as u64)
    }
}

#[derive(Default, Clone)]
pub struct MockAppointmentStore {
    rows: Arc<Mutex<HashMap<String, Appointment>>>,
    reads: Arc<Mutex<HashMap<String, usize>>>,
    changed_on_read: Arc<Mutex<HashMap<String, (usize, Appointment)>>>,
}

impl MockAppointmentStore {
    pub fn put(&self, appointment: Appointment) {
        self.rows.lock().unwrap().insert(appointment.id.clone(), appointment);
    }

    pub fn remove(&self, appointment_id: &str) {
        self.rows.lock().unwrap().remove(appointment_id);
    }

    /// Replace the stored row just before the `nth` upcoming `get` of it (1-based).
    pub fn change_on_read(&self, nth: usize, appointment: Appointment) {
        let seen = self.reads.lock().unwrap().get(&appointment.id).copied().unwrap_or(0);
        self.changed_on_read
            .lock()
            .unwrap()
            .insert(appointment.id.clone(), (seen + nth, appointment));
    }
}

#[async_trait]
impl AppointmentStore for MockAppointmentStore {
    async fn get(&self, appointment_id: &str) -> DomainResult<Option<Appointment>> {
        let read = {
            let mut reads = self.reads.lock().unwrap();
            let count = reads.entry(appointment_id.to_string()).or_default();
            *count += 1;
            *count
        };
        let mut pending = self.changed_on_read.lock().unwrap();
        if pending.get(appointment_id).is_some_and(|(at, _)| *at == read) {
            if let Some((_, changed)) = pending.remove(appointment_id) {
                self.put(changed);
            }
        }
        Ok(self.rows.lock().unwrap().get(appointment_id).cloned())
    }

    async fn list_in_range(
        &self,
        operator_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<Appointment>> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.operator_id == operator_id && a.ends_at >= from && a.starts_at <= to)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }
}
