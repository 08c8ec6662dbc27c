//! Calendar provider, clock and dispatcher fakes

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use calsync_core::{CalendarApi, Clock, DispatchError, SyncDispatcher, SyncJob};
use calsync_domain::{
    CalSyncError, Connection, EventChanges, EventPayload, EventQuery, ExternalEvent,
    ExternalEventStatus, Result as DomainResult, WebhookChannel,
};
use chrono::{DateTime, Utc};

/// Clock advanced by hand.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// In-memory calendar with scriptable failures.
///
/// Failures are queued per operation name (`"create"`, `"update"`,
/// `"delete"`, `"get"`, `"list"`, `"watch"`, `"stop"`) and consumed one per
/// call.
pub struct MockCalendarApi {
    clock: Arc<ManualClock>,
    events: Mutex<HashMap<String, ExternalEvent>>,
    failures: Mutex<HashMap<&'static str, VecDeque<CalSyncError>>>,
    listings: Mutex<VecDeque<DomainResult<EventChanges>>>,
    queries: Mutex<Vec<EventQuery>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    create_delay: Mutex<Option<Duration>>,
}

impl MockCalendarApi {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            events: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            listings: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            create_delay: Mutex::new(None),
        }
    }

    pub fn fail_next(&self, operation: &'static str, error: CalSyncError) {
        self.failures.lock().unwrap().entry(operation).or_default().push_back(error);
    }

    pub fn push_listing(&self, listing: DomainResult<EventChanges>) {
        self.listings.lock().unwrap().push_back(listing);
    }

    pub fn slow_creates(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    pub fn event(&self, id: &str) -> Option<ExternalEvent> {
        self.events.lock().unwrap().get(id).cloned()
    }

    pub fn put_event(&self, event: ExternalEvent) {
        self.events.lock().unwrap().insert(event.id.clone(), event);
    }

    pub fn remove_event(&self, id: &str) {
        self.events.lock().unwrap().remove(id);
    }

    /// Simulate an edit made directly in the calendar.
    pub fn edit_externally(&self, id: &str, summary: &str) {
        let now = self.clock.now();
        if let Some(event) = self.events.lock().unwrap().get_mut(id) {
            event.summary = summary.to_string();
            event.updated_at = now;
        }
    }

    pub fn live_events(&self) -> Vec<ExternalEvent> {
        self.events.lock().unwrap().values().filter(|e| !e.is_cancelled()).cloned().collect()
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.as_str() == operation).count()
    }

    pub fn queries(&self) -> Vec<EventQuery> {
        self.queries.lock().unwrap().clone()
    }

    fn enter(&self, operation: &'static str) -> DomainResult<()> {
        self.calls.lock().unwrap().push(operation.to_string());
        match self.failures.lock().unwrap().get_mut(operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn write(&self, id: String, payload: &EventPayload) -> ExternalEvent {
        let event = ExternalEvent {
            id: id.clone(),
            summary: payload.summary.clone(),
            description: payload.description.clone(),
            location: payload.location.clone(),
            starts_at: Some(payload.starts_at),
            ends_at: Some(payload.ends_at),
            status: ExternalEventStatus::Confirmed,
            updated_at: self.clock.now(),
            appointment_id: Some(payload.appointment_id.clone()),
        };
        self.events.lock().unwrap().insert(id, event.clone());
        event
    }
}

#[async_trait]
impl CalendarApi for MockCalendarApi {
    async fn create_event(
        &self,
        _connection: &Connection,
        payload: &EventPayload,
    ) -> DomainResult<ExternalEvent> {
        self.enter("create")?;
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let id = format!("evt-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(self.write(id, payload))
    }

    async fn update_event(
        &self,
        _connection: &Connection,
        event_id: &str,
        payload: &EventPayload,
    ) -> DomainResult<ExternalEvent> {
        self.enter("update")?;
        if !self.events.lock().unwrap().contains_key(event_id) {
            return Err(CalSyncError::NotFound(format!("event {event_id}")));
        }
        Ok(self.write(event_id.to_string(), payload))
    }

    async fn delete_event(&self, _connection: &Connection, event_id: &str) -> DomainResult<()> {
        self.enter("delete")?;
        self.events.lock().unwrap().remove(event_id);
        Ok(())
    }

    async fn get_event(
        &self,
        _connection: &Connection,
        event_id: &str,
    ) -> DomainResult<Option<ExternalEvent>> {
        self.enter("get")?;
        Ok(self.event(event_id))
    }

    async fn list_events_since(
        &self,
        _connection: &Connection,
        query: &EventQuery,
    ) -> DomainResult<EventChanges> {
        self.enter("list")?;
        self.queries.lock().unwrap().push(query.clone());
        match self.listings.lock().unwrap().pop_front() {
            Some(listing) => listing,
            None => Ok(EventChanges {
                events: self.events.lock().unwrap().values().cloned().collect(),
                next_sync_token: Some("sync-token-next".to_string()),
            }),
        }
    }

    async fn watch_events(
        &self,
        _connection: &Connection,
        channel_id: &str,
        _callback_url: &str,
        _channel_token: Option<&str>,
    ) -> DomainResult<WebhookChannel> {
        self.enter("watch")?;
        Ok(WebhookChannel {
            channel_id: channel_id.to_string(),
            resource_id: format!("res-{channel_id}"),
            expires_at: self.clock.now() + chrono::Duration::days(7),
        })
    }

    async fn stop_channel(
        &self,
        _connection: &Connection,
        _channel_id: &str,
        _resource_id: &str,
    ) -> DomainResult<()> {
        self.enter("stop")
    }

    fn calls_in_window(&self, _connection_id: &str) -> u64 {
        self.calls.lock().unwrap().len() as u64
    }
}

/// Dispatcher recording jobs, optionally refusing them as saturated.
#[derive(Default)]
pub struct RecordingDispatcher {
    jobs: Mutex<Vec<SyncJob>>,
    saturated: AtomicBool,
}

impl RecordingDispatcher {
    pub fn saturate(&self) {
        self.saturated.store(true, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<SyncJob> {
        self.jobs.lock().unwrap().clone()
    }
}

impl SyncDispatcher for RecordingDispatcher {
    fn try_dispatch(&self, job: SyncJob) -> Result<(), DispatchError> {
        if self.saturated.load(Ordering::SeqCst) {
            return Err(DispatchError::Saturated(job));
        }
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}
