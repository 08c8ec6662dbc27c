//! Google Calendar v3 client
//!
//! Implements [`CalendarApi`] on top of [`RateLimitedHttp`]. Bearer tokens
//! come from the credential vault; a 401 forces one refresh and a second
//! rejection revokes the credential.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::{CalendarApi, CredentialVault};
use calsync_domain::constants::{APPOINTMENT_ID_PROPERTY, EVENTS_PAGE_SIZE, MAX_LIST_PAGES};
use calsync_domain::{
    from_millis, CalSyncError, Connection, EventChanges, EventPayload, EventQuery, ExternalEvent,
    ExternalEventStatus, Result, WebhookChannel,
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::http::{ProviderResponse, RateLimitedHttp};

/// What a 404/410 means for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Single event: the event is gone.
    Event,
    /// Calendar-level call: the calendar is gone.
    Calendar,
    /// Incremental listing: 410 means the sync token expired.
    SyncList,
}

/// [`CalendarApi`] backed by the Google Calendar REST API.
pub struct GoogleCalendarClient {
    http: Arc<RateLimitedHttp>,
    vault: Arc<dyn CredentialVault>,
    base_url: String,
}

impl GoogleCalendarClient {
    pub fn new(
        http: Arc<RateLimitedHttp>,
        vault: Arc<dyn CredentialVault>,
        base_url: impl Into<String>,
    ) -> Self {
        Self { http, vault, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    fn events_url(&self, connection: &Connection) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(&connection.calendar_id)
        )
    }

    fn event_url(&self, connection: &Connection, event_id: &str) -> String {
        format!("{}/{}", self.events_url(connection), urlencoding::encode(event_id))
    }

    /// Send an authorized request, retrying once with a forced refresh on 401.
    async fn call<F>(&self, connection: &Connection, scope: Scope, build: F) -> Result<ProviderResponse>
    where
        F: Fn(&str) -> RequestBuilder + Send + Sync,
    {
        let token = self.vault.get_valid_access_token(&connection.id).await?;
        let mut reply = self.http.send(&connection.id, build(&token)).await?;

        if reply.status == StatusCode::UNAUTHORIZED {
            debug!(connection_id = %connection.id, "access token rejected; forcing refresh");
            let token = self.vault.force_refresh(&connection.id).await?;
            reply = self.http.send(&connection.id, build(&token)).await?;
            if reply.status == StatusCode::UNAUTHORIZED {
                return Err(CalSyncError::CredentialRevoked(
                    "access token rejected after refresh".into(),
                ));
            }
        }

        if reply.status.is_success() {
            Ok(reply)
        } else {
            Err(map_status(scope, &reply))
        }
    }
}

fn map_status(scope: Scope, reply: &ProviderResponse) -> CalSyncError {
    let status = reply.status;
    let message = format!("HTTP {}: {}", status.as_u16(), reply.error_message());

    match (status, scope) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => {
            CalSyncError::CredentialRevoked(message)
        }
        (StatusCode::GONE, Scope::SyncList) => CalSyncError::SyncTokenExpired(message),
        (StatusCode::NOT_FOUND | StatusCode::GONE, Scope::Event) => CalSyncError::NotFound(message),
        (StatusCode::NOT_FOUND | StatusCode::GONE, Scope::Calendar | Scope::SyncList) => {
            CalSyncError::CalendarDeleted(message)
        }
        (StatusCode::TOO_MANY_REQUESTS, _) => CalSyncError::RateLimitExceeded(message),
        (status, _) if status.is_server_error() => CalSyncError::ProviderUnavailable(message),
        _ => CalSyncError::InvalidInput(message),
    }
}

#[async_trait]
impl CalendarApi for GoogleCalendarClient {
    #[instrument(skip(self, connection, payload), fields(connection_id = %connection.id, appointment_id = %payload.appointment_id))]
    async fn create_event(
        &self,
        connection: &Connection,
        payload: &EventPayload,
    ) -> Result<ExternalEvent> {
        let url = self.events_url(connection);
        let body = GoogleEventBody::from(payload);
        let reply = self
            .call(connection, Scope::Calendar, |token| {
                self.http.request(Method::POST, &url).bearer_auth(token).json(&body)
            })
            .await?;
        reply.json::<GoogleEvent>().map(ExternalEvent::from)
    }

    #[instrument(skip(self, connection, payload), fields(connection_id = %connection.id))]
    async fn update_event(
        &self,
        connection: &Connection,
        event_id: &str,
        payload: &EventPayload,
    ) -> Result<ExternalEvent> {
        let url = self.event_url(connection, event_id);
        let body = GoogleEventBody::from(payload);
        let reply = self
            .call(connection, Scope::Event, |token| {
                self.http.request(Method::PUT, &url).bearer_auth(token).json(&body)
            })
            .await?;
        reply.json::<GoogleEvent>().map(ExternalEvent::from)
    }

    #[instrument(skip(self, connection), fields(connection_id = %connection.id))]
    async fn delete_event(&self, connection: &Connection, event_id: &str) -> Result<()> {
        let url = self.event_url(connection, event_id);
        match self
            .call(connection, Scope::Event, |token| {
                self.http.request(Method::DELETE, &url).bearer_auth(token)
            })
            .await
        {
            Ok(_) => Ok(()),
            Err(CalSyncError::NotFound(_)) => {
                debug!(event_id, "event already deleted");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn get_event(
        &self,
        connection: &Connection,
        event_id: &str,
    ) -> Result<Option<ExternalEvent>> {
        let url = self.event_url(connection, event_id);
        let reply = match self
            .call(connection, Scope::Event, |token| {
                self.http.request(Method::GET, &url).bearer_auth(token)
            })
            .await
        {
            Ok(reply) => reply,
            Err(CalSyncError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };

        let event = ExternalEvent::from(reply.json::<GoogleEvent>()?);
        Ok((!event.is_cancelled()).then_some(event))
    }

    #[instrument(skip(self, connection, query), fields(connection_id = %connection.id))]
    async fn list_events_since(
        &self,
        connection: &Connection,
        query: &EventQuery,
    ) -> Result<EventChanges> {
        let url = self.events_url(connection);
        let (scope, mut params) = match query {
            EventQuery::Incremental { sync_token } => {
                (Scope::SyncList, vec![("syncToken", sync_token.clone())])
            }
            EventQuery::Window { from, to } => (
                Scope::Calendar,
                vec![
                    ("timeMin", rfc3339(*from)),
                    ("timeMax", rfc3339(*to)),
                    ("showDeleted", "true".to_string()),
                    ("singleEvents", "true".to_string()),
                ],
            ),
        };
        params.push(("maxResults", EVENTS_PAGE_SIZE.to_string()));

        let mut changes = EventChanges::default();
        let mut page_token: Option<String> = None;

        for page in 1..=MAX_LIST_PAGES {
            let reply = self
                .call(connection, scope, |token| {
                    let mut request =
                        self.http.request(Method::GET, &url).bearer_auth(token).query(&params);
                    if let Some(page_token) = page_token.as_deref() {
                        request = request.query(&[("pageToken", page_token)]);
                    }
                    request
                })
                .await?;

            let listing: GoogleEventsResponse = reply.json()?;
            changes.events.extend(listing.items.into_iter().map(ExternalEvent::from));
            debug!(page, events = changes.events.len(), "events page received");

            match listing.next_page_token {
                Some(next) => page_token = Some(next),
                None => {
                    changes.next_sync_token = listing.next_sync_token;
                    return Ok(changes);
                }
            }
        }

        warn!(
            connection_id = %connection.id,
            pages = MAX_LIST_PAGES,
            "event listing truncated at page cap; sync token not advanced"
        );
        Ok(changes)
    }

    #[instrument(skip(self, connection, callback_url, channel_token), fields(connection_id = %connection.id))]
    async fn watch_events(
        &self,
        connection: &Connection,
        channel_id: &str,
        callback_url: &str,
        channel_token: Option<&str>,
    ) -> Result<WebhookChannel> {
        let url = format!("{}/watch", self.events_url(connection));
        let body = WatchRequest {
            id: channel_id,
            kind: "web_hook",
            address: callback_url,
            token: channel_token,
        };
        let reply = self
            .call(connection, Scope::Calendar, |token| {
                self.http.request(Method::POST, &url).bearer_auth(token).json(&body)
            })
            .await?;

        let watched: WatchResponse = reply.json()?;
        let expires_at = watched
            .expiration
            .as_deref()
            .and_then(|raw| raw.parse::<i64>().ok())
            .map(from_millis)
            .ok_or_else(|| {
                CalSyncError::ProviderUnavailable("watch response carries no expiration".into())
            })?;

        Ok(WebhookChannel { channel_id: watched.id, resource_id: watched.resource_id, expires_at })
    }

    async fn stop_channel(
        &self,
        connection: &Connection,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<()> {
        let url = format!("{}/channels/stop", self.base_url);
        let body = StopRequest { id: channel_id, resource_id };
        self.call(connection, Scope::Event, |token| {
            self.http.request(Method::POST, &url).bearer_auth(token).json(&body)
        })
        .await
        .map(|_| ())
    }

    fn calls_in_window(&self, connection_id: &str) -> u64 {
        self.http.calls_in_window(connection_id)
    }
}

fn rfc3339(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    /// All-day events carry a date only.
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

impl EventTime {
    fn at(instant: DateTime<Utc>) -> Self {
        Self { date_time: Some(rfc3339(instant)), date: None, time_zone: Some("UTC".into()) }
    }

    fn instant(&self) -> Option<DateTime<Utc>> {
        if let Some(raw) = self.date_time.as_deref() {
            return DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc));
        }
        self.date
            .as_deref()
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ExtendedProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventBody<'a> {
    summary: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    start: EventTime,
    end: EventTime,
    extended_properties: ExtendedProperties,
}

impl<'a> From<&'a EventPayload> for GoogleEventBody<'a> {
    fn from(payload: &'a EventPayload) -> Self {
        let private =
            HashMap::from([(APPOINTMENT_ID_PROPERTY.to_string(), payload.appointment_id.clone())]);
        Self {
            summary: &payload.summary,
            description: payload.description.as_deref(),
            location: payload.location.as_deref(),
            start: EventTime::at(payload.starts_at),
            end: EventTime::at(payload.ends_at),
            extended_properties: ExtendedProperties { private: Some(private) },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    status: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<EventTime>,
    end: Option<EventTime>,
    updated: Option<String>,
    extended_properties: Option<ExtendedProperties>,
}

impl From<GoogleEvent> for ExternalEvent {
    fn from(event: GoogleEvent) -> Self {
        let status = event
            .status
            .as_deref()
            .and_then(|raw| raw.parse::<ExternalEventStatus>().ok())
            .unwrap_or(ExternalEventStatus::Confirmed);
        let updated_at = event
            .updated
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map_or(DateTime::<Utc>::UNIX_EPOCH, |dt| dt.with_timezone(&Utc));
        let appointment_id = event
            .extended_properties
            .and_then(|props| props.private)
            .and_then(|mut private| private.remove(APPOINTMENT_ID_PROPERTY));

        Self {
            id: event.id,
            summary: event.summary.unwrap_or_default(),
            description: event.description,
            location: event.location,
            starts_at: event.start.as_ref().and_then(EventTime::instant),
            ends_at: event.end.as_ref().and_then(EventTime::instant),
            status,
            updated_at,
            appointment_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleEventsResponse {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(rename = "nextSyncToken")]
    next_sync_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct WatchRequest<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchResponse {
    id: String,
    resource_id: String,
    /// Epoch milliseconds, as a string.
    expiration: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopRequest<'a> {
    id: &'a str,
    resource_id: &'a str,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use calsync_domain::TokenPair;
    use chrono::TimeZone;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    /// Hands out `token-1` until forced, then `token-2`.
    #[derive(Default)]
    struct StaticVault {
        forced: AtomicUsize,
    }

    #[async_trait]
    impl CredentialVault for StaticVault {
        async fn store(&self, _: &str, _: &str, _: &str, _: DateTime<Utc>) -> Result<()> {
            Ok(())
        }

        async fn retrieve(&self, _: &str) -> Result<TokenPair> {
            Err(CalSyncError::Internal("not used".into()))
        }

        async fn get_valid_access_token(&self, _: &str) -> Result<String> {
            Ok("token-1".into())
        }

        async fn force_refresh(&self, _: &str) -> Result<String> {
            self.forced.fetch_add(1, Ordering::SeqCst);
            Ok("token-2".into())
        }
    }

    fn client(server: &MockServer) -> (GoogleCalendarClient, Arc<StaticVault>) {
        let http = RateLimitedHttp::builder()
            .min_spacing(Duration::ZERO)
            .base_backoff(Duration::from_millis(5))
            .max_backoff(Duration::from_millis(20))
            .build()
            .unwrap();
        let vault = Arc::new(StaticVault::default());
        (GoogleCalendarClient::new(Arc::new(http), vault.clone(), server.uri()), vault)
    }

    fn connection() -> Connection {
        let mut conn = Connection::new("op-1", "primary", "owner@example.com", Utc::now());
        conn.id = "conn-1".into();
        conn
    }

    fn payload() -> EventPayload {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        EventPayload {
            appointment_id: "appt-1".into(),
            summary: "Consultation".into(),
            description: None,
            location: Some("Room 2".into()),
            starts_at: start,
            ends_at: start + chrono::Duration::minutes(30),
        }
    }

    fn event_json(id: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "status": status,
            "summary": "Consultation",
            "location": "Room 2",
            "start": { "dateTime": "2026-03-02T09:00:00Z" },
            "end": { "dateTime": "2026-03-02T09:30:00Z" },
            "updated": "2026-03-01T12:00:00.000Z",
            "extendedProperties": { "private": { "appointmentId": "appt-1" } }
        })
    }

    #[test]
    fn sub_second_appointment_round_trips_as_matching_event() {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 9, 46, 40).unwrap()
            + chrono::Duration::milliseconds(250);
        let appointment = calsync_domain::Appointment {
            id: "appt-1".into(),
            operator_id: "op-1".into(),
            title: "Consultation".into(),
            description: None,
            location: Some("Room 2".into()),
            starts_at: start,
            ends_at: start + chrono::Duration::minutes(30),
            status: calsync_domain::AppointmentStatus::Scheduled,
            updated_at: start,
        };
        let payload = EventPayload::from(&appointment);

        let mut wire = serde_json::to_value(GoogleEventBody::from(&payload)).unwrap();
        assert_eq!(wire["start"]["dateTime"], "2025-03-10T09:46:40Z");
        wire["id"] = serde_json::json!("evt-1");
        wire["status"] = serde_json::json!("confirmed");

        let echoed: GoogleEvent = serde_json::from_value(wire).unwrap();
        let event = ExternalEvent::from(echoed);
        assert!(event.matches(&payload), "echo of our own write should match");
        assert!(event.matches(&EventPayload::from(&appointment)));
    }

    #[tokio::test]
    async fn create_event_tags_appointment_and_parses_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .and(header("authorization", "Bearer token-1"))
            .and(body_partial_json(serde_json::json!({
                "summary": "Consultation",
                "start": { "dateTime": "2026-03-02T09:00:00Z" },
                "extendedProperties": { "private": { "appointmentId": "appt-1" } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(event_json("evt-1", "confirmed")))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        let event = client.create_event(&connection(), &payload()).await.unwrap();

        assert_eq!(event.id, "evt-1");
        assert_eq!(event.appointment_id.as_deref(), Some("appt-1"));
        assert!(event.matches(&payload()));
        assert_eq!(client.calls_in_window("conn-1"), 1);
    }

    #[tokio::test]
    async fn create_event_survives_three_throttled_attempts() {
        let server = MockServer::start().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        Mock::given(method("POST"))
            .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    ResponseTemplate::new(429)
                } else {
                    ResponseTemplate::new(200).set_body_json(event_json("evt-1", "confirmed"))
                }
            })
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        let event = client.create_event(&connection(), &payload()).await.unwrap();

        assert_eq!(event.id, "evt-1");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn unauthorized_forces_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer token-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(event_json("evt-1", "confirmed")))
            .expect(1)
            .mount(&server)
            .await;

        let (client, vault) = client(&server);
        let event = client.get_event(&connection(), "evt-1").await.unwrap();

        assert!(event.is_some());
        assert_eq!(vault.forced.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_unauthorized_revokes_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(401)).mount(&server).await;

        let (client, _) = client(&server);
        let err = client.get_event(&connection(), "evt-1").await.unwrap_err();
        assert!(matches!(err, CalSyncError::CredentialRevoked(_)));
    }

    #[tokio::test]
    async fn missing_and_cancelled_events_read_as_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events/gone"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events/cancelled"))
            .respond_with(ResponseTemplate::new(200).set_body_json(event_json("cancelled", "cancelled")))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        assert!(client.get_event(&connection(), "gone").await.unwrap().is_none());
        assert!(client.get_event(&connection(), "cancelled").await.unwrap().is_none());
        client.delete_event(&connection(), "gone").await.unwrap();
    }

    #[tokio::test]
    async fn update_of_missing_event_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PUT")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let (client, _) = client(&server);
        let err = client.update_event(&connection(), "evt-1", &payload()).await.unwrap_err();
        assert!(matches!(err, CalSyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn incremental_listing_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("syncToken", "sync-1"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [event_json("evt-2", "cancelled")],
                "nextSyncToken": "sync-2"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("syncToken", "sync-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [event_json("evt-1", "confirmed")],
                "nextPageToken": "page-2"
            })))
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        let changes = client
            .list_events_since(
                &connection(),
                &EventQuery::Incremental { sync_token: "sync-1".into() },
            )
            .await
            .unwrap();

        let ids: Vec<_> = changes.events.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(ids, vec!["evt-1", "evt-2"]);
        assert!(changes.events[1].is_cancelled());
        assert_eq!(changes.next_sync_token.as_deref(), Some("sync-2"));
    }

    #[tokio::test]
    async fn expired_sync_token_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(410)).mount(&server).await;

        let (client, _) = client(&server);
        let err = client
            .list_events_since(&connection(), &EventQuery::Incremental { sync_token: "old".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, CalSyncError::SyncTokenExpired(_)));
    }

    #[tokio::test]
    async fn window_listing_includes_deleted_single_events() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("showDeleted", "true"))
            .and(query_param("singleEvents", "true"))
            .and(query_param("timeMin", "2026-03-01T00:00:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "id": "all-day",
                    "start": { "date": "2026-03-05" },
                    "end": { "date": "2026-03-06" }
                }],
                "nextSyncToken": "sync-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let from = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let (client, _) = client(&server);
        let changes = client
            .list_events_since(
                &connection(),
                &EventQuery::Window { from, to: from + chrono::Duration::days(30) },
            )
            .await
            .unwrap();

        let event = &changes.events[0];
        assert_eq!(event.starts_at, Some(Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap()));
        assert_eq!(event.updated_at, DateTime::<Utc>::UNIX_EPOCH);
        assert!(event.appointment_id.is_none());
    }

    #[tokio::test]
    async fn watch_registers_web_hook_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events/watch"))
            .and(body_partial_json(serde_json::json!({
                "id": "chan-1",
                "type": "web_hook",
                "address": "https://sync.example.com/webhooks/google-calendar",
                "token": "shared"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "api#channel",
                "id": "chan-1",
                "resourceId": "res-1",
                "expiration": "1775124000000"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        let channel = client
            .watch_events(
                &connection(),
                "chan-1",
                "https://sync.example.com/webhooks/google-calendar",
                Some("shared"),
            )
            .await
            .unwrap();

        assert_eq!(channel.resource_id, "res-1");
        assert_eq!(channel.expires_at, from_millis(1_775_124_000_000));
    }

    #[tokio::test]
    async fn watch_on_missing_calendar_is_calendar_deleted() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let (client, _) = client(&server);
        let err = client
            .watch_events(&connection(), "chan-1", "https://sync.example.com/hook", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CalSyncError::CalendarDeleted(_)));
    }

    #[tokio::test]
    async fn stop_channel_posts_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/stop"))
            .and(body_partial_json(serde_json::json!({ "id": "chan-1", "resourceId": "res-1" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        client.stop_channel(&connection(), "chan-1", "res-1").await.unwrap();
    }
}
