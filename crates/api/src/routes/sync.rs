//! Sync triggers and status

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use calsync_core::{
    AppointmentStore, ConnectionRepository, DispatchError, EventMappingRepository, SyncJob,
};
use calsync_domain::{
    Appointment, BulkSyncReport, BulkSyncRequest, CalSyncError, ConnectionHealth, RetryQueueItem,
    SyncType,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::context::AppContext;
use crate::error::{ApiError, ApiResult};

pub fn router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/sync/bulk", post(bulk_sync))
        .route("/sync/status", get(status))
        .route("/sync/appointments/{appointment_id}", post(push_appointment))
}

/// POST /sync/bulk - reconcile every appointment in a date range
async fn bulk_sync(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<BulkSyncRequest>,
) -> ApiResult<Json<BulkSyncReport>> {
    let report = ctx.processor.bulk_sync(request).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusQuery {
    operator_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    connections: Vec<ConnectionHealth>,
}

/// GET /sync/status - connection health for the dashboard
async fn status(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<StatusResponse>> {
    let connections = ctx.status.overview(query.operator_id.as_deref()).await?;
    Ok(Json(StatusResponse { connections }))
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum PushState {
    Dispatched,
    Queued,
    /// The operator has no active calendar connection.
    NoConnection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushResponse {
    appointment_id: String,
    connection_id: Option<String>,
    status: PushState,
}

/// POST /sync/appointments/{appointment_id} - push trigger after a local
/// change. An optional JSON body carries the current appointment and is
/// stored before the job is dispatched.
async fn push_appointment(
    State(ctx): State<Arc<AppContext>>,
    Path(appointment_id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<PushResponse>)> {
    let appointment = if body.iter().all(u8::is_ascii_whitespace) {
        ctx.appointments.get(&appointment_id).await?
    } else {
        let appointment: Appointment = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid appointment body: {e}")))?;
        if appointment.id != appointment_id {
            return Err(ApiError::BadRequest(format!(
                "body is for appointment {}, not {appointment_id}",
                appointment.id
            )));
        }
        ctx.appointments.upsert(&appointment).await?;
        Some(appointment)
    };

    let connection_id = match &appointment {
        Some(appointment) => ctx
            .connections
            .find_active_by_operator(&appointment.operator_id)
            .await?
            .map(|connection| connection.id),
        None => ctx.mappings.find(&appointment_id).await?.map(|mapping| mapping.connection_id),
    };

    let Some(connection_id) = connection_id else {
        if appointment.is_none() {
            return Err(CalSyncError::NotFound(format!("appointment {appointment_id}")).into());
        }
        return Ok((
            StatusCode::ACCEPTED,
            Json(PushResponse { appointment_id, connection_id: None, status: PushState::NoConnection }),
        ));
    };

    let job = SyncJob::Appointment {
        connection_id: connection_id.clone(),
        appointment_id: appointment_id.clone(),
        sync_type: SyncType::Push,
    };
    let status = match ctx.dispatcher.try_dispatch(job) {
        Ok(()) => PushState::Dispatched,
        Err(DispatchError::Saturated(_) | DispatchError::Closed(_)) => {
            tracing::warn!(%connection_id, %appointment_id, "sync workers unavailable; queueing push");
            let item = RetryQueueItem::sync_appointment(
                &connection_id,
                &appointment_id,
                SyncType::Push,
                Utc::now(),
            )
            .with_error("sync workers saturated");
            ctx.retry_queue.enqueue_immediate(item).await?;
            PushState::Queued
        }
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(PushResponse { appointment_id, connection_id: Some(connection_id), status }),
    ))
}
