//! Calendar connection lifecycle

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use calsync_core::{ConnectionRepository, CredentialVault};
use calsync_domain::{CalSyncError, Connection, WebhookChannel};
use calsync_infra::redact_email;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::AppContext;
use crate::error::{ApiError, ApiResult};

/// Reason recorded when an operator disconnects.
const DISCONNECTED_REASON: &str = "disconnected";

pub fn router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/connections", post(create_connection))
        .route("/connections/{connection_id}", delete(delete_connection))
}

/// Tokens from a completed OAuth consent.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConnectionRequest {
    operator_id: String,
    #[serde(default = "primary_calendar")]
    calendar_id: String,
    account_email: String,
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

fn primary_calendar() -> String {
    "primary".to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateConnectionResponse {
    connection_id: String,
    webhook_channel: Option<WebhookChannel>,
}

/// POST /connections - store a newly consented account
///
/// The operator's previous connection is replaced. A channel that cannot be
/// registered yet is left to the next renewal sweep.
async fn create_connection(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<CreateConnectionRequest>,
) -> ApiResult<(StatusCode, Json<CreateConnectionResponse>)> {
    if request.operator_id.trim().is_empty() || request.refresh_token.is_empty() {
        return Err(ApiError::BadRequest("operatorId and refreshToken are required".into()));
    }

    if let Some(previous) = ctx.connections.find_active_by_operator(&request.operator_id).await? {
        if let Err(err) = ctx.registration.stop(&previous.id).await {
            tracing::warn!(connection_id = %previous.id, error = %err, "previous channel not stopped");
        }
    }

    let connection = Connection::new(
        request.operator_id.as_str(),
        request.calendar_id.as_str(),
        request.account_email.as_str(),
        Utc::now(),
    );
    ctx.connections.insert(&connection).await?;
    ctx.vault
        .store(&connection.id, &request.access_token, &request.refresh_token, request.expires_at)
        .await?;

    tracing::info!(
        connection_id = %connection.id,
        operator_id = %connection.operator_id,
        account = %redact_email(&connection.account_email),
        "calendar connected"
    );

    let webhook_channel = match ctx.registration.ensure(&connection.id).await {
        Ok(channel) => channel,
        Err(err) if err.is_fatal_to_connection() => return Err(err.into()),
        Err(err) => {
            tracing::warn!(connection_id = %connection.id, error = %err, "channel registration deferred");
            None
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(CreateConnectionResponse { connection_id: connection.id, webhook_channel }),
    ))
}

/// DELETE /connections/{connection_id} - stop the channel and deactivate
async fn delete_connection(
    State(ctx): State<Arc<AppContext>>,
    Path(connection_id): Path<String>,
) -> ApiResult<StatusCode> {
    let connection = ctx
        .connections
        .find(&connection_id)
        .await?
        .ok_or_else(|| CalSyncError::NotFound(format!("connection {connection_id}")))?;

    if let Err(err) = ctx.registration.stop(&connection.id).await {
        tracing::warn!(%connection_id, error = %err, "channel stop failed; deactivating anyway");
    }
    ctx.connections.deactivate(&connection.id, DISCONNECTED_REASON).await?;

    tracing::info!(
        %connection_id,
        account = %redact_email(&connection.account_email),
        "calendar disconnected"
    );
    Ok(StatusCode::NO_CONTENT)
}
