//! Google Calendar push notification receipt
//!
//! Google retries anything that is not a 2xx, so every structurally valid
//! notification is acknowledged with 200 whatever the ingress decides. Only
//! a notification missing its channel id or resource state is a 400.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use calsync_domain::constants::{
    HEADER_CHANNEL_ID, HEADER_CHANNEL_TOKEN, HEADER_MESSAGE_NUMBER, HEADER_RESOURCE_ID,
    HEADER_RESOURCE_STATE,
};
use calsync_domain::{ResourceState, WebhookNotification};

use crate::context::AppContext;
use crate::error::{ApiError, ApiResult};

pub fn router() -> Router<Arc<AppContext>> {
    Router::new().route("/webhooks/google-calendar", post(receive))
}

/// POST /webhooks/google-calendar
async fn receive(State(ctx): State<Arc<AppContext>>, headers: HeaderMap) -> ApiResult<StatusCode> {
    let notification = parse_notification(&headers)?;

    match ctx.ingress.handle(&notification).await {
        Ok(decision) => {
            tracing::debug!(channel_id = %notification.channel_id, ?decision, "notification handled");
        }
        Err(err) => {
            tracing::error!(
                channel_id = %notification.channel_id,
                error = %err,
                "notification could not be processed"
            );
        }
    }
    Ok(StatusCode::OK)
}

fn parse_notification(headers: &HeaderMap) -> ApiResult<WebhookNotification> {
    let channel_id = header(headers, HEADER_CHANNEL_ID)
        .ok_or_else(|| ApiError::BadRequest(format!("missing {HEADER_CHANNEL_ID} header")))?;
    let raw_state = header(headers, HEADER_RESOURCE_STATE)
        .ok_or_else(|| ApiError::BadRequest(format!("missing {HEADER_RESOURCE_STATE} header")))?;
    let resource_state = raw_state.parse::<ResourceState>().map_err(ApiError::BadRequest)?;

    Ok(WebhookNotification {
        channel_id,
        resource_id: header(headers, HEADER_RESOURCE_ID).unwrap_or_default(),
        resource_state,
        message_number: header(headers, HEADER_MESSAGE_NUMBER).and_then(|n| n.parse().ok()),
        channel_token: header(headers, HEADER_CHANNEL_TOKEN),
    })
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
