//! Liveness endpoint

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::context::AppContext;

pub fn router() -> Router<Arc<AppContext>> {
    Router::new().route("/healthz", get(healthz))
}

/// GET /healthz - database round trip
async fn healthz(State(ctx): State<Arc<AppContext>>) -> (StatusCode, Json<Value>) {
    match ctx.check_database_health().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(err) => {
            tracing::warn!(error = %err, "database health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "unavailable" })))
        }
    }
}
