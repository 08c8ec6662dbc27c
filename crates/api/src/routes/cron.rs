//! Cron-triggered maintenance

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use calsync_domain::RenewalSummary;

use crate::context::AppContext;
use crate::error::ApiResult;

pub fn router() -> Router<Arc<AppContext>> {
    Router::new().route("/cron/renew-channels", post(renew_channels))
}

/// POST /cron/renew-channels - one renewal sweep
async fn renew_channels(State(ctx): State<Arc<AppContext>>) -> ApiResult<Json<RenewalSummary>> {
    let summary = ctx.renewal.run_once().await?;
    tracing::info!(
        total = summary.total,
        renewed = summary.renewed,
        failed = summary.failed,
        "renewal triggered over HTTP"
    );
    Ok(Json(summary))
}
