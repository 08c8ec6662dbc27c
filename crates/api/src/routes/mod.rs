//! HTTP routes

pub mod connections;
pub mod cron;
pub mod health;
pub mod sync;
pub mod webhooks;

use std::sync::Arc;

use axum::middleware;
use axum::Router;

use crate::auth::require_secret;
use crate::context::AppContext;

/// Assemble the full router. Everything except the webhook receipt and the
/// health check requires the shared secret.
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let protected = Router::new()
        .merge(cron::router())
        .merge(sync::router())
        .merge(connections::router())
        .route_layer(middleware::from_fn_with_state(Arc::clone(&ctx), require_secret));

    Router::new()
        .merge(webhooks::router())
        .merge(health::router())
        .merge(protected)
        .with_state(ctx)
}
