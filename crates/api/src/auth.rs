//! Shared-secret guard for cron and admin routes.
//!
//! The secret arrives as `Authorization: Bearer <secret>` or as a `secret`
//! query parameter, for schedulers that cannot set headers.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::context::AppContext;
use crate::error::ApiError;

/// Reject the request with 401 unless it carries the configured secret.
pub async fn require_secret(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    match presented_secret(&request) {
        Some(secret) if ctx.verify_secret(&secret) => next.run(request).await,
        _ => {
            tracing::warn!(path = %request.uri().path(), "request without a valid secret rejected");
            ApiError::Unauthorized.into_response()
        }
    }
}

fn presented_secret(request: &Request) -> Option<String> {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());
    if bearer.is_some() {
        return bearer;
    }

    request.uri().query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "secret")
            .map(|(_, value)| value.into_owned())
    })
}

#[cfg(test)]
mod tests {
    use axum::body::Body;

    use super::*;

    fn request(uri: &str, authorization: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn bearer_header_wins_over_query() {
        let req = request("/cron/renew-channels?secret=query", Some("Bearer header"));
        assert_eq!(presented_secret(&req).as_deref(), Some("header"));
    }

    #[test]
    fn query_secret_is_decoded() {
        let req = request("/cron/renew-channels?x=1&secret=a%2Bb", None);
        assert_eq!(presented_secret(&req).as_deref(), Some("a+b"));
    }

    #[test]
    fn other_schemes_are_ignored() {
        let req = request("/sync/status", Some("Basic dXNlcjpwYXNz"));
        assert_eq!(presented_secret(&req), None);
    }
}
