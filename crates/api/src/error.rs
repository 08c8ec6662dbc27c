//! HTTP error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use calsync_domain::CalSyncError;
use serde::Serialize;
use thiserror::Error;

/// Standard API error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

/// Errors surfaced by route handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid secret")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Domain(#[from] CalSyncError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Domain(err) => match err {
                CalSyncError::NotFound(_) => StatusCode::NOT_FOUND,
                CalSyncError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                CalSyncError::CredentialRevoked(_) | CalSyncError::CalendarDeleted(_) => {
                    StatusCode::CONFLICT
                }
                err if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Body text. Provider and storage details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::Unauthorized | Self::BadRequest(_) => self.to_string(),
            Self::Domain(err @ (CalSyncError::NotFound(_) | CalSyncError::InvalidInput(_))) => {
                err.to_string()
            }
            Self::Domain(err) => err.user_message().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let code = match &self {
            Self::Domain(err) => Some(err.code()),
            Self::Unauthorized | Self::BadRequest(_) => None,
        };
        let body = Json(ErrorResponse { error: self.public_message(), code });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
