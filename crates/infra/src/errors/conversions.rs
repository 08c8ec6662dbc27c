//! Conversions from external infrastructure errors into domain errors.

use calsync_domain::CalSyncError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub CalSyncError);

impl From<InfraError> for CalSyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<CalSyncError> for InfraError {
    fn from(value: CalSyncError) -> Self {
        InfraError(value)
    }
}

impl std::fmt::Display for InfraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for InfraError {}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoCalSyncError {
    fn into_calsync(self) -> CalSyncError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → CalSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCalSyncError for SqlError {
    fn into_calsync(self) -> CalSyncError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        fn looks_like_wrong_key(message: &str) -> bool {
            let lower = message.to_ascii_lowercase();
            lower.contains("not a database") || lower.contains("encrypted")
        }

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => {
                        CalSyncError::Database("database is busy".into())
                    }
                    (ErrorCode::DatabaseLocked, _) => {
                        CalSyncError::Database("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 2067) => {
                        CalSyncError::Database("unique constraint violation".into())
                    }
                    (ErrorCode::ConstraintViolation, 787) => {
                        CalSyncError::Database("foreign key constraint violation".into())
                    }
                    (_, _) if looks_like_wrong_key(&message) => CalSyncError::Security(
                        "SQLCipher key rejected or database not encrypted".into(),
                    ),
                    _ => CalSyncError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => CalSyncError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                CalSyncError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, _, ty) => {
                CalSyncError::Database(format!("invalid column type: {ty}"))
            }
            RE::Utf8Error(_) => CalSyncError::Database("invalid UTF-8 returned from sqlite".into()),
            RE::InvalidParameterName(parameter_name) => {
                CalSyncError::Database(format!("invalid parameter name: {parameter_name}"))
            }
            RE::InvalidQuery => CalSyncError::Database("invalid SQL query".into()),
            other => CalSyncError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_calsync())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → CalSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCalSyncError for r2d2::Error {
    fn into_calsync(self) -> CalSyncError {
        let message = self.to_string();
        let lower = message.to_ascii_lowercase();
        if lower.contains("not a database") || lower.contains("encrypted") {
            CalSyncError::Security("SQLCipher key rejected or database not encrypted".into())
        } else if lower.contains("timed out") {
            CalSyncError::Database("timed out waiting for a pooled connection".into())
        } else {
            CalSyncError::Database(format!("connection pool error: {message}"))
        }
    }
}

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        InfraError(value.into_calsync())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → CalSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCalSyncError for HttpError {
    fn into_calsync(self) -> CalSyncError {
        if self.is_timeout() {
            return CalSyncError::Timeout("HTTP request timed out".into());
        }

        if self.is_connect() {
            return CalSyncError::ProviderUnavailable("HTTP connection failure".into());
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                401 | 403 => CalSyncError::CredentialRevoked(message),
                404 | 410 => CalSyncError::NotFound(message),
                429 => CalSyncError::RateLimitExceeded(message),
                400..=499 => CalSyncError::InvalidInput(message),
                _ => CalSyncError::ProviderUnavailable(message),
            };
        }

        if self.is_decode() {
            return CalSyncError::ProviderUnavailable(format!("malformed provider response: {self}"));
        }

        CalSyncError::ProviderUnavailable(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_calsync())
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json::Error → CalSyncError */
/* -------------------------------------------------------------------------- */

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(CalSyncError::Internal(format!("JSON serialization failed: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
