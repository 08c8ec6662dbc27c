//! Database implementations

pub mod appointment_repository;
pub mod connection_repository;
pub mod event_mapping_repository;
pub mod manager;
pub mod pool;
pub mod retry_queue_repository;
pub mod sync_log_repository;

use std::str::FromStr;

pub use appointment_repository::SqlCipherAppointmentStore;
use calsync_domain::CalSyncError;
pub use connection_repository::SqlCipherConnectionRepository;
pub use event_mapping_repository::SqlCipherEventMappingRepository;
pub use manager::DbManager;
pub use pool::{SqlCipherConnection, SqlCipherPool, SqlCipherPoolConfig};
pub use retry_queue_repository::SqlCipherRetryQueueRepository;
use rusqlite::types::Type;
pub use sync_log_repository::SqlCipherSyncLogRepository;
use tokio::task;

use crate::errors::InfraError;

// ============================================================================
// Error Mapping
// ============================================================================

pub(crate) fn map_sql_error(err: rusqlite::Error) -> CalSyncError {
    CalSyncError::from(InfraError::from(err))
}

pub(crate) fn map_join_error(err: task::JoinError) -> CalSyncError {
    if err.is_cancelled() {
        CalSyncError::Internal("blocking task cancelled".into())
    } else {
        CalSyncError::Internal(format!("blocking task failed: {err}"))
    }
}

/// Parse a TEXT column holding one of the persisted enum strings.
pub(crate) fn parse_text_column<T>(index: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    value.parse::<T>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::from(err))
    })
}
