//! # Calsync Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) for storage, the calendar provider and
//!   the credential vault
//! - The sync processor and its local-wins resolution rules
//! - Retry queue, webhook ingress, channel registration/renewal and status
//!   services
//!
//! ## Architecture Principles
//! - Only depends on `calsync-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits
//! - Time comes from an injected [`Clock`]

pub mod calendar_ports;
pub mod clock;
pub mod locks;
pub mod retry;
pub mod status;
pub mod sync;
pub mod webhooks;

pub use calendar_ports::{CalendarApi, CredentialVault};
pub use clock::{Clock, SystemClock};
pub use locks::KeyedLocks;
pub use retry::{RetryDrain, RetryHandler, RetryQueue, RetrySchedule, RetrySweepSummary};
pub use status::SyncStatusService;
pub use sync::ports::{
    AppointmentStore, ConnectionRepository, DispatchError, EventMappingRepository,
    RetryQueueRepository, SyncDispatcher, SyncJob, SyncLogRepository,
};
pub use sync::{Resolution, SyncProcessor, SyncProcessorConfig};
pub use webhooks::{
    ChannelRenewalService, IgnoreReason, IngressDecision, RenewalSettings, WebhookIngress,
    WebhookRegistrationService,
};
