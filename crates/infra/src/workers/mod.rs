//! Background sync workers

pub mod pool;

pub use pool::{ChannelDispatcher, JobHandler, SyncWorkerPool, WorkerPoolConfig};
