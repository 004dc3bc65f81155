//! 重排任务：状态机、持久化、流水线与管理

pub mod manager;
pub mod runner;
pub mod store;
pub mod tracker;
pub mod types;

pub use manager::{JobHandle, JobManager};
pub use runner::{EnrichSettings, JobRunner, RemoteSettings};
#[cfg(feature = "async-sqlite")]
pub use store::SqliteJobStore;
pub use store::{FileJobStore, InMemoryJobStore, JobStore, StoreError};
pub use tracker::JobTracker;
pub use types::{ErrorKind, JobError, JobId, JobPhase, JobState, JobStatus};
