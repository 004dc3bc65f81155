//! 核心层：错误与恢复、oracle 并发调度、按歌单互斥

pub mod error;
pub mod recovery;
pub mod task_scheduler;

pub use error::{RecoveryAction, ReorderError};
pub use recovery::{RecoveryEngine, RecoveryStage};
pub use task_scheduler::{PlaylistGuard, PlaylistLocks, TaskScheduler};
