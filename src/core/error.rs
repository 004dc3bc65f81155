//! 重排错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 ReorderError 决定 FallbackToHeuristic / IdentityOrder / ResnapshotAndResume / FailJob。
//! 任务边界上每个错误都折算为稳定的 ErrorKind 标签，连同可读信息写入 JobStatus。

use thiserror::Error;

use crate::jobs::ErrorKind;
use crate::oracle::OracleError;
use crate::playlist::PlaylistError;
use crate::reorder::{InvalidMove, OrderingViolation};

/// 重排过程中可能出现的错误（排列非法、oracle 不可用、预算、并发令牌、部分应用等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReorderError {
    #[error("Invalid ordering: {0}")]
    InvalidOrdering(#[from] OrderingViolation),

    #[error("Invalid move: {0}")]
    InvalidMove(#[from] InvalidMove),

    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error(
        "Budget exceeded: {targeted} move(s) or {rewrite} rewrite call(s) needed, at most {max_calls} allowed; reduce playlist size or raise the budget"
    )]
    BudgetExceeded {
        targeted: usize,
        rewrite: usize,
        max_calls: usize,
    },

    #[error("Snapshot of playlist {playlist_id} went stale twice; the playlist may be edited concurrently")]
    StaleToken { playlist_id: String },

    #[error("Partially applied: {applied}/{total} write call(s) executed before failure: {cause}")]
    PartialApplication {
        applied: usize,
        total: usize,
        cause: String,
    },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Playlist {0} already has a job in progress")]
    PlaylistBusy(String),

    #[error("Playlist error: {0}")]
    Playlist(#[from] PlaylistError),

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Illegal job transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<OracleError> for ReorderError {
    fn from(err: OracleError) -> Self {
        Self::OracleUnavailable(err.to_string())
    }
}

impl ReorderError {
    /// 对外稳定的错误种类标签
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidOrdering(_) | Self::InvalidMove(_) => ErrorKind::InvalidOrdering,
            Self::OracleUnavailable(_) => ErrorKind::OracleUnavailable,
            Self::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            Self::StaleToken { .. } | Self::Playlist(PlaylistError::StaleSnapshot { .. }) => {
                ErrorKind::StaleToken
            }
            Self::PartialApplication { .. } => ErrorKind::PartialApplication,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::PlaylistBusy(_) | Self::Playlist(_) => ErrorKind::PlaylistUnavailable,
            Self::Store(_) | Self::IllegalTransition { .. } | Self::Config(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 丢弃 oracle 输出，改用确定性启发式排序
    FallbackToHeuristic,
    /// 保持该分组原有相对顺序
    IdentityOrder,
    /// 重新拉取快照，基于最新顺序重算剩余移动
    ResnapshotAndResume,
    /// 终止任务并记录错误种类
    FailJob,
}
