//! 错误恢复引擎
//!
//! 根据 ReorderError 与出错位置返回 RecoveryAction，供排序器与移动执行器决定是兜底、保序、重新快照还是终止。

use crate::core::{RecoveryAction, ReorderError};
use crate::playlist::PlaylistError;

/// 出错位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    /// 单批排序（含分类内排序的每个子块）
    SingleBatch,
    /// 分层排序中某个分类的整体任务（超时 / panic）
    CategoryOrdering,
    /// 远端移动执行；记录已用掉的重新快照次数
    MoveExecution { resnapshots: u32 },
}

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug)]
pub struct RecoveryEngine {
    /// 并发令牌失效时允许的重新快照次数（默认 1，第二次即终止）
    max_resnapshots: u32,
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self { max_resnapshots: 1 }
    }

    pub fn with_max_resnapshots(mut self, n: u32) -> Self {
        self.max_resnapshots = n;
        self
    }

    pub fn handle(&self, err: &ReorderError, stage: RecoveryStage) -> RecoveryAction {
        match (stage, err) {
            (_, ReorderError::Cancelled) => RecoveryAction::FailJob,
            (
                RecoveryStage::SingleBatch,
                ReorderError::InvalidOrdering(_) | ReorderError::OracleUnavailable(_),
            ) => RecoveryAction::FallbackToHeuristic,
            (RecoveryStage::CategoryOrdering, _) => RecoveryAction::IdentityOrder,
            (
                RecoveryStage::MoveExecution { resnapshots },
                ReorderError::Playlist(PlaylistError::StaleSnapshot { .. }),
            ) if resnapshots < self.max_resnapshots => RecoveryAction::ResnapshotAndResume,
            _ => RecoveryAction::FailJob,
        }
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorder::OrderingViolation;

    fn stale() -> ReorderError {
        ReorderError::Playlist(PlaylistError::StaleSnapshot {
            playlist_id: "p1".into(),
        })
    }

    #[test]
    fn test_invalid_ordering_falls_back() {
        let engine = RecoveryEngine::new();
        let err = ReorderError::InvalidOrdering(OrderingViolation::Missing("e".into()));
        assert_eq!(
            engine.handle(&err, RecoveryStage::SingleBatch),
            RecoveryAction::FallbackToHeuristic
        );
    }

    #[test]
    fn test_oracle_unavailable_falls_back() {
        let engine = RecoveryEngine::new();
        let err = ReorderError::OracleUnavailable("timeout".into());
        assert_eq!(
            engine.handle(&err, RecoveryStage::SingleBatch),
            RecoveryAction::FallbackToHeuristic
        );
    }

    #[test]
    fn test_category_failure_keeps_identity() {
        let engine = RecoveryEngine::new();
        let err = ReorderError::Internal("task panicked".into());
        assert_eq!(
            engine.handle(&err, RecoveryStage::CategoryOrdering),
            RecoveryAction::IdentityOrder
        );
    }

    #[test]
    fn test_stale_token_resnapshots_once() {
        let engine = RecoveryEngine::new();
        assert_eq!(
            engine.handle(&stale(), RecoveryStage::MoveExecution { resnapshots: 0 }),
            RecoveryAction::ResnapshotAndResume
        );
        assert_eq!(
            engine.handle(&stale(), RecoveryStage::MoveExecution { resnapshots: 1 }),
            RecoveryAction::FailJob
        );
    }

    #[test]
    fn test_move_timeout_is_fatal() {
        let engine = RecoveryEngine::new();
        let err = ReorderError::Playlist(PlaylistError::Timeout);
        assert_eq!(
            engine.handle(&err, RecoveryStage::MoveExecution { resnapshots: 0 }),
            RecoveryAction::FailJob
        );
    }

    #[test]
    fn test_cancelled_fails_everywhere() {
        let engine = RecoveryEngine::new();
        for stage in [
            RecoveryStage::SingleBatch,
            RecoveryStage::CategoryOrdering,
            RecoveryStage::MoveExecution { resnapshots: 0 },
        ] {
            assert_eq!(
                engine.handle(&ReorderError::Cancelled, stage),
                RecoveryAction::FailJob
            );
        }
    }
}
