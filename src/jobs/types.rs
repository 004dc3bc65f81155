//! 重排任务状态
//!
//! 生命周期：Pending -> InProgress -> {Completed, Failed}；终态不可再变（重试要新建任务）。
//! 取消最终也落到 Failed，错误种类为 cancelled。进度百分比只增不减，便于轮询方展示。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::ReorderError;
use crate::reorder::{HierarchyPhase, OrderMode, ReorderMethod, StrategyPlan, StyleSpec};

/// 任务 ID
pub type JobId = String;

/// 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// 合法迁移：Pending -> InProgress | Failed，InProgress -> Completed | Failed
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Failed)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// 任务边界上的稳定错误种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidOrdering,
    OracleUnavailable,
    BudgetExceeded,
    StaleToken,
    PartialApplication,
    Cancelled,
    PlaylistUnavailable,
    /// 进程重启时任务仍未结束
    Interrupted,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidOrdering => "invalid_ordering",
            Self::OracleUnavailable => "oracle_unavailable",
            Self::BudgetExceeded => "budget_exceeded",
            Self::StaleToken => "stale_token",
            Self::PartialApplication => "partial_application",
            Self::Cancelled => "cancelled",
            Self::PlaylistUnavailable => "playlist_unavailable",
            Self::Interrupted => "interrupted",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务失败详情
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

/// 任务当前所处步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    FetchingSnapshot,
    Enriching,
    Ordering,
    Categorizing,
    OrderingCategories,
    Assembling,
    Planning,
    Applying,
    Finished,
}

impl From<HierarchyPhase> for JobPhase {
    fn from(phase: HierarchyPhase) -> Self {
        match phase {
            HierarchyPhase::Categorizing => Self::Categorizing,
            HierarchyPhase::OrderingCategories => Self::OrderingCategories,
            HierarchyPhase::Assembling => Self::Assembling,
            HierarchyPhase::Done | HierarchyPhase::Failed => Self::Ordering,
        }
    }
}

/// 轮询方看到的任务快照（同时是持久化单元）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: JobId,
    pub playlist_id: String,
    pub style: StyleSpec,
    pub method: ReorderMethod,
    pub state: JobState,
    pub phase: JobPhase,
    /// 0 ~ 100，单调不减
    pub progress: u8,
    pub processed_tracks: usize,
    pub total_tracks: usize,
    #[serde(default)]
    pub order_mode: Option<OrderMode>,
    #[serde(default)]
    pub categories: Option<usize>,
    #[serde(default)]
    pub plan: Option<StrategyPlan>,
    /// 已落地的写调用数（逐条移动为移动条数，整体重写为批次数）
    pub moves_applied: usize,
    pub moves_total: usize,
    #[serde(default)]
    pub tracks_reordered: Option<usize>,
    /// 走了兜底的步骤说明
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(default)]
    pub error: Option<JobError>,
    /// 毫秒时间戳
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
}

impl JobStatus {
    pub fn new(playlist_id: impl Into<String>, style: StyleSpec, method: ReorderMethod) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: format!("job_{}", uuid::Uuid::new_v4()),
            playlist_id: playlist_id.into(),
            style,
            method,
            state: JobState::Pending,
            phase: JobPhase::Queued,
            progress: 0,
            processed_tracks: 0,
            total_tracks: 0,
            order_mode: None,
            categories: None,
            plan: None,
            moves_applied: 0,
            moves_total: 0,
            tracks_reordered: None,
            fallbacks: Vec::new(),
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// 状态迁移；非法迁移（包括从终态离开）返回错误且不修改
    pub fn transition(&mut self, next: JobState) -> Result<(), ReorderError> {
        if !self.state.can_transition_to(next) {
            return Err(ReorderError::IllegalTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        let now = chrono::Utc::now().timestamp_millis();
        self.state = next;
        match next {
            JobState::InProgress => self.started_at = Some(now),
            JobState::Completed | JobState::Failed => {
                self.completed_at = Some(now);
                self.phase = JobPhase::Finished;
            }
            JobState::Pending => {}
        }
        self.updated_at = now;
        Ok(())
    }

    /// 推进进度（只增不减，上限 100）
    pub fn advance(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    pub fn complete(&mut self, tracks_reordered: usize) -> Result<(), ReorderError> {
        self.transition(JobState::Completed)?;
        self.tracks_reordered = Some(tracks_reordered);
        self.processed_tracks = self.total_tracks;
        self.progress = 100;
        Ok(())
    }

    /// 记录错误种类与信息并进入 Failed
    pub fn fail(&mut self, err: &ReorderError) -> Result<(), ReorderError> {
        self.fail_with(err.kind(), err.to_string())
    }

    pub fn fail_with(&mut self, kind: ErrorKind, message: impl Into<String>) -> Result<(), ReorderError> {
        self.transition(JobState::Failed)?;
        self.error = Some(JobError {
            kind,
            message: message.into(),
        });
        Ok(())
    }

    /// 失败但已有移动落地
    pub fn is_partial(&self) -> bool {
        self.state == JobState::Failed && self.moves_applied > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorder::ReorderStyle;

    fn job() -> JobStatus {
        JobStatus::new("p1", StyleSpec::new(ReorderStyle::EnergyFlow), ReorderMethod::Auto)
    }

    #[test]
    fn test_lifecycle() {
        let mut status = job();
        assert!(status.id.starts_with("job_"));
        status.transition(JobState::InProgress).unwrap();
        assert!(status.started_at.is_some());
        status.total_tracks = 10;
        status.complete(4).unwrap();
        assert_eq!(status.progress, 100);
        assert_eq!(status.processed_tracks, 10);
        assert_eq!(status.tracks_reordered, Some(4));
        assert_eq!(status.phase, JobPhase::Finished);
    }

    #[test]
    fn test_terminal_is_final() {
        let mut status = job();
        status.transition(JobState::InProgress).unwrap();
        status.fail(&ReorderError::Cancelled).unwrap();
        assert_eq!(status.error.as_ref().map(|e| e.kind), Some(ErrorKind::Cancelled));
        assert!(matches!(
            status.transition(JobState::InProgress),
            Err(ReorderError::IllegalTransition { .. })
        ));
        assert!(status.complete(0).is_err());
        assert_eq!(status.state, JobState::Failed);
    }

    #[test]
    fn test_pending_cannot_complete() {
        let mut status = job();
        assert!(status.transition(JobState::Completed).is_err());
        assert!(status.transition(JobState::Failed).is_ok());
    }

    #[test]
    fn test_progress_monotonic() {
        let mut status = job();
        status.advance(40);
        status.advance(20);
        assert_eq!(status.progress, 40);
        status.advance(250);
        assert_eq!(status.progress, 100);
    }

    #[test]
    fn test_serde_shape() {
        let mut status = job();
        status.transition(JobState::InProgress).unwrap();
        status
            .fail(&ReorderError::BudgetExceeded {
                targeted: 9,
                rewrite: 3,
                max_calls: 2,
            })
            .unwrap();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["error"]["kind"], "budget_exceeded");
        let back: JobStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }
}
