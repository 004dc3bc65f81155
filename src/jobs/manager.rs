//! 任务管理：受理、后台执行、状态查询、取消、重启恢复
//!
//! 同一歌单同一时刻只允许一个任务（第二个直接拒绝）；不同歌单的任务并行。
//! 任务总会落到终态：执行器 panic 也会被记为 internal 失败。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{PlaylistLocks, ReorderError};
use crate::jobs::{ErrorKind, JobId, JobRunner, JobState, JobStatus, JobStore, JobTracker};
use crate::reorder::{ReorderMethod, StyleSpec};

/// 运行中的任务
struct LiveJob {
    tracker: JobTracker,
    cancel: CancellationToken,
}

/// 已受理任务的句柄
pub struct JobHandle {
    pub job_id: JobId,
    task: JoinHandle<JobStatus>,
}

impl JobHandle {
    /// 等待任务结束，返回终态
    pub async fn wait(self) -> Result<JobStatus, ReorderError> {
        self.task
            .await
            .map_err(|e| ReorderError::Internal(format!("job task failed: {e}")))
    }
}

/// 任务管理器
#[derive(Clone)]
pub struct JobManager {
    runner: Arc<JobRunner>,
    store: Arc<dyn JobStore>,
    locks: PlaylistLocks,
    live: Arc<RwLock<HashMap<JobId, LiveJob>>>,
}

impl JobManager {
    pub fn new(runner: JobRunner, store: Arc<dyn JobStore>) -> Self {
        Self {
            runner: Arc::new(runner),
            store,
            locks: PlaylistLocks::new(),
            live: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 受理重排请求并在后台执行；歌单已有任务在跑时返回 PlaylistBusy
    pub async fn start_job(
        &self,
        playlist_id: &str,
        style: StyleSpec,
        method: ReorderMethod,
    ) -> Result<JobHandle, ReorderError> {
        let guard = self.locks.try_acquire(playlist_id)?;

        let status = JobStatus::new(playlist_id, style, method);
        let job_id = status.id.clone();
        self.store
            .save(&status)
            .await
            .map_err(|e| ReorderError::Store(e.to_string()))?;

        let tracker = JobTracker::new(status, self.store.clone());
        let cancel = CancellationToken::new();
        self.live.write().await.insert(
            job_id.clone(),
            LiveJob {
                tracker: tracker.clone(),
                cancel: cancel.clone(),
            },
        );
        tracing::info!(job_id = %job_id, playlist_id, "reorder job accepted");

        let runner = self.runner.clone();
        let live = self.live.clone();
        let id = job_id.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = tracker.commit(|s| s.transition(JobState::InProgress)).await {
                tracing::error!(job_id = %id, "cannot start job: {}", e);
            }

            // 执行器在独立任务里跑，panic 也能落到终态
            let inner = {
                let runner = runner.clone();
                let tracker = tracker.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { runner.run(&tracker, &cancel).await })
            };
            let outcome = inner
                .await
                .unwrap_or_else(|e| Err(ReorderError::Internal(format!("job runner crashed: {e}"))));

            let finished = tracker.update(|s| match &outcome {
                Ok(reordered) => s.complete(*reordered),
                Err(err) => s.fail(err),
            });
            if let Err(e) = finished {
                tracing::error!(job_id = %id, "cannot finish job: {}", e);
            }
            tracker.persist().await;

            match &outcome {
                Ok(reordered) => tracing::info!(job_id = %id, tracks_reordered = reordered, "reorder job completed"),
                Err(err) => tracing::warn!(job_id = %id, kind = %err.kind(), "reorder job failed: {}", err),
            }

            live.write().await.remove(&id);
            tracker.snapshot()
        });

        Ok(JobHandle { job_id, task })
    }

    /// 当前状态：运行中的取内存，否则查存储
    pub async fn get_status(&self, job_id: &str) -> Result<Option<JobStatus>, ReorderError> {
        if let Some(job) = self.live.read().await.get(job_id) {
            return Ok(Some(job.tracker.snapshot()));
        }
        self.store
            .load(job_id)
            .await
            .map_err(|e| ReorderError::Store(e.to_string()))
    }

    /// 请求取消；在下一个离散步骤之前生效，已落地的移动不回滚。任务不存在或已结束时返回 false
    pub async fn cancel(&self, job_id: &str) -> bool {
        match self.live.read().await.get(job_id) {
            Some(job) => {
                tracing::info!(job_id, "cancellation requested");
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobStatus>, ReorderError> {
        self.store
            .list()
            .await
            .map_err(|e| ReorderError::Store(e.to_string()))
    }

    pub fn is_playlist_busy(&self, playlist_id: &str) -> bool {
        self.locks.is_busy(playlist_id)
    }

    /// 启动时调用：上次进程退出时仍未结束的任务记为 interrupted 失败
    pub async fn recover_interrupted(&self) -> Result<Vec<JobId>, ReorderError> {
        let live = self.live.read().await;
        let mut recovered = Vec::new();
        for mut status in self.list_jobs().await? {
            if status.is_terminal() || live.contains_key(&status.id) {
                continue;
            }
            status.fail_with(
                ErrorKind::Interrupted,
                format!(
                    "process stopped while job was {} ({}/{} write call(s) applied); re-snapshot and start a new job",
                    status.state, status.moves_applied, status.moves_total
                ),
            )?;
            self.store
                .save(&status)
                .await
                .map_err(|e| ReorderError::Store(e.to_string()))?;
            tracing::warn!(job_id = %status.id, playlist_id = %status.playlist_id, "marked interrupted job as failed");
            recovered.push(status.id);
        }
        Ok(recovered)
    }
}
