//! 单个任务的状态持有者：内存中即时更新，在离散步骤之间落盘

use std::sync::{Arc, Mutex};

use crate::jobs::{JobStatus, JobStore};

/// 任务状态 + 存储；可跨任务克隆共享
#[derive(Clone)]
pub struct JobTracker {
    status: Arc<Mutex<JobStatus>>,
    store: Arc<dyn JobStore>,
}

impl JobTracker {
    pub fn new(status: JobStatus, store: Arc<dyn JobStore>) -> Self {
        Self {
            status: Arc::new(Mutex::new(status)),
            store,
        }
    }

    pub fn job_id(&self) -> String {
        self.snapshot().id
    }

    /// 当前状态副本
    pub fn snapshot(&self) -> JobStatus {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// 同步修改（进度回调等不能 await 的地方用）
    pub fn update<R>(&self, f: impl FnOnce(&mut JobStatus) -> R) -> R {
        let mut guard = self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// 写入存储；失败只记日志，不影响任务本身
    pub async fn persist(&self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::warn!(job_id = %snapshot.id, "failed to persist job status: {}", e);
        }
    }

    /// 修改并落盘
    pub async fn commit<R>(&self, f: impl FnOnce(&mut JobStatus) -> R) -> R {
        let out = self.update(f);
        self.persist().await;
        out
    }
}
