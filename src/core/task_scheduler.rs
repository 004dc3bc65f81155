//! 任务调度：oracle 并发池与按歌单的互斥
//!
//! oracle 调用（分类内排序、分块分类）使用 Semaphore 限制并发；
//! 同一歌单同一时刻只允许一个任务写入（并发令牌是单写者资源），不同歌单互不阻塞。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::core::ReorderError;

/// 任务调度器
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    /// oracle 并发限制（默认 3）
    oracle_semaphore: Arc<Semaphore>,
}

impl TaskScheduler {
    pub fn new(max_concurrent_oracle_calls: usize) -> Self {
        Self {
            oracle_semaphore: Arc::new(Semaphore::new(max_concurrent_oracle_calls.max(1))),
        }
    }

    /// 获取 oracle 调用许可
    pub async fn acquire_oracle(&self) -> Result<OwnedSemaphorePermit, ReorderError> {
        self.oracle_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ReorderError::Internal("oracle semaphore closed".to_string()))
    }

    /// 当前可用许可数
    pub fn available_permits(&self) -> usize {
        self.oracle_semaphore.available_permits()
    }

    /// 检查是否应取消（各离散步骤之间调用）
    pub fn check_cancelled(token: &CancellationToken) -> Result<(), ReorderError> {
        if token.is_cancelled() {
            Err(ReorderError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}

/// 按歌单 id 的互斥锁表
#[derive(Debug, Default, Clone)]
pub struct PlaylistLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

/// 持有期间该歌单被独占；drop 即释放
#[derive(Debug)]
pub struct PlaylistGuard {
    playlist_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl PlaylistGuard {
    pub fn playlist_id(&self) -> &str {
        &self.playlist_id
    }
}

impl PlaylistLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试独占歌单；已有任务在跑时返回 PlaylistBusy（不排队）
    pub fn try_acquire(&self, playlist_id: &str) -> Result<PlaylistGuard, ReorderError> {
        let lock = {
            let mut map = self
                .locks
                .lock()
                .map_err(|_| ReorderError::Internal("playlist lock table poisoned".to_string()))?;
            map.entry(playlist_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        let guard = lock
            .try_lock_owned()
            .map_err(|_| ReorderError::PlaylistBusy(playlist_id.to_string()))?;

        Ok(PlaylistGuard {
            playlist_id: playlist_id.to_string(),
            _guard: guard,
        })
    }

    /// 歌单当前是否被占用
    pub fn is_busy(&self, playlist_id: &str) -> bool {
        self.locks
            .lock()
            .ok()
            .and_then(|map| map.get(playlist_id).cloned())
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playlist_lock_is_exclusive_per_id() {
        let locks = PlaylistLocks::new();
        let guard = locks.try_acquire("p1").unwrap();
        assert_eq!(guard.playlist_id(), "p1");
        assert!(matches!(
            locks.try_acquire("p1"),
            Err(ReorderError::PlaylistBusy(id)) if id == "p1"
        ));
        // 其他歌单不受影响
        let other = locks.try_acquire("p2").unwrap();
        assert!(locks.is_busy("p1"));
        drop(guard);
        assert!(!locks.is_busy("p1"));
        assert!(locks.try_acquire("p1").is_ok());
        drop(other);
    }

    #[tokio::test]
    async fn test_oracle_permits_bounded() {
        let scheduler = TaskScheduler::new(2);
        let a = scheduler.acquire_oracle().await.unwrap();
        let _b = scheduler.acquire_oracle().await.unwrap();
        assert_eq!(scheduler.available_permits(), 0);
        drop(a);
        assert_eq!(scheduler.available_permits(), 1);
    }

    #[test]
    fn test_check_cancelled() {
        let token = CancellationToken::new();
        assert!(TaskScheduler::check_cancelled(&token).is_ok());
        token.cancel();
        assert_eq!(
            TaskScheduler::check_cancelled(&token),
            Err(ReorderError::Cancelled)
        );
    }
}
