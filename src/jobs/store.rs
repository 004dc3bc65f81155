//! 任务状态持久化：save / load / list 的键值契约
//!
//! - InMemoryJobStore：进程内（测试、一次性运行）
//! - FileJobStore：每个任务一个 JSON 文件，先写临时文件再 rename
//! - SqliteJobStore（feature = "async-sqlite"）：sqlx 异步 SQLite，整条状态存 JSON

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::jobs::JobStatus;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("job store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job record is corrupt: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("job store database error: {0}")]
    Database(String),
}

/// 任务状态存储
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save(&self, status: &JobStatus) -> Result<(), StoreError>;

    async fn load(&self, job_id: &str) -> Result<Option<JobStatus>, StoreError>;

    /// 全部任务，按创建时间升序
    async fn list(&self) -> Result<Vec<JobStatus>, StoreError>;
}

/// 内存存储
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, JobStatus>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn save(&self, status: &JobStatus) -> Result<(), StoreError> {
        self.jobs
            .write()
            .await
            .insert(status.id.clone(), status.clone());
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<JobStatus>, StoreError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn list(&self) -> Result<Vec<JobStatus>, StoreError> {
        let mut all: Vec<JobStatus> = self.jobs.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }
}

/// 目录下每个任务一个 `<job_id>.json`
#[derive(Debug)]
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    /// 目录不存在时创建
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, job_id: &str) -> PathBuf {
        // id 由 uuid 生成；仍过滤路径分隔符，防止越出目录
        let safe: String = job_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn save(&self, status: &JobStatus) -> Result<(), StoreError> {
        let path = self.path_for(&status.id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(status)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<JobStatus>, StoreError> {
        match tokio::fs::read(self.path_for(job_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<JobStatus>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut all = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<JobStatus>(&bytes) {
                Ok(status) => all.push(status),
                Err(e) => tracing::warn!(path = %path.display(), "skipping corrupt job record: {}", e),
            }
        }
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }
}

#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteJobStore;

#[cfg(feature = "async-sqlite")]
mod sqlite {
    use std::path::Path;

    use async_trait::async_trait;
    use sqlx::Row;

    use super::{JobStore, StoreError};
    use crate::jobs::JobStatus;

    impl From<sqlx::Error> for StoreError {
        fn from(e: sqlx::Error) -> Self {
            Self::Database(e.to_string())
        }
    }

    /// SQLite 存储：reorder_jobs 表，状态整体以 JSON 存 body 列
    pub struct SqliteJobStore {
        pool: sqlx::sqlite::SqlitePool,
    }

    impl SqliteJobStore {
        pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
            let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
            let pool = sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(3)
                .connect(&db_url)
                .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS reorder_jobs (
                    id TEXT PRIMARY KEY,
                    playlist_id TEXT NOT NULL,
                    state TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    body TEXT NOT NULL
                )",
            )
            .execute(&pool)
            .await?;
            sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_state ON reorder_jobs(state)")
                .execute(&pool)
                .await?;

            Ok(Self { pool })
        }
    }

    #[async_trait]
    impl JobStore for SqliteJobStore {
        async fn save(&self, status: &JobStatus) -> Result<(), StoreError> {
            sqlx::query(
                "INSERT OR REPLACE INTO reorder_jobs (id, playlist_id, state, created_at, updated_at, body)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&status.id)
            .bind(&status.playlist_id)
            .bind(status.state.as_str())
            .bind(status.created_at)
            .bind(status.updated_at)
            .bind(serde_json::to_string(status)?)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn load(&self, job_id: &str) -> Result<Option<JobStatus>, StoreError> {
            let row = sqlx::query("SELECT body FROM reorder_jobs WHERE id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
            match row {
                Some(row) => Ok(Some(serde_json::from_str(&row.get::<String, _>("body"))?)),
                None => Ok(None),
            }
        }

        async fn list(&self) -> Result<Vec<JobStatus>, StoreError> {
            let rows = sqlx::query("SELECT body FROM reorder_jobs ORDER BY created_at ASC, id ASC")
                .fetch_all(&self.pool)
                .await?;
            rows.iter()
                .map(|row| Ok(serde_json::from_str(&row.get::<String, _>("body"))?))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobState;
    use crate::reorder::{ReorderMethod, ReorderStyle, StyleSpec};

    fn status(playlist: &str) -> JobStatus {
        JobStatus::new(playlist, StyleSpec::new(ReorderStyle::NarrativeArc), ReorderMethod::Auto)
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = InMemoryJobStore::new();
        let mut job = status("p1");
        store.save(&job).await.unwrap();
        job.transition(JobState::InProgress).unwrap();
        store.save(&job).await.unwrap();

        let loaded = store.load(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, JobState::InProgress);
        assert!(store.load("missing").await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let first = status("p1");
        let second = status("p2");
        {
            let store = FileJobStore::open(dir.path()).await.unwrap();
            store.save(&first).await.unwrap();
            store.save(&second).await.unwrap();
        }

        let store = FileJobStore::open(dir.path()).await.unwrap();
        assert_eq!(store.load(&first.id).await.unwrap(), Some(first.clone()));
        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id) && ids.contains(&second.id));
        assert!(store.load("job_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_skips_corrupt_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        store.save(&status("p1")).await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), b"{not json").await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
