//! 远端歌单客户端抽象
//!
//! 重排核心只依赖这几个操作：取快照、区间移动、整体替换。每次写入都会换新的并发令牌（snapshot id），
//! 旧令牌必须被远端拒绝；调用方收到 StaleSnapshot 后要重新取快照再继续。
//!
//! 不支持一次性替换的远端按 `batch_limit` 分批重写：`replace_head` 写入第一批，其余批次用 `append` 追加。

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reorder::{MoveOperation, Track, TrackId, TrackOrder};

pub use memory::InMemoryPlaylistClient;

/// 并发令牌（远端的 snapshot id，不透明）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub String);

impl SnapshotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 歌单某一时刻的状态：有序曲目 + 对应令牌
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistSnapshot {
    pub playlist_id: String,
    pub tracks: Vec<Track>,
    pub snapshot_id: SnapshotId,
}

impl PlaylistSnapshot {
    pub fn order(&self) -> TrackOrder {
        TrackOrder::of(&self.tracks)
    }
}

/// 远端调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaylistError {
    #[error("stale snapshot for playlist {playlist_id}")]
    StaleSnapshot { playlist_id: String },

    #[error("playlist not found: {0}")]
    NotFound(String),

    #[error("move rejected by remote: {0}")]
    InvalidMove(String),

    #[error("remote call timed out")]
    Timeout,

    #[error("remote API error: {0}")]
    Api(String),
}

/// 远端歌单客户端
#[async_trait]
pub trait PlaylistClient: Send + Sync {
    /// 当前顺序与令牌
    async fn get_snapshot(&self, playlist_id: &str) -> Result<PlaylistSnapshot, PlaylistError>;

    /// 执行一次区间移动，令牌必须是最新的；成功返回新令牌
    async fn move_range(
        &self,
        playlist_id: &str,
        op: &MoveOperation,
        snapshot_id: &SnapshotId,
    ) -> Result<SnapshotId, PlaylistError>;

    /// 一次性整体替换为给定顺序（要求远端支持批量替换）；成功返回新令牌
    async fn replace_all(
        &self,
        playlist_id: &str,
        order: &TrackOrder,
    ) -> Result<SnapshotId, PlaylistError>;

    /// 分批重写的第一批：歌单内容变为 `ids`，其余曲目等待后续 `append`
    async fn replace_head(&self, playlist_id: &str, ids: &[TrackId]) -> Result<SnapshotId, PlaylistError>;

    /// 分批重写的后续批次：追加到末尾，令牌必须是最新的
    async fn append(
        &self,
        playlist_id: &str,
        ids: &[TrackId],
        snapshot_id: &SnapshotId,
    ) -> Result<SnapshotId, PlaylistError>;
}
