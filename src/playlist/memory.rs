//! 内存歌单：按远端语义执行移动并校验令牌
//!
//! 令牌取自单调递增的版本号，任何写入（包括 `touch` 模拟的外部修改）都会让旧令牌失效。
//! 分批重写期间尚未追加回来的曲目暂存在 `detached` 里，快照看不到它们。
//! 测试可注入延迟、令牌失效与调用失败。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::playlist::{PlaylistClient, PlaylistError, PlaylistSnapshot, SnapshotId};
use crate::reorder::{apply_move, check_permutation, MoveOperation, Track, TrackId, TrackOrder};

#[derive(Debug, Clone)]
struct StoredPlaylist {
    tracks: Vec<Track>,
    detached: HashMap<TrackId, Track>,
    version: u64,
}

impl StoredPlaylist {
    fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            detached: HashMap::new(),
            version: 1,
        }
    }

    fn snapshot_id(&self, playlist_id: &str) -> SnapshotId {
        SnapshotId(format!("{playlist_id}@{}", self.version))
    }

    fn knows(&self, id: &str) -> bool {
        self.detached.contains_key(id) || self.tracks.iter().any(|t| t.id == id)
    }
}

/// ids 不得重复，且每个都满足 `known`
fn check_ids(ids: &[TrackId], known: impl Fn(&str) -> bool) -> Result<(), PlaylistError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(PlaylistError::InvalidMove(format!("duplicate track {id}")));
        }
        if !known(id) {
            return Err(PlaylistError::InvalidMove(format!("unknown track {id}")));
        }
    }
    Ok(())
}

/// 故障注入
#[derive(Debug, Default)]
struct Faults {
    /// 接下来多少次移动以 StaleSnapshot 失败（同时让版本前进，模拟外部修改）
    stale_moves: usize,
    /// 成功执行这么多次移动后，之后的移动一律失败
    fail_after_moves: Option<usize>,
    /// 成功追加这么多批后，之后的追加一律失败
    fail_after_appends: Option<usize>,
    move_delay: Option<Duration>,
}

/// 内存实现的远端歌单
#[derive(Debug, Default)]
pub struct InMemoryPlaylistClient {
    playlists: Mutex<HashMap<String, StoredPlaylist>>,
    faults: Mutex<Faults>,
    move_calls: AtomicUsize,
    replace_calls: AtomicUsize,
    append_calls: AtomicUsize,
}

impl InMemoryPlaylistClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入（或覆盖）一个歌单
    pub fn insert(&self, playlist_id: impl Into<String>, tracks: Vec<Track>) {
        if let Ok(mut map) = self.playlists.lock() {
            map.insert(playlist_id.into(), StoredPlaylist::new(tracks));
        }
    }

    pub fn with_playlist(self, playlist_id: impl Into<String>, tracks: Vec<Track>) -> Self {
        self.insert(playlist_id, tracks);
        self
    }

    /// 当前顺序（测试断言用）
    pub fn order(&self, playlist_id: &str) -> Option<TrackOrder> {
        self.playlists
            .lock()
            .ok()?
            .get(playlist_id)
            .map(|p| TrackOrder::of(&p.tracks))
    }

    /// 模拟外部修改：版本前进，旧令牌失效
    pub fn touch(&self, playlist_id: &str) {
        if let Ok(mut map) = self.playlists.lock() {
            if let Some(p) = map.get_mut(playlist_id) {
                p.version += 1;
            }
        }
    }

    pub fn inject_stale_moves(&self, count: usize) {
        if let Ok(mut f) = self.faults.lock() {
            f.stale_moves = count;
        }
    }

    pub fn fail_after_moves(&self, successes: usize) {
        if let Ok(mut f) = self.faults.lock() {
            f.fail_after_moves = Some(successes);
        }
    }

    pub fn fail_after_appends(&self, successes: usize) {
        if let Ok(mut f) = self.faults.lock() {
            f.fail_after_appends = Some(successes);
        }
    }

    pub fn set_move_delay(&self, delay: Duration) {
        if let Ok(mut f) = self.faults.lock() {
            f.move_delay = Some(delay);
        }
    }

    /// 成功与失败的移动调用总数
    pub fn move_calls(&self) -> usize {
        self.move_calls.load(Ordering::SeqCst)
    }

    /// `replace_all` 与 `replace_head` 的调用总数
    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    fn poisoned() -> PlaylistError {
        PlaylistError::Api("playlist store poisoned".to_string())
    }
}

#[async_trait]
impl PlaylistClient for InMemoryPlaylistClient {
    async fn get_snapshot(&self, playlist_id: &str) -> Result<PlaylistSnapshot, PlaylistError> {
        let map = self.playlists.lock().map_err(|_| Self::poisoned())?;
        let stored = map
            .get(playlist_id)
            .ok_or_else(|| PlaylistError::NotFound(playlist_id.to_string()))?;
        Ok(PlaylistSnapshot {
            playlist_id: playlist_id.to_string(),
            tracks: stored.tracks.clone(),
            snapshot_id: stored.snapshot_id(playlist_id),
        })
    }

    async fn move_range(
        &self,
        playlist_id: &str,
        op: &MoveOperation,
        snapshot_id: &SnapshotId,
    ) -> Result<SnapshotId, PlaylistError> {
        let calls_before = self.move_calls.fetch_add(1, Ordering::SeqCst);

        let (delay, inject_stale, fail) = {
            let mut f = self.faults.lock().map_err(|_| Self::poisoned())?;
            let stale = f.stale_moves > 0;
            if stale {
                f.stale_moves -= 1;
            }
            let fail = f.fail_after_moves.is_some_and(|n| calls_before >= n);
            (f.move_delay, stale, fail)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut map = self.playlists.lock().map_err(|_| Self::poisoned())?;
        let stored = map
            .get_mut(playlist_id)
            .ok_or_else(|| PlaylistError::NotFound(playlist_id.to_string()))?;

        if fail {
            return Err(PlaylistError::Api("injected failure".to_string()));
        }
        if inject_stale {
            stored.version += 1;
        }
        if stored.snapshot_id(playlist_id) != *snapshot_id {
            return Err(PlaylistError::StaleSnapshot {
                playlist_id: playlist_id.to_string(),
            });
        }

        apply_move(&mut stored.tracks, op).map_err(|e| PlaylistError::InvalidMove(e.to_string()))?;
        stored.version += 1;
        Ok(stored.snapshot_id(playlist_id))
    }

    async fn replace_all(
        &self,
        playlist_id: &str,
        order: &TrackOrder,
    ) -> Result<SnapshotId, PlaylistError> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);

        let mut map = self.playlists.lock().map_err(|_| Self::poisoned())?;
        let stored = map
            .get_mut(playlist_id)
            .ok_or_else(|| PlaylistError::NotFound(playlist_id.to_string()))?;

        let current = TrackOrder::of(&stored.tracks).into_ids();
        check_permutation(&current, order.ids())
            .map_err(|e| PlaylistError::InvalidMove(e.to_string()))?;

        let mut by_id: HashMap<String, Track> = stored
            .tracks
            .drain(..)
            .map(|t| (t.id.clone(), t))
            .collect();
        stored.tracks = order.ids().iter().filter_map(|id| by_id.remove(id)).collect();
        stored.version += 1;
        Ok(stored.snapshot_id(playlist_id))
    }

    async fn replace_head(&self, playlist_id: &str, ids: &[TrackId]) -> Result<SnapshotId, PlaylistError> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);

        let mut map = self.playlists.lock().map_err(|_| Self::poisoned())?;
        let stored = map
            .get_mut(playlist_id)
            .ok_or_else(|| PlaylistError::NotFound(playlist_id.to_string()))?;
        check_ids(ids, |id| stored.knows(id))?;

        let mut pool: HashMap<TrackId, Track> = stored
            .tracks
            .drain(..)
            .map(|t| (t.id.clone(), t))
            .chain(stored.detached.drain())
            .collect();
        stored.tracks = ids.iter().filter_map(|id| pool.remove(id)).collect();
        stored.detached = pool;
        stored.version += 1;
        Ok(stored.snapshot_id(playlist_id))
    }

    async fn append(
        &self,
        playlist_id: &str,
        ids: &[TrackId],
        snapshot_id: &SnapshotId,
    ) -> Result<SnapshotId, PlaylistError> {
        let calls_before = self.append_calls.fetch_add(1, Ordering::SeqCst);
        let fail = {
            let f = self.faults.lock().map_err(|_| Self::poisoned())?;
            f.fail_after_appends.is_some_and(|n| calls_before >= n)
        };

        let mut map = self.playlists.lock().map_err(|_| Self::poisoned())?;
        let stored = map
            .get_mut(playlist_id)
            .ok_or_else(|| PlaylistError::NotFound(playlist_id.to_string()))?;

        if fail {
            return Err(PlaylistError::Api("injected failure".to_string()));
        }
        if stored.snapshot_id(playlist_id) != *snapshot_id {
            return Err(PlaylistError::StaleSnapshot {
                playlist_id: playlist_id.to_string(),
            });
        }
        check_ids(ids, |id| stored.detached.contains_key(id))?;

        for id in ids {
            if let Some(track) = stored.detached.remove(id) {
                stored.tracks.push(track);
            }
        }
        stored.version += 1;
        Ok(stored.snapshot_id(playlist_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks(ids: &[&str]) -> Vec<Track> {
        ids.iter().map(|id| Track::new(*id, *id, "artist")).collect()
    }

    #[tokio::test]
    async fn test_move_then_stale_token_rejected() {
        let client = InMemoryPlaylistClient::new().with_playlist("p", tracks(&["a", "b", "c", "d"]));
        let snap = client.get_snapshot("p").await.unwrap();

        let op = MoveOperation {
            range_start: 3,
            range_length: 1,
            insert_before: 0,
        };
        let next = client.move_range("p", &op, &snap.snapshot_id).await.unwrap();
        assert_ne!(next, snap.snapshot_id);
        assert_eq!(client.order("p").unwrap(), TrackOrder::from(vec!["d", "a", "b", "c"]));

        let err = client.move_range("p", &op, &snap.snapshot_id).await.unwrap_err();
        assert!(matches!(err, PlaylistError::StaleSnapshot { .. }));
    }

    #[tokio::test]
    async fn test_touch_invalidates_token() {
        let client = InMemoryPlaylistClient::new().with_playlist("p", tracks(&["a", "b"]));
        let snap = client.get_snapshot("p").await.unwrap();
        client.touch("p");
        let op = MoveOperation {
            range_start: 1,
            range_length: 1,
            insert_before: 0,
        };
        assert!(client.move_range("p", &op, &snap.snapshot_id).await.is_err());
        assert_eq!(client.order("p").unwrap(), TrackOrder::from(vec!["a", "b"]));
    }

    #[tokio::test]
    async fn test_replace_all_requires_permutation() {
        let client = InMemoryPlaylistClient::new().with_playlist("p", tracks(&["a", "b", "c"]));
        client
            .replace_all("p", &TrackOrder::from(vec!["c", "a", "b"]))
            .await
            .unwrap();
        assert_eq!(client.order("p").unwrap(), TrackOrder::from(vec!["c", "a", "b"]));
        assert!(client
            .replace_all("p", &TrackOrder::from(vec!["c", "a"]))
            .await
            .is_err());
        assert_eq!(client.replace_calls(), 2);
    }

    #[tokio::test]
    async fn test_chunked_rewrite() {
        let client = InMemoryPlaylistClient::new().with_playlist("p", tracks(&["a", "b", "c", "d", "e"]));
        let ids = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<TrackId>>();

        let token = client.replace_head("p", &ids(&["e", "d"])).await.unwrap();
        assert_eq!(client.order("p").unwrap(), TrackOrder::from(vec!["e", "d"]));
        let stale = token.clone();
        let token = client.append("p", &ids(&["c", "b"]), &token).await.unwrap();

        let err = client.append("p", &ids(&["a"]), &stale).await.unwrap_err();
        assert!(matches!(err, PlaylistError::StaleSnapshot { .. }));
        // 已追加的曲目不能再追加
        assert!(client.append("p", &ids(&["b"]), &token).await.is_err());

        client.append("p", &ids(&["a"]), &token).await.unwrap();
        assert_eq!(client.order("p").unwrap(), TrackOrder::from(vec!["e", "d", "c", "b", "a"]));
        assert_eq!(client.replace_calls(), 1);
        assert_eq!(client.append_calls(), 4);
    }

    #[tokio::test]
    async fn test_replace_head_rejects_unknown_tracks() {
        let client = InMemoryPlaylistClient::new().with_playlist("p", tracks(&["a", "b", "c"]));
        let bad: Vec<TrackId> = vec!["c".into(), "x".into()];
        assert!(matches!(
            client.replace_head("p", &bad).await.unwrap_err(),
            PlaylistError::InvalidMove(_)
        ));
        let dup: Vec<TrackId> = vec!["c".into(), "c".into()];
        assert!(client.replace_head("p", &dup).await.is_err());
        assert_eq!(client.order("p").unwrap(), TrackOrder::from(vec!["a", "b", "c"]));
    }

    #[tokio::test]
    async fn test_injected_append_failure() {
        let client = InMemoryPlaylistClient::new().with_playlist("p", tracks(&["a", "b", "c"]));
        client.fail_after_appends(0);
        let token = client.replace_head("p", &["c".to_string()]).await.unwrap();
        let err = client.append("p", &["b".to_string()], &token).await.unwrap_err();
        assert_eq!(err, PlaylistError::Api("injected failure".into()));
        assert_eq!(client.order("p").unwrap(), TrackOrder::from(vec!["c"]));
    }

    #[tokio::test]
    async fn test_missing_playlist() {
        let client = InMemoryPlaylistClient::new();
        assert_eq!(
            client.get_snapshot("nope").await.unwrap_err(),
            PlaylistError::NotFound("nope".into())
        );
    }
}
