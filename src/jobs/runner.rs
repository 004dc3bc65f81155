//! 任务流水线：取快照 -> 补元数据 -> 排序 -> 选策略 -> 逐条应用
//!
//! 远端写入严格串行：每次移动都要带上一把令牌，成功后换新令牌。
//! 令牌失效时重新取一次快照、基于最新顺序重算剩余移动；第二次失效即终止。
//! 整体重写在远端不支持一次性替换时按 batch_limit 分批写入。
//! 已落地的移动（或批次）不回滚，失败时在错误里报告已应用 / 总数。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::{RecoveryAction, RecoveryEngine, RecoveryStage, ReorderError, TaskScheduler};
use crate::jobs::{JobPhase, JobTracker};
use crate::metadata::{enrich_tracks, MetadataFetcher};
use crate::playlist::{PlaylistClient, PlaylistError, PlaylistSnapshot, SnapshotId};
use crate::reorder::{
    compile_moves, plan_strategy, MoveOperation, OrderProgress, PlaylistOrderer, ProgressFn,
    RewriteCapability, Strategy, TrackId, TrackOrder,
};

/// 远端调用约束（来自配置 [remote] 段）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteSettings {
    /// 一个任务最多发出的写调用数
    pub max_calls: usize,
    pub capability: RewriteCapability,
    pub call_timeout: Duration,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            max_calls: 100,
            capability: RewriteCapability::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// 元数据补全参数（来自配置 [metadata] 段）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichSettings {
    pub timeout: Duration,
    pub concurrency: usize,
}

impl Default for EnrichSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            concurrency: 4,
        }
    }
}

// 各步骤对应的进度百分比
const PROGRESS_STARTED: u8 = 5;
const PROGRESS_FETCHED: u8 = 10;
const PROGRESS_ENRICHED: u8 = 30;
const PROGRESS_ORDERED: u8 = 65;
const PROGRESS_PLANNED: u8 = 70;
const PROGRESS_APPLY_SPAN: u8 = 29;

fn scaled(base: u8, span: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return base + span;
    }
    base + ((span as usize * done.min(total)) / total) as u8
}

/// 一个任务的执行器（无状态，可被多个任务共享）
pub struct JobRunner {
    playlists: Arc<dyn PlaylistClient>,
    orderer: PlaylistOrderer,
    fetchers: Vec<Arc<dyn MetadataFetcher>>,
    remote: RemoteSettings,
    enrich: EnrichSettings,
    recovery: RecoveryEngine,
}

impl JobRunner {
    pub fn new(playlists: Arc<dyn PlaylistClient>, orderer: PlaylistOrderer, remote: RemoteSettings) -> Self {
        Self {
            playlists,
            orderer,
            fetchers: Vec::new(),
            remote,
            enrich: EnrichSettings::default(),
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    pub fn with_enrich_settings(mut self, enrich: EnrichSettings) -> Self {
        self.enrich = enrich;
        self
    }

    /// 执行完整流水线；成功时返回位置发生变化的曲目数
    pub async fn run(&self, tracker: &JobTracker, cancel: &CancellationToken) -> Result<usize, ReorderError> {
        let (playlist_id, style, method) = tracker.update(|s| (s.playlist_id.clone(), s.style.clone(), s.method));

        // 1. 快照
        tracker
            .commit(|s| {
                s.phase = JobPhase::FetchingSnapshot;
                s.advance(PROGRESS_STARTED);
            })
            .await;
        TaskScheduler::check_cancelled(cancel)?;
        let snapshot = self.fetch_snapshot(&playlist_id).await?;
        let tracks = snapshot.tracks.clone();
        let current = snapshot.order();
        tracing::info!(playlist_id = %playlist_id, tracks = tracks.len(), "snapshot fetched");
        tracker
            .commit(|s| {
                s.total_tracks = tracks.len();
                s.advance(PROGRESS_FETCHED);
            })
            .await;

        // 2. 元数据
        TaskScheduler::check_cancelled(cancel)?;
        let tracks = if self.fetchers.is_empty() {
            tracks
        } else {
            tracker.commit(|s| s.phase = JobPhase::Enriching).await;
            let (tracks, report) =
                enrich_tracks(tracks, &self.fetchers, self.enrich.timeout, self.enrich.concurrency).await;
            tracing::info!(enriched = report.enriched, failures = report.failures, "metadata enriched");
            tracks
        };
        tracker.commit(|s| s.advance(PROGRESS_ENRICHED)).await;

        // 3. 排序
        tracker.commit(|s| s.phase = JobPhase::Ordering).await;
        let progress: ProgressFn = {
            let tracker = tracker.clone();
            let track_count = tracks.len();
            Arc::new(move |event| {
                tracker.update(|s| match event {
                    OrderProgress::Phase(phase) => s.phase = phase.into(),
                    OrderProgress::CategoryOrdered { done, total } => {
                        s.processed_tracks = s.processed_tracks.max(track_count * done / total.max(1));
                        s.advance(scaled(
                            PROGRESS_ENRICHED,
                            PROGRESS_ORDERED - PROGRESS_ENRICHED,
                            done,
                            total,
                        ));
                    }
                })
            })
        };
        let report = self
            .orderer
            .order_playlist(&tracks, &style, cancel, Some(progress))
            .await?;
        let desired = report.order;
        tracker
            .commit(|s| {
                s.phase = JobPhase::Planning;
                s.order_mode = Some(report.mode);
                s.categories = (!report.categories.is_empty()).then_some(report.categories.len());
                s.fallbacks.extend(report.fallbacks);
                s.processed_tracks = s.total_tracks;
                s.advance(PROGRESS_ORDERED);
            })
            .await;

        // 4. 策略
        TaskScheduler::check_cancelled(cancel)?;
        let plan = plan_strategy(
            current.ids(),
            desired.ids(),
            self.remote.max_calls,
            self.remote.capability,
            method,
        )?;
        tracing::info!(
            playlist_id = %playlist_id,
            strategy = ?plan.strategy,
            targeted_calls = plan.targeted_calls,
            rewrite_calls = plan.rewrite_calls,
            "strategy chosen: {}",
            plan.reason
        );
        let strategy = plan.strategy;
        let moves = plan.moves.clone();
        let writes = match strategy {
            Strategy::Targeted => moves.len(),
            Strategy::FullRewrite => plan.rewrite_calls,
        };
        tracker
            .commit(|s| {
                s.phase = JobPhase::Applying;
                s.moves_total = writes;
                s.plan = Some(plan);
                s.advance(PROGRESS_PLANNED);
            })
            .await;

        // 5. 应用
        match strategy {
            Strategy::Targeted => {
                self.apply_moves(tracker, cancel, &playlist_id, snapshot.snapshot_id, moves, &desired)
                    .await?
            }
            Strategy::FullRewrite => self.rewrite(tracker, cancel, &playlist_id, &desired).await?,
        }

        Ok(changed_positions(current.ids(), desired.ids()))
    }

    async fn fetch_snapshot(&self, playlist_id: &str) -> Result<PlaylistSnapshot, ReorderError> {
        tokio::time::timeout(self.remote.call_timeout, self.playlists.get_snapshot(playlist_id))
            .await
            .unwrap_or(Err(PlaylistError::Timeout))
            .map_err(ReorderError::from)
    }

    async fn apply_moves(
        &self,
        tracker: &JobTracker,
        cancel: &CancellationToken,
        playlist_id: &str,
        mut token: SnapshotId,
        moves: Vec<MoveOperation>,
        desired: &TrackOrder,
    ) -> Result<(), ReorderError> {
        let mut remaining: VecDeque<MoveOperation> = moves.into();
        let mut total = remaining.len();
        let mut applied = 0usize;
        let mut resnapshots = 0u32;

        while let Some(op) = remaining.front().copied() {
            if cancel.is_cancelled() {
                tracing::info!(playlist_id, applied, total, "cancelled between moves");
                return Err(ReorderError::Cancelled);
            }

            let result = tokio::time::timeout(
                self.remote.call_timeout,
                self.playlists.move_range(playlist_id, &op, &token),
            )
            .await
            .unwrap_or(Err(PlaylistError::Timeout));

            match result {
                Ok(next) => {
                    token = next;
                    applied += 1;
                    remaining.pop_front();
                    tracing::debug!(playlist_id, %op, applied, total, "move applied");
                    tracker
                        .commit(|s| {
                            s.moves_applied = applied;
                            s.advance(scaled(PROGRESS_PLANNED, PROGRESS_APPLY_SPAN, applied, total));
                        })
                        .await;
                }
                Err(e) => {
                    let err = ReorderError::Playlist(e);
                    let stage = RecoveryStage::MoveExecution { resnapshots };
                    match self.recovery.handle(&err, stage) {
                        RecoveryAction::ResnapshotAndResume => {
                            resnapshots += 1;
                            tracing::warn!(playlist_id, applied, "snapshot went stale, re-fetching and resuming");
                            let snapshot = self
                                .fetch_snapshot(playlist_id)
                                .await
                                .map_err(|e| partial(applied, total, e))?;
                            token = snapshot.snapshot_id.clone();
                            let rest = compile_moves(snapshot.order().ids(), desired.ids())
                                .map_err(|e| partial(applied, total, e))?;
                            if applied + rest.len() > self.remote.max_calls {
                                return Err(partial(
                                    applied,
                                    applied + rest.len(),
                                    ReorderError::BudgetExceeded {
                                        targeted: applied + rest.len(),
                                        rewrite: self.remote.capability.rewrite_calls(desired.len()),
                                        max_calls: self.remote.max_calls,
                                    },
                                ));
                            }
                            total = applied + rest.len();
                            remaining = rest.into();
                            tracker.commit(|s| s.moves_total = total).await;
                        }
                        _ => {
                            let err = match err {
                                ReorderError::Playlist(PlaylistError::StaleSnapshot { playlist_id }) => {
                                    ReorderError::StaleToken { playlist_id }
                                }
                                other => other,
                            };
                            return Err(partial(applied, total, err));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// 整体重写：支持批量替换时一次 replace_all，否则第一批 replace_head、其余批次 append
    ///
    /// 批次之间不检查取消，中途停下会让歌单停在被截断的状态。
    async fn rewrite(
        &self,
        tracker: &JobTracker,
        cancel: &CancellationToken,
        playlist_id: &str,
        desired: &TrackOrder,
    ) -> Result<(), ReorderError> {
        TaskScheduler::check_cancelled(cancel)?;
        let capability = self.remote.capability;

        if capability.supports_batch_replace {
            tokio::time::timeout(
                self.remote.call_timeout,
                self.playlists.replace_all(playlist_id, desired),
            )
            .await
            .unwrap_or(Err(PlaylistError::Timeout))?;
            tracker
                .commit(|s| {
                    s.moves_applied = 1;
                    s.advance(PROGRESS_PLANNED + PROGRESS_APPLY_SPAN);
                })
                .await;
            tracing::info!(playlist_id, tracks = desired.len(), "playlist rewritten");
            return Ok(());
        }

        let chunks: Vec<&[TrackId]> = desired.ids().chunks(capability.batch_limit.max(1)).collect();
        let total = chunks.len();
        let mut token: Option<SnapshotId> = None;
        for (applied, chunk) in chunks.into_iter().enumerate() {
            let result = match &token {
                None => {
                    tokio::time::timeout(
                        self.remote.call_timeout,
                        self.playlists.replace_head(playlist_id, chunk),
                    )
                    .await
                }
                Some(current) => {
                    tokio::time::timeout(
                        self.remote.call_timeout,
                        self.playlists.append(playlist_id, chunk, current),
                    )
                    .await
                }
            }
            .unwrap_or(Err(PlaylistError::Timeout));

            let next = result.map_err(|e| {
                tracing::warn!(playlist_id, applied, total, "rewrite chunk failed: {}", e);
                partial(applied, total, ReorderError::Playlist(e))
            })?;
            token = Some(next);
            let done = applied + 1;
            tracing::debug!(playlist_id, done, total, tracks = chunk.len(), "rewrite chunk written");
            tracker
                .commit(|s| {
                    s.moves_applied = done;
                    s.advance(scaled(PROGRESS_PLANNED, PROGRESS_APPLY_SPAN, done, total));
                })
                .await;
        }
        tracing::info!(playlist_id, tracks = desired.len(), chunks = total, "playlist rewritten");
        Ok(())
    }
}

/// 已有移动落地时把普通失败包装成 PartialApplication；取消与令牌失效保留原种类
fn partial(applied: usize, total: usize, err: ReorderError) -> ReorderError {
    match err {
        ReorderError::Cancelled | ReorderError::StaleToken { .. } | ReorderError::PartialApplication { .. } => err,
        _ if applied == 0 => err,
        other => ReorderError::PartialApplication {
            applied,
            total,
            cause: other.to_string(),
        },
    }
}

/// 位置发生变化的曲目数
fn changed_positions(before: &[TrackId], after: &[TrackId]) -> usize {
    before.iter().zip(after).filter(|(a, b)| a != b).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_wrapping() {
        let cause = ReorderError::Playlist(PlaylistError::Timeout);
        assert_eq!(partial(0, 3, cause.clone()), cause);
        assert!(matches!(
            partial(2, 3, cause),
            ReorderError::PartialApplication { applied: 2, total: 3, .. }
        ));
        assert_eq!(partial(2, 3, ReorderError::Cancelled), ReorderError::Cancelled);
    }

    #[test]
    fn test_changed_positions() {
        let before: Vec<TrackId> = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        let after: Vec<TrackId> = vec!["d".into(), "b".into(), "c".into(), "a".into()];
        assert_eq!(changed_positions(&before, &after), 2);
    }

    #[test]
    fn test_scaled_progress() {
        assert_eq!(scaled(70, 29, 0, 4), 70);
        assert_eq!(scaled(70, 29, 2, 4), 84);
        assert_eq!(scaled(70, 29, 4, 4), 99);
        assert_eq!(scaled(70, 29, 0, 0), 99);
    }
}
