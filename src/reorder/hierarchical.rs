//! 分层排序：大歌单先分类，再分别排序各分类，最后按分类顺序拼接
//!
//! 阶段：Categorizing -> OrderingCategories -> Assembling -> Done（任一阶段可进入 Failed）。
//!
//! - 分类：按 oracle 单次容量分块调用；oracle 漏掉或编造的曲目不会丢，统一落到默认分类；
//!   全部分块都失败时退化为一个扁平分类。分类数超出预算时，保留最大的若干个，其余并入默认分类。
//! - 分类内排序：各分类并发（受 TaskScheduler 限流），全部完成后才进入拼接；
//!   超过单批阈值的分类按阈值切成子块分别排序；单个分类超时或任务崩溃时保持其原有相对顺序。
//! - 拼接：分类名关键词优先级 -> 风格指标均值 -> 首次出现顺序。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::heuristic::{category_priority, mean_metric};
use super::model::{StyleSpec, Track, TrackId, TrackOrder};
use super::single_batch::{order_section, OrderSource};
use super::validate::{check_permutation, repair_order};
use crate::core::{RecoveryAction, RecoveryEngine, RecoveryStage, ReorderError, TaskScheduler};
use crate::oracle::{Category, CategoryAssignment, Oracle, OracleError};

/// oracle 漏分或分类超预算时的默认分类
pub const DEFAULT_CATEGORY: &str = "Uncategorized";
/// 分类整体失败时的扁平分类
pub const FLAT_CATEGORY: &str = "All Tracks";

/// 排序器参数（来自配置 [reorder] 段）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrdererSettings {
    /// 不超过该曲目数走单批排序；同时是分类内子块大小
    pub small_playlist_threshold: usize,
    pub category_budget: usize,
    /// 单次分类调用最多携带的曲目数
    pub max_tracks_per_oracle_call: usize,
    pub oracle_timeout: Duration,
    /// 单个分类排序（含子块）的总时限
    pub category_timeout: Duration,
}

impl Default for OrdererSettings {
    fn default() -> Self {
        Self {
            small_playlist_threshold: 40,
            category_budget: 5,
            max_tracks_per_oracle_call: 150,
            oracle_timeout: Duration::from_secs(60),
            category_timeout: Duration::from_secs(120),
        }
    }
}

/// 分层排序阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyPhase {
    Categorizing,
    OrderingCategories,
    Assembling,
    Done,
    Failed,
}

/// 排序进度事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderProgress {
    Phase(HierarchyPhase),
    /// 已完成的分类数 / 分类总数
    CategoryOrdered { done: usize, total: usize },
}

/// 进度回调
pub type ProgressFn = Arc<dyn Fn(OrderProgress) + Send + Sync>;

/// 走了哪条路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderMode {
    SingleBatch,
    Hierarchical,
}

/// 排序结果与过程信息
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReport {
    pub order: TrackOrder,
    pub mode: OrderMode,
    /// 拼接顺序下的最终分区（单批时为空）
    pub categories: Vec<Category>,
    /// 走了兜底的批次 / 分类说明
    pub fallbacks: Vec<String>,
}

/// 排序器：按规模在单批与分层之间分派
#[derive(Clone)]
pub struct PlaylistOrderer {
    oracle: Arc<dyn Oracle>,
    scheduler: TaskScheduler,
    settings: OrdererSettings,
}

impl PlaylistOrderer {
    pub fn new(oracle: Arc<dyn Oracle>, scheduler: TaskScheduler, settings: OrdererSettings) -> Self {
        Self {
            oracle,
            scheduler,
            settings,
        }
    }

    pub fn settings(&self) -> &OrdererSettings {
        &self.settings
    }

    /// 小歌单单批，大歌单分层
    pub async fn order_playlist(
        &self,
        tracks: &[Track],
        style: &StyleSpec,
        cancel: &CancellationToken,
        progress: Option<ProgressFn>,
    ) -> Result<OrderReport, ReorderError> {
        TaskScheduler::check_cancelled(cancel)?;
        if tracks.len() <= self.settings.small_playlist_threshold {
            let _permit = self.scheduler.acquire_oracle().await?;
            let outcome = order_section(
                self.oracle.as_ref(),
                tracks,
                style,
                None,
                self.settings.oracle_timeout,
            )
            .await;
            let fallbacks = match outcome.source {
                OrderSource::Heuristic { reason } | OrderSource::Identity { reason } => vec![reason],
                _ => Vec::new(),
            };
            return Ok(OrderReport {
                order: outcome.order,
                mode: OrderMode::SingleBatch,
                categories: Vec::new(),
                fallbacks,
            });
        }

        self.order_hierarchical(tracks, style, self.settings.category_budget, cancel, progress)
            .await
    }

    /// 三阶段分层排序
    pub async fn order_hierarchical(
        &self,
        tracks: &[Track],
        style: &StyleSpec,
        category_budget: usize,
        cancel: &CancellationToken,
        progress: Option<ProgressFn>,
    ) -> Result<OrderReport, ReorderError> {
        let notify = |event: OrderProgress| {
            if let Some(cb) = &progress {
                cb(event);
            }
        };

        let result = self
            .run_phases(tracks, style, category_budget, cancel, &notify)
            .await;
        match &result {
            Ok(_) => notify(OrderProgress::Phase(HierarchyPhase::Done)),
            Err(e) => {
                tracing::warn!("hierarchical ordering failed: {}", e);
                notify(OrderProgress::Phase(HierarchyPhase::Failed));
            }
        }
        result
    }

    async fn run_phases(
        &self,
        tracks: &[Track],
        style: &StyleSpec,
        category_budget: usize,
        cancel: &CancellationToken,
        notify: &(dyn Fn(OrderProgress) + Sync),
    ) -> Result<OrderReport, ReorderError> {
        let reference = TrackOrder::of(tracks);
        let mut fallbacks = Vec::new();

        // 1. 分类
        notify(OrderProgress::Phase(HierarchyPhase::Categorizing));
        TaskScheduler::check_cancelled(cancel)?;
        let assignments = self.categorize_chunks(tracks, style, category_budget).await;
        let categories = if assignments.iter().all(Result::is_err) {
            let reason = assignments
                .into_iter()
                .find_map(Result::err)
                .map(|e| e.to_string())
                .unwrap_or_default();
            tracing::warn!(tracks = tracks.len(), "categorization failed ({}), using one flat category", reason);
            fallbacks.push(format!("categorization: {reason}"));
            vec![Category::new(FLAT_CATEGORY, reference.ids().to_vec())]
        } else {
            for err in assignments.iter().filter_map(|r| r.as_ref().err()) {
                fallbacks.push(format!("categorization chunk: {err}"));
            }
            let merged: Vec<CategoryAssignment> = assignments.into_iter().filter_map(Result::ok).collect();
            build_partition(reference.ids(), &merged, category_budget)
        };
        tracing::info!(
            tracks = tracks.len(),
            categories = categories.len(),
            "tracks categorized"
        );

        // 2. 分类内排序（并发，全部完成后继续）
        notify(OrderProgress::Phase(HierarchyPhase::OrderingCategories));
        let ordered = self
            .order_categories(tracks, &categories, style, cancel, notify, &mut fallbacks)
            .await?;

        // 3. 拼接
        notify(OrderProgress::Phase(HierarchyPhase::Assembling));
        TaskScheduler::check_cancelled(cancel)?;
        let by_id: HashMap<&str, &Track> = tracks.iter().map(|t| (t.id.as_str(), t)).collect();
        let assembled = assemble(ordered, style, &by_id);

        let flat: Vec<TrackId> = assembled
            .iter()
            .flat_map(|c| c.track_ids.iter().cloned())
            .collect();
        let order = match check_permutation(reference.ids(), &flat) {
            Ok(()) => TrackOrder::new(flat),
            Err(violation) => {
                tracing::warn!("assembled order invalid ({}), repairing", violation);
                fallbacks.push(format!("assembly: {violation}"));
                repair_order(reference.ids(), &flat)
            }
        };

        Ok(OrderReport {
            order,
            mode: OrderMode::Hierarchical,
            categories: assembled,
            fallbacks,
        })
    }

    /// 按容量分块并发分类；每块的成败各自返回
    async fn categorize_chunks(
        &self,
        tracks: &[Track],
        style: &StyleSpec,
        category_budget: usize,
    ) -> Vec<Result<CategoryAssignment, OracleError>> {
        let chunk_size = self.settings.max_tracks_per_oracle_call.max(1);
        let calls = tracks.chunks(chunk_size).map(|chunk| async move {
            let _permit = self
                .scheduler
                .acquire_oracle()
                .await
                .map_err(|e| OracleError::Unavailable(e.to_string()))?;
            tokio::time::timeout(
                self.settings.oracle_timeout,
                self.oracle.categorize(chunk, style, category_budget.max(1)),
            )
            .await
            .unwrap_or(Err(OracleError::Timeout))
        });
        join_all(calls).await
    }

    async fn order_categories(
        &self,
        tracks: &[Track],
        categories: &[Category],
        style: &StyleSpec,
        cancel: &CancellationToken,
        notify: &(dyn Fn(OrderProgress) + Sync),
        fallbacks: &mut Vec<String>,
    ) -> Result<Vec<Category>, ReorderError> {
        let by_id: HashMap<&str, &Track> = tracks.iter().map(|t| (t.id.as_str(), t)).collect();
        let total = categories.len();
        let done = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<usize>();

        let handles: Vec<_> = categories
            .iter()
            .map(|category| {
                let members: Vec<Track> = category
                    .track_ids
                    .iter()
                    .filter_map(|id| by_id.get(id.as_str()).map(|t| (*t).clone()))
                    .collect();
                let label = category.label.clone();
                let style = style.clone();
                let oracle = self.oracle.clone();
                let scheduler = self.scheduler.clone();
                let settings = self.settings;
                let cancel = cancel.clone();
                let done = done.clone();
                let tx = tx.clone();

                tokio::spawn(async move {
                    let work = order_one_category(oracle, scheduler, settings, members, label, style, cancel);
                    let result = tokio::time::timeout(settings.category_timeout, work)
                        .await
                        .unwrap_or_else(|_| Err(ReorderError::Internal("category ordering timed out".into())));
                    let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                    let _ = tx.send(n);
                    result
                })
            })
            .collect();
        drop(tx);

        let joined = join_all(handles);
        tokio::pin!(joined);
        let results = loop {
            tokio::select! {
                Some(n) = rx.recv() => notify(OrderProgress::CategoryOrdered { done: n, total }),
                results = &mut joined => break results,
            }
        };
        while let Ok(n) = rx.try_recv() {
            notify(OrderProgress::CategoryOrdered { done: n, total });
        }

        let recovery = RecoveryEngine::new();
        let mut ordered = Vec::with_capacity(total);
        for (category, task) in categories.iter().zip(results) {
            let outcome = task.unwrap_or_else(|e| Err(ReorderError::Internal(format!("category task failed: {e}"))));
            match outcome {
                Ok((ids, reasons)) => {
                    fallbacks.extend(reasons.into_iter().map(|r| format!("{}: {r}", category.label)));
                    ordered.push(Category::new(category.label.clone(), ids));
                }
                Err(ReorderError::Cancelled) => return Err(ReorderError::Cancelled),
                Err(err) => match recovery.handle(&err, RecoveryStage::CategoryOrdering) {
                    RecoveryAction::IdentityOrder => {
                        tracing::warn!(category = %category.label, "{}, keeping original order", err);
                        fallbacks.push(format!("{}: {err}", category.label));
                        ordered.push(category.clone());
                    }
                    _ => return Err(err),
                },
            }
        }
        Ok(ordered)
    }
}

/// 单个分类：超过阈值时按阈值切子块分别排序后顺序拼接
async fn order_one_category(
    oracle: Arc<dyn Oracle>,
    scheduler: TaskScheduler,
    settings: OrdererSettings,
    members: Vec<Track>,
    label: String,
    style: StyleSpec,
    cancel: CancellationToken,
) -> Result<(Vec<TrackId>, Vec<String>), ReorderError> {
    let chunk_size = settings.small_playlist_threshold.max(2);
    let mut ids = Vec::with_capacity(members.len());
    let mut reasons = Vec::new();

    for chunk in members.chunks(chunk_size) {
        TaskScheduler::check_cancelled(&cancel)?;
        let _permit = scheduler.acquire_oracle().await?;
        let outcome = order_section(
            oracle.as_ref(),
            chunk,
            &style,
            Some(&label),
            settings.oracle_timeout,
        )
        .await;
        if let OrderSource::Heuristic { reason } | OrderSource::Identity { reason } = outcome.source {
            reasons.push(reason);
        }
        ids.extend(outcome.order.into_ids());
    }
    tracing::debug!(category = %label, tracks = ids.len(), "category ordered");
    Ok((ids, reasons))
}

/// 把（可能不完整、重复、带编造 id 的）分类结果整理成对 `reference` 的精确分区
///
/// 分类内曲目按原歌单顺序排列；空分类丢弃；分类数不超过 `budget`。
pub fn build_partition(
    reference: &[TrackId],
    assignments: &[CategoryAssignment],
    budget: usize,
) -> Vec<Category> {
    let budget = budget.max(1);
    let position: HashMap<&str, usize> = reference
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    // 合并各块同名分类，保持首次出现顺序
    let mut labels: Vec<String> = Vec::new();
    let mut members: HashMap<String, Vec<usize>> = HashMap::new();
    let mut assigned: HashSet<usize> = HashSet::with_capacity(reference.len());

    for category in assignments.iter().flat_map(|a| a.categories.iter()) {
        let label = if category.label.is_empty() {
            DEFAULT_CATEGORY.to_string()
        } else {
            category.label.clone()
        };
        for id in &category.track_ids {
            let Some(&pos) = position.get(id.as_str()) else {
                tracing::debug!(track = %id, "oracle returned unknown track id");
                continue;
            };
            if !assigned.insert(pos) {
                continue;
            }
            if !members.contains_key(&label) {
                labels.push(label.clone());
            }
            members.entry(label.clone()).or_default().push(pos);
        }
    }

    let mut default: Vec<usize> = members.remove(DEFAULT_CATEGORY).unwrap_or_default();
    default.extend((0..reference.len()).filter(|pos| !assigned.contains(pos)));
    labels.retain(|l| l != DEFAULT_CATEGORY);

    // 超预算：按规模保留前 budget-1 个（同规模取先出现的），其余并入默认分类
    let slots = if default.is_empty() && labels.len() <= budget {
        budget
    } else {
        budget - 1
    };
    if labels.len() > slots {
        let mut ranked: Vec<(usize, String)> = labels.drain(..).enumerate().collect();
        ranked.sort_by(|(ia, a), (ib, b)| {
            let la = members.get(a).map_or(0, Vec::len);
            let lb = members.get(b).map_or(0, Vec::len);
            lb.cmp(&la).then(ia.cmp(ib))
        });
        for (_, label) in ranked.split_off(slots) {
            default.extend(members.remove(&label).unwrap_or_default());
        }
        ranked.sort_by_key(|(i, _)| *i);
        labels = ranked.into_iter().map(|(_, l)| l).collect();
    }

    let mut partition: Vec<Category> = labels
        .into_iter()
        .filter_map(|label| {
            let mut positions = members.remove(&label)?;
            positions.sort_unstable();
            Some(Category::new(
                label,
                positions.into_iter().map(|p| reference[p].clone()).collect(),
            ))
        })
        .collect();
    if !default.is_empty() {
        default.sort_unstable();
        partition.push(Category::new(
            DEFAULT_CATEGORY,
            default.into_iter().map(|p| reference[p].clone()).collect(),
        ));
    }
    partition
}

/// 分类排序：关键词优先级 -> 风格指标均值 -> 原先后
fn assemble(categories: Vec<Category>, style: &StyleSpec, by_id: &HashMap<&str, &Track>) -> Vec<Category> {
    let mut keyed: Vec<(u8, f64, usize, Category)> = categories
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let members: Vec<&Track> = c
                .track_ids
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).copied())
                .collect();
            (category_priority(&c.label), mean_metric(style.style, &members), i, c)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)).then(a.2.cmp(&b.2)));
    keyed.into_iter().map(|(_, _, _, c)| c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<TrackId> {
        (0..n).map(|i| format!("t{i}")).collect()
    }

    fn assert_partition(reference: &[TrackId], partition: &[Category]) {
        let flat: Vec<TrackId> = partition.iter().flat_map(|c| c.track_ids.clone()).collect();
        let mut sorted = flat.clone();
        sorted.sort();
        let mut expected = reference.to_vec();
        expected.sort();
        assert_eq!(sorted, expected);
        assert!(partition.iter().all(|c| !c.track_ids.is_empty()));
    }

    #[test]
    fn test_partition_fills_missing_and_drops_unknown() {
        let reference = ids(6);
        let assignment = CategoryAssignment::new(vec![
            Category::new("Opening", vec!["t0".into(), "t1".into(), "ghost".into()]),
            Category::new("Peak", vec!["t1".into(), "t3".into()]),
        ]);
        let partition = build_partition(&reference, &[assignment], 5);
        assert_partition(&reference, &partition);
        assert_eq!(partition[0].track_ids, vec!["t0", "t1"]);
        assert_eq!(partition[1].track_ids, vec!["t3"]);
        assert_eq!(partition[2].label, DEFAULT_CATEGORY);
        assert_eq!(partition[2].track_ids, vec!["t2", "t4", "t5"]);
    }

    #[test]
    fn test_partition_respects_budget() {
        let reference = ids(10);
        let assignment = CategoryAssignment::new(vec![
            Category::new("A", vec!["t0".into()]),
            Category::new("B", vec!["t1".into(), "t2".into(), "t3".into()]),
            Category::new("C", vec!["t4".into(), "t5".into()]),
            Category::new("D", vec!["t6".into(), "t7".into(), "t8".into(), "t9".into()]),
        ]);
        let partition = build_partition(&reference, &[assignment], 3);
        assert_partition(&reference, &partition);
        assert_eq!(partition.len(), 3);
        let labels: Vec<&str> = partition.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["B", "D", DEFAULT_CATEGORY]);
        assert_eq!(partition[2].track_ids, vec!["t0", "t4", "t5"]);
    }

    #[test]
    fn test_partition_exact_budget_without_default() {
        let reference = ids(4);
        let assignment = CategoryAssignment::new(vec![
            Category::new("A", vec!["t0".into(), "t1".into()]),
            Category::new("B", vec!["t2".into(), "t3".into()]),
        ]);
        let partition = build_partition(&reference, &[assignment], 2);
        assert_eq!(partition.len(), 2);
        assert_partition(&reference, &partition);
    }

    #[test]
    fn test_partition_merges_chunks_with_same_label() {
        let reference = ids(4);
        let first = CategoryAssignment::new(vec![Category::new("Peak", vec!["t0".into(), "t1".into()])]);
        let second = CategoryAssignment::new(vec![Category::new("Peak", vec!["t2".into(), "t3".into()])]);
        let partition = build_partition(&reference, &[first, second], 4);
        assert_eq!(partition, vec![Category::new("Peak", reference.clone())]);
    }

    #[test]
    fn test_partition_budget_one() {
        let reference = ids(3);
        let assignment = CategoryAssignment::new(vec![
            Category::new("A", vec!["t0".into()]),
            Category::new("B", vec!["t1".into(), "t2".into()]),
        ]);
        let partition = build_partition(&reference, &[assignment], 1);
        assert_eq!(partition.len(), 1);
        assert_partition(&reference, &partition);
    }

    #[test]
    fn test_assemble_uses_keywords_then_metric() {
        let tracks = vec![
            Track::new("a", "a", "x").with_energy(0.9),
            Track::new("b", "b", "x").with_energy(0.1),
            Track::new("c", "c", "x").with_energy(0.5),
        ];
        let by_id: HashMap<&str, &Track> = tracks.iter().map(|t| (t.id.as_str(), t)).collect();
        let style = StyleSpec::new(crate::reorder::ReorderStyle::EnergyFlow);
        let assembled = assemble(
            vec![
                Category::new("Resolution", vec!["c".into()]),
                Category::new("Loud", vec!["a".into()]),
                Category::new("Quiet", vec!["b".into()]),
            ],
            &style,
            &by_id,
        );
        let labels: Vec<&str> = assembled.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["Quiet", "Loud", "Resolution"]);
    }
}
