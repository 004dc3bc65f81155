//! 单批排序：一次 oracle 调用拿到整批顺序，校验通过才采用，否则走启发式兜底
//!
//! 本层不做重试（重试在 LLM 客户端层），也从不失败：任何情况下都返回输入 id 的一个排列。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::heuristic::heuristic_order;
use super::model::{StyleSpec, Track, TrackOrder};
use super::validate::{validate_candidate, Validation};
use crate::core::{RecoveryAction, RecoveryEngine, RecoveryStage, ReorderError};
use crate::oracle::{Oracle, OracleError};

/// 结果来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum OrderSource {
    Oracle,
    /// 曲目数不足 2，无需排序
    Trivial,
    Heuristic { reason: String },
    /// 保持原有相对顺序
    Identity { reason: String },
}

impl OrderSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Heuristic { .. } | Self::Identity { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub order: TrackOrder,
    pub source: OrderSource,
}

/// 整个歌单单批排序
pub async fn order_single_batch(
    oracle: &dyn Oracle,
    tracks: &[Track],
    style: &StyleSpec,
    oracle_timeout: Duration,
) -> BatchOutcome {
    order_section(oracle, tracks, style, None, oracle_timeout).await
}

/// 对一组曲目单批排序；`section` 为其所属分类（分层排序第二阶段传入）
pub async fn order_section(
    oracle: &dyn Oracle,
    tracks: &[Track],
    style: &StyleSpec,
    section: Option<&str>,
    oracle_timeout: Duration,
) -> BatchOutcome {
    let reference = TrackOrder::of(tracks);
    if tracks.len() < 2 {
        return BatchOutcome {
            order: reference,
            source: OrderSource::Trivial,
        };
    }

    let candidate = tokio::time::timeout(oracle_timeout, oracle.order(tracks, style, section))
        .await
        .unwrap_or(Err(OracleError::Timeout));

    let err = match candidate {
        Ok(ids) => match validate_candidate(reference.ids(), ids) {
            Validation::Valid(order) => {
                return BatchOutcome {
                    order,
                    source: OrderSource::Oracle,
                }
            }
            Validation::Invalid(violation) => ReorderError::InvalidOrdering(violation),
        },
        Err(e) => ReorderError::from(e),
    };

    let reason = err.to_string();
    match RecoveryEngine::new().handle(&err, RecoveryStage::SingleBatch) {
        RecoveryAction::FallbackToHeuristic => {
            tracing::warn!(
                tracks = tracks.len(),
                section,
                style = %style.style,
                "oracle ordering rejected ({}), using heuristic order",
                reason
            );
            BatchOutcome {
                order: heuristic_order(tracks, style.style),
                source: OrderSource::Heuristic { reason },
            }
        }
        _ => BatchOutcome {
            order: reference,
            source: OrderSource::Identity { reason },
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::oracle::CategoryAssignment;
    use crate::reorder::{check_permutation, ReorderStyle, TrackId};

    /// 固定回复的 oracle
    struct FixedOracle {
        reply: Result<Vec<TrackId>, OracleError>,
        calls: AtomicUsize,
    }

    impl FixedOracle {
        fn new(reply: Result<Vec<&str>, OracleError>) -> Self {
            Self {
                reply: reply.map(|v| v.into_iter().map(String::from).collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Oracle for FixedOracle {
        async fn order(
            &self,
            _tracks: &[Track],
            _style: &StyleSpec,
            _section: Option<&str>,
        ) -> Result<Vec<TrackId>, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }

        async fn categorize(
            &self,
            _tracks: &[Track],
            _style: &StyleSpec,
            _max_categories: usize,
        ) -> Result<CategoryAssignment, OracleError> {
            Err(OracleError::Unavailable("not used".into()))
        }
    }

    fn five() -> Vec<Track> {
        ["a", "b", "c", "d", "e"]
            .iter()
            .enumerate()
            .map(|(i, id)| Track::new(*id, *id, "x").with_energy(1.0 - i as f64 / 5.0))
            .collect()
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_valid_oracle_order_is_used() {
        let oracle = FixedOracle::new(Ok(vec!["e", "d", "c", "b", "a"]));
        let style = StyleSpec::new(ReorderStyle::EmotionalJourney);
        let out = order_single_batch(&oracle, &five(), &style, TIMEOUT).await;
        assert_eq!(out.source, OrderSource::Oracle);
        assert_eq!(out.order, TrackOrder::from(vec!["e", "d", "c", "b", "a"]));
    }

    #[tokio::test]
    async fn test_missing_track_falls_back_to_heuristic() {
        let oracle = FixedOracle::new(Ok(vec!["a", "b", "c", "d"]));
        let style = StyleSpec::new(ReorderStyle::EnergyFlow);
        let tracks = five();
        let out = order_single_batch(&oracle, &tracks, &style, TIMEOUT).await;

        assert!(matches!(out.source, OrderSource::Heuristic { ref reason } if reason.contains("e")));
        assert_eq!(out.order.len(), 5);
        check_permutation(TrackOrder::of(&tracks).ids(), out.order.ids()).unwrap();
        assert_eq!(out.order, heuristic_order(&tracks, ReorderStyle::EnergyFlow));
    }

    #[tokio::test]
    async fn test_oracle_error_falls_back() {
        let oracle = FixedOracle::new(Err(OracleError::Unavailable("down".into())));
        let style = StyleSpec::new(ReorderStyle::MoodClustering);
        let out = order_single_batch(&oracle, &five(), &style, TIMEOUT).await;
        assert!(out.source.is_fallback());
        assert_eq!(out.order.len(), 5);
    }

    #[tokio::test]
    async fn test_trivial_input_skips_oracle() {
        let oracle = FixedOracle::new(Ok(vec![]));
        let style = StyleSpec::new(ReorderStyle::MoodClustering);
        let tracks = vec![Track::new("solo", "s", "x")];
        let out = order_single_batch(&oracle, &tracks, &style, TIMEOUT).await;
        assert_eq!(out.source, OrderSource::Trivial);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }
}
