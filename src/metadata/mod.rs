//! 曲目元数据补全
//!
//! 排序前把各数据源（歌词分析、音频特征等）的结果并入 Track，只填缺失字段。
//! 单首曲目失败只记日志：元数据缺失会降低兜底排序的质量，但不影响排列的完整性。

pub mod llm_analyzer;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use thiserror::Error;

use crate::reorder::{Track, TrackMetadata};

pub use llm_analyzer::LlmTrackAnalyzer;

/// 元数据获取失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("no metadata for track {0}")]
    NotFound(String),

    #[error("metadata source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed metadata: {0}")]
    Malformed(String),

    #[error("metadata fetch timed out")]
    Timeout,
}

/// 元数据源
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// 数据源名称（日志用）
    fn name(&self) -> &str;

    async fn fetch(&self, track: &Track) -> Result<TrackMetadata, MetadataError>;
}

/// 补全统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichReport {
    /// 至少一个数据源成功的曲目数
    pub enriched: usize,
    /// 失败的 (曲目, 数据源) 次数
    pub failures: usize,
}

/// 依次询问各数据源并合并结果；曲目之间并发（至多 `concurrency` 首），输出顺序与输入一致
pub async fn enrich_tracks(
    tracks: Vec<Track>,
    fetchers: &[Arc<dyn MetadataFetcher>],
    timeout: Duration,
    concurrency: usize,
) -> (Vec<Track>, EnrichReport) {
    if fetchers.is_empty() {
        return (tracks, EnrichReport::default());
    }

    let results: Vec<(Track, bool, usize)> = stream::iter(tracks.into_iter().map(|mut track| async move {
        let mut any_ok = false;
        let mut failures = 0;
        for fetcher in fetchers {
            let fetched = tokio::time::timeout(timeout, fetcher.fetch(&track))
                .await
                .unwrap_or(Err(MetadataError::Timeout));
            match fetched {
                Ok(meta) => {
                    track.metadata.merge(meta);
                    any_ok = true;
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(track = %track.id, source = fetcher.name(), "metadata fetch failed: {}", e);
                }
            }
        }
        (track, any_ok, failures)
    }))
    .buffered(concurrency.max(1))
    .collect()
    .await;

    let mut report = EnrichReport::default();
    let tracks = results
        .into_iter()
        .map(|(track, ok, failures)| {
            report.enriched += usize::from(ok);
            report.failures += failures;
            track
        })
        .collect();
    (tracks, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnergySource;

    #[async_trait]
    impl MetadataFetcher for EnergySource {
        fn name(&self) -> &str {
            "energy"
        }

        async fn fetch(&self, track: &Track) -> Result<TrackMetadata, MetadataError> {
            if track.id == "broken" {
                return Err(MetadataError::NotFound(track.id.clone()));
            }
            Ok(TrackMetadata {
                energy: Some(0.8),
                valence: Some(0.4),
                ..Default::default()
            })
        }
    }

    struct SlowSource;

    #[async_trait]
    impl MetadataFetcher for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch(&self, _track: &Track) -> Result<TrackMetadata, MetadataError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(TrackMetadata::default())
        }
    }

    #[tokio::test]
    async fn test_enrich_keeps_order_and_skips_failures() {
        let tracks = vec![
            Track::new("a", "A", "x").with_energy(0.1),
            Track::new("broken", "B", "x"),
            Track::new("c", "C", "x"),
        ];
        let fetchers: Vec<Arc<dyn MetadataFetcher>> = vec![Arc::new(EnergySource)];
        let (out, report) = enrich_tracks(tracks, &fetchers, Duration::from_secs(1), 2).await;

        let ids: Vec<&str> = out.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "broken", "c"]);
        // 已有值不覆盖
        assert_eq!(out[0].metadata.energy, Some(0.1));
        assert_eq!(out[0].metadata.valence, Some(0.4));
        assert!(out[1].metadata.is_empty());
        assert_eq!(out[2].metadata.energy, Some(0.8));
        assert_eq!(report, EnrichReport { enriched: 2, failures: 1 });
    }

    #[tokio::test]
    async fn test_enrich_times_out_per_track() {
        let fetchers: Vec<Arc<dyn MetadataFetcher>> = vec![Arc::new(SlowSource)];
        let (out, report) = enrich_tracks(
            vec![Track::new("a", "A", "x")],
            &fetchers,
            Duration::from_millis(20),
            1,
        )
        .await;
        assert_eq!(out.len(), 1);
        assert_eq!(report.failures, 1);
    }
}
