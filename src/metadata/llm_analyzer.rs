//! 用 LLM 分析单首曲目：叙事阶段、情绪基调，以及粗略的能量 / 效价估计

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::{LlmClient, Message};
use crate::metadata::{MetadataError, MetadataFetcher};
use crate::oracle::parse::strip_code_fences;
use crate::reorder::{Track, TrackMetadata};

/// LLM 返回的分析结果
#[derive(Debug, Deserialize)]
struct SongAnalysis {
    #[serde(default)]
    narrative_category: Option<String>,
    #[serde(default)]
    emotional_tone: Option<String>,
    #[serde(default)]
    energy: Option<f64>,
    #[serde(default)]
    valence: Option<f64>,
}

pub struct LlmTrackAnalyzer {
    llm: Arc<dyn LlmClient>,
}

impl LlmTrackAnalyzer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn prompt(track: &Track) -> String {
        format!(
            "Analyze the song '{}' by '{}'{}.\n\
Respond with ONLY a JSON object with the keys:\n\
- \"narrative_category\": the song's role in a story (e.g. ambition, come-up, peak, heartbreak, introspection, legacy)\n\
- \"emotional_tone\": one or two words (e.g. triumphant, melancholic)\n\
- \"energy\": number from 0.0 (calm) to 1.0 (intense)\n\
- \"valence\": number from 0.0 (dark) to 1.0 (uplifting)",
            track.name,
            track.artist,
            track
                .album
                .as_deref()
                .map(|a| format!(" from the album '{a}'"))
                .unwrap_or_default(),
        )
    }
}

fn tag(prefix: &str, value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .map(|v| format!("{prefix}:{v}"))
}

#[async_trait]
impl MetadataFetcher for LlmTrackAnalyzer {
    fn name(&self) -> &str {
        "llm-analyzer"
    }

    async fn fetch(&self, track: &Track) -> Result<TrackMetadata, MetadataError> {
        let messages = [
            Message::system("You are a music analyst. Answer with raw JSON only."),
            Message::user(Self::prompt(track)),
        ];
        let raw = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| MetadataError::Unavailable(e.to_string()))?;

        let body = strip_code_fences(&raw);
        let analysis: SongAnalysis = serde_json::from_str(body)
            .map_err(|e| MetadataError::Malformed(format!("{e}: {}", body.chars().take(80).collect::<String>())))?;

        Ok(TrackMetadata {
            energy: analysis.energy,
            valence: analysis.valence,
            popularity: None,
            tags: [
                tag("narrative", analysis.narrative_category),
                tag("tone", analysis.emotional_tone),
            ]
            .into_iter()
            .flatten()
            .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[tokio::test]
    async fn test_analysis_becomes_tags() {
        let mock = Arc::new(MockLlmClient::scripted(vec![Ok(
            "```json\n{\"narrative_category\": \"Come-Up\", \"emotional_tone\": \"Hungry\", \"energy\": 0.7}\n```"
                .into(),
        )]));
        let analyzer = LlmTrackAnalyzer::new(mock.clone());
        let meta = analyzer.fetch(&Track::new("t1", "Started", "Artist")).await.unwrap();
        assert_eq!(meta.energy, Some(0.7));
        assert_eq!(meta.valence, None);
        assert_eq!(meta.tags, vec!["narrative:come-up", "tone:hungry"]);
        assert!(mock.prompts()[0].contains("'Started' by 'Artist'"));
    }

    #[tokio::test]
    async fn test_malformed_analysis() {
        let mock = Arc::new(MockLlmClient::scripted(vec![Ok("I think it's sad".into())]));
        let analyzer = LlmTrackAnalyzer::new(mock);
        assert!(matches!(
            analyzer.fetch(&Track::new("t1", "x", "y")).await,
            Err(MetadataError::Malformed(_))
        ));
    }
}
