//! 基于 LlmClient 的 oracle：构造排序 / 分类提示词，带超时调用并解析回复

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{LlmClient, Message};
use crate::oracle::parse::{parse_categories, parse_id_list};
use crate::oracle::{CategoryAssignment, Oracle, OracleError};
use crate::reorder::{StyleSpec, Track, TrackId};

const SYSTEM_PROMPT: &str = "You are a music curator who sequences playlists. \
You always answer with raw JSON only: no markdown, no explanations.";

/// LLM 驱动的 oracle
pub struct LlmOracle {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn ask(&self, prompt: String) -> Result<String, OracleError> {
        let messages = [Message::system(SYSTEM_PROMPT), Message::user(prompt)];
        tokio::time::timeout(self.timeout, self.llm.complete(&messages))
            .await
            .map_err(|_| OracleError::Timeout)?
            .map_err(OracleError::from)
    }
}

/// 提示词里的曲目：id、名称、艺人与已有元数据
fn tracks_json(tracks: &[Track]) -> String {
    let items: Vec<serde_json::Value> = tracks
        .iter()
        .map(|t| {
            let mut item = json!({
                "track_id": t.id,
                "name": t.name,
                "artist": t.artist,
            });
            if let Some(obj) = item.as_object_mut() {
                if let Some(e) = t.metadata.energy {
                    obj.insert("energy".into(), json!(e));
                }
                if let Some(v) = t.metadata.valence {
                    obj.insert("valence".into(), json!(v));
                }
                if !t.metadata.tags.is_empty() {
                    obj.insert("tags".into(), json!(t.metadata.tags));
                }
            }
            item
        })
        .collect();
    serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
}

fn user_context(style: &StyleSpec) -> String {
    format!(
        "USER'S GOAL: {}\nUSER'S STYLE: {}\nREORDER STYLE: {} ({})",
        style
            .user_intent
            .as_deref()
            .unwrap_or("Create the best listening experience"),
        style
            .personal_tone
            .as_deref()
            .unwrap_or("No specific style preferences"),
        style.style,
        style.style.guidance(),
    )
}

pub(crate) fn order_prompt(tracks: &[Track], style: &StyleSpec, section: Option<&str>) -> String {
    let scope = match section {
        Some(name) => format!("You are ordering songs within the \"{name}\" section of a playlist."),
        None => "You are ordering every song of a playlist.".to_string(),
    };
    format!(
        "{scope}\n\nSONGS TO ORDER:\n{songs}\n\n{context}\n\n\
ORDER THESE SONGS so they flow well. Consider energy progression, emotional flow, \
musical transitions and narrative coherence.\n\n\
RULES:\n\
1. Return ONLY a JSON array of track_ids, e.g. [\"id_1\", \"id_2\"]\n\
2. Include ALL {n} track_ids exactly once, exactly as provided\n\
3. Do not invent track_ids",
        songs = tracks_json(tracks),
        context = user_context(style),
        n = tracks.len(),
    )
}

pub(crate) fn categorize_prompt(tracks: &[Track], style: &StyleSpec, max_categories: usize) -> String {
    format!(
        "Group these songs into at most {max_categories} phases that create a good listening \
experience from beginning to end.\n\nSONGS TO CATEGORIZE:\n{songs}\n\n{context}\n\n\
RULES:\n\
1. Each song MUST be assigned to exactly one category\n\
2. Categories follow a logical progression (beginning -> middle -> end)\n\
3. Name categories after their role, e.g. Opening, Building_Energy, Peak_Moments, Resolution\n\n\
OUTPUT: ONLY a JSON object with category names as keys and arrays of track_ids as values, e.g.\n\
{{\"Opening\": [\"abc\"], \"Peak_Moments\": [\"def\"]}}",
        songs = tracks_json(tracks),
        context = user_context(style),
    )
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn order(
        &self,
        tracks: &[Track],
        style: &StyleSpec,
        section: Option<&str>,
    ) -> Result<Vec<TrackId>, OracleError> {
        let raw = self.ask(order_prompt(tracks, style, section)).await?;
        tracing::debug!(tracks = tracks.len(), section, "oracle ordering response received");
        parse_id_list(&raw)
    }

    async fn categorize(
        &self,
        tracks: &[Track],
        style: &StyleSpec,
        max_categories: usize,
    ) -> Result<CategoryAssignment, OracleError> {
        let raw = self.ask(categorize_prompt(tracks, style, max_categories)).await?;
        parse_categories(&raw)
    }
}
