//! 重排领域模型：Track、TrackOrder、MoveOperation、风格与策略
//!
//! Track 在一次任务内不可变；TrackOrder 是曲目 id 的有序序列（要求为输入集合的一个排列）。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 曲目标识（远端平台的不透明字符串，重排前后不变）
pub type TrackId = String;

/// 曲目附加元数据：能量、情绪效价、热度、歌词标签，均可能缺失
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// 能量 0.0 ~ 1.0
    #[serde(default)]
    pub energy: Option<f64>,
    /// 情绪效价 0.0（低沉）~ 1.0（积极）
    #[serde(default)]
    pub valence: Option<f64>,
    #[serde(default)]
    pub popularity: Option<u32>,
    /// 歌词/分析得出的标签（如 narrative:peak、tone:melancholic）
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TrackMetadata {
    /// 只填充当前缺失的字段，已有值不覆盖；标签去重追加
    pub fn merge(&mut self, other: TrackMetadata) {
        if self.energy.is_none() {
            self.energy = other.energy.map(clamp_unit);
        }
        if self.valence.is_none() {
            self.valence = other.valence.map(clamp_unit);
        }
        if self.popularity.is_none() {
            self.popularity = other.popularity;
        }
        for tag in other.tags {
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.energy.is_none()
            && self.valence.is_none()
            && self.popularity.is_none()
            && self.tags.is_empty()
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.5
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// 单首曲目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub metadata: TrackMetadata,
}

impl Track {
    pub fn new(id: impl Into<String>, name: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            artist: artist.into(),
            album: None,
            metadata: TrackMetadata::default(),
        }
    }

    pub fn with_energy(mut self, energy: f64) -> Self {
        self.metadata.energy = Some(energy);
        self
    }

    pub fn with_valence(mut self, valence: f64) -> Self {
        self.metadata.valence = Some(valence);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.push(tag.into());
        self
    }
}

/// 曲目顺序：id 序列
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackOrder(Vec<TrackId>);

impl TrackOrder {
    pub fn new(ids: Vec<TrackId>) -> Self {
        Self(ids)
    }

    /// 取曲目列表当前的顺序
    pub fn of(tracks: &[Track]) -> Self {
        Self(tracks.iter().map(|t| t.id.clone()).collect())
    }

    pub fn ids(&self) -> &[TrackId] {
        &self.0
    }

    pub fn into_ids(self) -> Vec<TrackId> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<TrackId>> for TrackOrder {
    fn from(ids: Vec<TrackId>) -> Self {
        Self(ids)
    }
}

impl<'a> From<Vec<&'a str>> for TrackOrder {
    fn from(ids: Vec<&'a str>) -> Self {
        Self(ids.into_iter().map(String::from).collect())
    }
}

/// 远端区间移动：从当前序列移除 `range_start` 起的 `range_length` 首，
/// 再插入到（移动前序列中）`insert_before` 所指元素之前
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOperation {
    pub range_start: usize,
    pub range_length: usize,
    pub insert_before: usize,
}

impl fmt::Display for MoveOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "move {} track(s) from {} to before {}",
            self.range_length, self.range_start, self.insert_before
        )
    }
}

/// 重排风格
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorderStyle {
    /// 情绪旅程：效价单调推进
    EmotionalJourney,
    /// 能量曲线：上升、到顶、回落
    EnergyFlow,
    /// 叙事弧：按故事阶段推进
    NarrativeArc,
    /// 情绪聚类：相近氛围相邻
    MoodClustering,
}

impl ReorderStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmotionalJourney => "emotional_journey",
            Self::EnergyFlow => "energy_flow",
            Self::NarrativeArc => "narrative_arc",
            Self::MoodClustering => "mood_clustering",
        }
    }

    /// 给 oracle 的风格指引（一句话）
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::EnergyFlow => "energy levels should rise, peak and then cool down (low -> high -> peak -> cooldown)",
            Self::EmotionalJourney => "emotions should progress (intro -> buildup -> climax -> resolution)",
            Self::NarrativeArc => "tell a complete story with clear chapters from beginning to end",
            Self::MoodClustering => "group similar vibes together while keeping transitions smooth",
        }
    }
}

impl fmt::Display for ReorderStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReorderStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "emotional_journey" => Ok(Self::EmotionalJourney),
            "energy_flow" => Ok(Self::EnergyFlow),
            "narrative_arc" => Ok(Self::NarrativeArc),
            "mood_clustering" => Ok(Self::MoodClustering),
            other => Err(format!("unknown reorder style: {other}")),
        }
    }
}

/// 风格请求：风格 + 用户意图 + 个人语气
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleSpec {
    pub style: ReorderStyle,
    #[serde(default)]
    pub user_intent: Option<String>,
    #[serde(default)]
    pub personal_tone: Option<String>,
}

impl StyleSpec {
    pub fn new(style: ReorderStyle) -> Self {
        Self {
            style,
            user_intent: None,
            personal_tone: None,
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.user_intent = Some(intent.into());
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.personal_tone = Some(tone.into());
        self
    }
}

/// 应用到远端的策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// 逐条区间移动
    Targeted,
    /// 整体替换
    FullRewrite,
}

/// 调用方指定的重排方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorderMethod {
    /// 由成本估算决定
    #[default]
    Auto,
    Targeted,
    FullRewrite,
}

impl std::str::FromStr for ReorderMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "targeted" | "intelligent" => Ok(Self::Targeted),
            "full_rewrite" | "rewrite" => Ok(Self::FullRewrite),
            other => Err(format!("unknown reorder method: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_merge_keeps_existing() {
        let mut meta = TrackMetadata {
            energy: Some(0.2),
            tags: vec!["tone:calm".into()],
            ..Default::default()
        };
        meta.merge(TrackMetadata {
            energy: Some(0.9),
            valence: Some(1.7),
            popularity: Some(40),
            tags: vec!["tone:calm".into(), "narrative:peak".into()],
        });
        assert_eq!(meta.energy, Some(0.2));
        assert_eq!(meta.valence, Some(1.0));
        assert_eq!(meta.popularity, Some(40));
        assert_eq!(meta.tags, vec!["tone:calm".to_string(), "narrative:peak".to_string()]);
    }

    #[test]
    fn test_style_parse() {
        assert_eq!("energy-flow".parse::<ReorderStyle>(), Ok(ReorderStyle::EnergyFlow));
        assert!("polka".parse::<ReorderStyle>().is_err());
        assert_eq!("intelligent".parse::<ReorderMethod>(), Ok(ReorderMethod::Targeted));
    }

    #[test]
    fn test_move_display() {
        let op = MoveOperation {
            range_start: 3,
            range_length: 1,
            insert_before: 0,
        };
        assert_eq!(op.to_string(), "move 1 track(s) from 3 to before 0");
    }
}
