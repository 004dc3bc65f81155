//! 确定性启发式排序：oracle 不可用或输出非法时的兜底
//!
//! 只依赖曲目元数据，缺失值按 0.5 处理；同分按原始位置稳定排序，因此总能给出合法排列。

use std::cmp::Ordering;

use super::model::{ReorderStyle, Track, TrackOrder};

const NEUTRAL: f64 = 0.5;

/// 叙事阶段关键词（越靠前越早出现）
const NARRATIVE_PHASES: &[&[&str]] = &[
    &["ambition", "come-up", "comeup", "opening", "intro", "beginning", "start"],
    &["fame", "wealth", "building", "rise", "growing", "development"],
    &["celebrity", "pressure", "peak", "climax", "intense", "high"],
    &["relationship", "heartbreak", "love", "emotional", "heart"],
    &["rivalry", "conflict", "struggle", "deep", "core"],
    &["introspection", "legacy", "resolution", "ending", "outro", "conclusion"],
];

/// 分类名排序关键词（开场 -> 铺垫 -> 高潮 -> 情感 -> 收尾）
const CATEGORY_PRIORITY: &[(&str, u8)] = &[
    ("opening", 0),
    ("intro", 0),
    ("beginning", 0),
    ("start", 0),
    ("building", 1),
    ("rise", 1),
    ("growing", 1),
    ("development", 1),
    ("peak", 2),
    ("climax", 2),
    ("high", 2),
    ("intense", 2),
    ("emotional", 3),
    ("heart", 3),
    ("core", 3),
    ("deep", 3),
    ("resolution", 4),
    ("ending", 4),
    ("outro", 4),
    ("conclusion", 4),
    ("cooldown", 4),
    ("cool-down", 4),
    ("introspection", 4),
    ("legacy", 4),
];

/// 未命中关键词的分类排在中间
const DEFAULT_CATEGORY_PRIORITY: u8 = 3;

fn energy(track: &Track) -> f64 {
    track.metadata.energy.filter(|v| v.is_finite()).unwrap_or(NEUTRAL)
}

fn valence(track: &Track) -> f64 {
    track.metadata.valence.filter(|v| v.is_finite()).unwrap_or(NEUTRAL)
}

/// 小写后按非字母数字切词（`narrative:come-up` -> narrative / come / up）
fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// 关键词按整词匹配（多词关键词要求连续出现），"intro" 不会命中 "introspection"
fn mentions(text_words: &[String], keyword: &str) -> bool {
    let keyword = words(keyword);
    !keyword.is_empty() && text_words.windows(keyword.len()).any(|w| w == keyword.as_slice())
}

/// 从标签推断叙事阶段；无匹配时放在中段
pub fn narrative_phase(track: &Track) -> usize {
    track
        .metadata
        .tags
        .iter()
        .filter_map(|tag| {
            let tag = words(tag);
            NARRATIVE_PHASES
                .iter()
                .position(|keywords| keywords.iter().any(|k| mentions(&tag, k)))
        })
        .min()
        .unwrap_or(NARRATIVE_PHASES.len() / 2)
}

/// 风格对应的单一数值指标（用于分类排序与兜底排序）
pub fn style_metric(style: ReorderStyle, track: &Track) -> f64 {
    match style {
        ReorderStyle::EnergyFlow => energy(track),
        ReorderStyle::EmotionalJourney => valence(track),
        ReorderStyle::NarrativeArc => narrative_phase(track) as f64,
        ReorderStyle::MoodClustering => mood_bucket(track) as f64 + energy(track) / 2.0,
    }
}

fn mood_bucket(track: &Track) -> u8 {
    match valence(track) {
        v if v < 0.34 => 0,
        v if v < 0.67 => 1,
        _ => 2,
    }
}

fn by_metric(style: ReorderStyle) -> impl Fn(&(usize, &Track), &(usize, &Track)) -> Ordering {
    move |(ia, a), (ib, b)| {
        style_metric(style, a)
            .total_cmp(&style_metric(style, b))
            .then(ia.cmp(ib))
    }
}

/// 兜底排序：总是返回输入 id 的一个排列，且永不失败
pub fn heuristic_order(tracks: &[Track], style: ReorderStyle) -> TrackOrder {
    let mut indexed: Vec<(usize, &Track)> = tracks.iter().enumerate().collect();

    match style {
        ReorderStyle::EnergyFlow => {
            indexed.sort_by(by_metric(style));
            energy_arc(indexed)
        }
        ReorderStyle::NarrativeArc => {
            indexed.sort_by(|(ia, a), (ib, b)| {
                narrative_phase(a)
                    .cmp(&narrative_phase(b))
                    .then(energy(a).total_cmp(&energy(b)))
                    .then(ia.cmp(ib))
            });
            TrackOrder::new(indexed.into_iter().map(|(_, t)| t.id.clone()).collect())
        }
        ReorderStyle::EmotionalJourney | ReorderStyle::MoodClustering => {
            indexed.sort_by(by_metric(style));
            TrackOrder::new(indexed.into_iter().map(|(_, t)| t.id.clone()).collect())
        }
    }
}

/// 能量弧：按能量升序爬升到最高点，再把约四分之一的曲目降序放在高点之后作为回落
fn energy_arc(sorted: Vec<(usize, &Track)>) -> TrackOrder {
    let n = sorted.len();
    if n < 4 {
        return TrackOrder::new(sorted.into_iter().map(|(_, t)| t.id.clone()).collect());
    }

    let mut rise = Vec::with_capacity(n);
    let mut cooldown = Vec::with_capacity(n / 4 + 1);
    for (i, (_, track)) in sorted.into_iter().enumerate() {
        if i % 4 == 2 && i + 1 < n {
            cooldown.push(track.id.clone());
        } else {
            rise.push(track.id.clone());
        }
    }
    cooldown.reverse();
    rise.extend(cooldown);
    TrackOrder::new(rise)
}

/// 分类名的关键词优先级
pub fn category_priority(label: &str) -> u8 {
    let label = words(label);
    CATEGORY_PRIORITY
        .iter()
        .find(|(keyword, _)| mentions(&label, keyword))
        .map(|(_, p)| *p)
        .unwrap_or(DEFAULT_CATEGORY_PRIORITY)
}

/// 分类内风格指标均值（空分类按中性值）
pub fn mean_metric(style: ReorderStyle, tracks: &[&Track]) -> f64 {
    if tracks.is_empty() {
        return NEUTRAL;
    }
    tracks.iter().map(|t| style_metric(style, t)).sum::<f64>() / tracks.len() as f64
}
