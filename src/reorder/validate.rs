//! 排列校验：oracle 输出不可信，进入后续流程前必须确认是输入 id 集合的一个排列

use std::collections::HashSet;

use thiserror::Error;

use super::model::{TrackId, TrackOrder};

/// 候选顺序违反排列约束的具体原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderingViolation {
    #[error("expected {expected} track ids, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("duplicate track id: {0}")]
    Duplicate(TrackId),

    #[error("unknown track id: {0}")]
    Unknown(TrackId),

    #[error("missing track id: {0}")]
    Missing(TrackId),
}

/// 校验结果：Valid 携带可信顺序，Invalid 携带原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid(TrackOrder),
    Invalid(OrderingViolation),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// 检查 candidate 是否为 reference 的排列；违规按 重复 / 未知 / 缺失 / 数量 的顺序报告首个问题
pub fn check_permutation(reference: &[TrackId], candidate: &[TrackId]) -> Result<(), OrderingViolation> {
    let known: HashSet<&str> = reference.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(candidate.len());

    for id in candidate {
        if !known.contains(id.as_str()) {
            return Err(OrderingViolation::Unknown(id.clone()));
        }
        if !seen.insert(id.as_str()) {
            return Err(OrderingViolation::Duplicate(id.clone()));
        }
    }

    if let Some(missing) = reference.iter().find(|id| !seen.contains(id.as_str())) {
        return Err(OrderingViolation::Missing(missing.clone()));
    }

    // reference 自身含重复时 seen 会比 reference 短
    if candidate.len() != reference.len() {
        return Err(OrderingViolation::SizeMismatch {
            expected: reference.len(),
            actual: candidate.len(),
        });
    }

    Ok(())
}

/// 校验 oracle 返回的原始 id 序列（会先去掉首尾空白与引号）
pub fn validate_candidate(reference: &[TrackId], candidate: Vec<TrackId>) -> Validation {
    let cleaned: Vec<TrackId> = candidate
        .into_iter()
        .map(|id| id.trim().trim_matches(|c| c == '"' || c == '\'').trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();

    match check_permutation(reference, &cleaned) {
        Ok(()) => Validation::Valid(TrackOrder::new(cleaned)),
        Err(violation) => Validation::Invalid(violation),
    }
}

/// 修复候选顺序：丢弃未知 id 与重复项，缺失的按 reference 顺序补到末尾；结果总是合法排列
pub fn repair_order(reference: &[TrackId], candidate: &[TrackId]) -> TrackOrder {
    let known: HashSet<&str> = reference.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(reference.len());
    let mut repaired = Vec::with_capacity(reference.len());

    for id in candidate {
        if known.contains(id.as_str()) && seen.insert(id.as_str()) {
            repaired.push(id.clone());
        }
    }
    for id in reference {
        if seen.insert(id.as_str()) {
            repaired.push(id.clone());
        }
    }

    TrackOrder::new(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<TrackId> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_valid_permutation() {
        let reference = ids(&["a", "b", "c"]);
        assert_eq!(check_permutation(&reference, &ids(&["c", "a", "b"])), Ok(()));
    }

    #[test]
    fn test_violations() {
        let reference = ids(&["a", "b", "c"]);
        assert_eq!(
            check_permutation(&reference, &ids(&["a", "a", "c"])),
            Err(OrderingViolation::Duplicate("a".into()))
        );
        assert_eq!(
            check_permutation(&reference, &ids(&["a", "x", "c"])),
            Err(OrderingViolation::Unknown("x".into()))
        );
        assert_eq!(
            check_permutation(&reference, &ids(&["a", "c"])),
            Err(OrderingViolation::Missing("b".into()))
        );
    }

    #[test]
    fn test_reference_with_duplicates_reports_size() {
        let reference = ids(&["a", "a", "b"]);
        assert_eq!(
            check_permutation(&reference, &ids(&["a", "b"])),
            Err(OrderingViolation::SizeMismatch { expected: 3, actual: 2 })
        );
    }

    #[test]
    fn test_validate_candidate_cleans_quotes() {
        let reference = ids(&["a", "b"]);
        let result = validate_candidate(&reference, ids(&[" \"b\" ", "'a'"]));
        assert_eq!(result, Validation::Valid(TrackOrder::from(vec!["b", "a"])));
    }

    #[test]
    fn test_repair_order() {
        let reference = ids(&["a", "b", "c", "d"]);
        let repaired = repair_order(&reference, &ids(&["c", "x", "c", "a"]));
        assert_eq!(repaired, TrackOrder::from(vec!["c", "a", "b", "d"]));
    }
}
