//! 成本估算：在「逐条移动」与「整体替换」之间按远端调用次数选择
//!
//! 逐条移动的成本 = 编译出的移动条数；整体替换的成本与曲目数无关（支持批量替换时为 1），
//! 否则为 ceil(N / batch_limit)。

use serde::{Deserialize, Serialize};

use super::compiler::compile_moves;
use super::model::{MoveOperation, ReorderMethod, Strategy, TrackId};
use crate::core::ReorderError;

/// 远端整体替换能力（外部能力标记）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteCapability {
    /// 单次写入最多携带的曲目数
    pub batch_limit: usize,
    /// 是否支持一次替换全部曲目
    pub supports_batch_replace: bool,
}

impl Default for RewriteCapability {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            supports_batch_replace: false,
        }
    }
}

impl RewriteCapability {
    /// 整体替换所需调用次数
    pub fn rewrite_calls(&self, track_count: usize) -> usize {
        if track_count == 0 {
            return 0;
        }
        if self.supports_batch_replace {
            return 1;
        }
        track_count.div_ceil(self.batch_limit.max(1))
    }
}

/// 选择结果与依据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPlan {
    pub strategy: Strategy,
    /// 仅 Targeted 时非空
    pub moves: Vec<MoveOperation>,
    pub targeted_calls: usize,
    pub rewrite_calls: usize,
    /// 位置相似度 0.0 ~ 1.0
    pub similarity: f64,
    pub reason: String,
}

/// 纯策略选择：Targeted 需不多于整体替换且不超预算；否则 FullRewrite；都超预算则报错
pub fn choose_strategy(
    current: &[TrackId],
    desired: &[TrackId],
    max_calls: usize,
    capability: RewriteCapability,
) -> Result<Strategy, ReorderError> {
    plan_strategy(current, desired, max_calls, capability, ReorderMethod::Auto).map(|p| p.strategy)
}

/// 带方式约束的完整规划（Auto 走成本比较，其余按调用方指定但仍受预算约束）
pub fn plan_strategy(
    current: &[TrackId],
    desired: &[TrackId],
    max_calls: usize,
    capability: RewriteCapability,
    method: ReorderMethod,
) -> Result<StrategyPlan, ReorderError> {
    let moves = compile_moves(current, desired)?;
    let targeted_calls = moves.len();
    let rewrite_calls = capability.rewrite_calls(current.len());
    let similarity = positional_similarity(current, desired);

    let budget_exceeded = || ReorderError::BudgetExceeded {
        targeted: targeted_calls,
        rewrite: rewrite_calls,
        max_calls,
    };

    let (strategy, reason) = match method {
        ReorderMethod::Auto => {
            if targeted_calls <= rewrite_calls && targeted_calls <= max_calls {
                (
                    Strategy::Targeted,
                    format!("{targeted_calls} move(s) vs {rewrite_calls} rewrite call(s)"),
                )
            } else if rewrite_calls <= max_calls {
                (
                    Strategy::FullRewrite,
                    format!(
                        "{targeted_calls} move(s) needed, full rewrite takes {rewrite_calls} call(s)"
                    ),
                )
            } else {
                return Err(budget_exceeded());
            }
        }
        ReorderMethod::Targeted => {
            if targeted_calls > max_calls {
                return Err(budget_exceeded());
            }
            (Strategy::Targeted, "targeted moves requested".to_string())
        }
        ReorderMethod::FullRewrite => {
            if rewrite_calls > max_calls {
                return Err(budget_exceeded());
            }
            (Strategy::FullRewrite, "full rewrite requested".to_string())
        }
    };

    Ok(StrategyPlan {
        strategy,
        moves: if strategy == Strategy::Targeted {
            moves
        } else {
            Vec::new()
        },
        targeted_calls,
        rewrite_calls,
        similarity,
        reason,
    })
}

/// 位置相似度：每首曲目按新旧位置距离打分后取平均；完全相同为 1.0
pub fn positional_similarity(current: &[TrackId], desired: &[TrackId]) -> f64 {
    if current.len() != desired.len() {
        return 0.0;
    }
    if current.len() <= 1 {
        return 1.0;
    }

    let max_diff = (current.len() - 1) as f64;
    let new_pos: std::collections::HashMap<&str, usize> = desired
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let total: f64 = current
        .iter()
        .enumerate()
        .filter_map(|(i, id)| new_pos.get(id.as_str()).map(|&j| (i, j)))
        .map(|(i, j)| 1.0 - (i.abs_diff(j) as f64 / max_diff))
        .sum();

    total / current.len() as f64
}
