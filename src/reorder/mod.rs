//! 重排决策引擎
//!
//! - **model**: Track / TrackOrder / MoveOperation / 风格与策略
//! - **validate**: 排列校验（oracle 输出进入流程前的关口）
//! - **compiler**: 顺序 -> 区间移动序列
//! - **cost**: 逐条移动 vs 整体替换
//! - **heuristic**: 确定性兜底排序
//! - **single_batch** / **hierarchical**: 小歌单单批、大歌单分层

pub mod compiler;
pub mod cost;
pub mod heuristic;
pub mod hierarchical;
pub mod model;
pub mod single_batch;
pub mod validate;

pub use compiler::{apply_move, apply_moves, compile_moves, InvalidMove};
pub use cost::{choose_strategy, plan_strategy, positional_similarity, RewriteCapability, StrategyPlan};
pub use heuristic::heuristic_order;
pub use hierarchical::{
    build_partition, HierarchyPhase, OrderMode, OrderProgress, OrderReport, OrdererSettings,
    PlaylistOrderer, ProgressFn, DEFAULT_CATEGORY, FLAT_CATEGORY,
};
pub use model::{
    MoveOperation, ReorderMethod, ReorderStyle, Strategy, StyleSpec, Track, TrackId, TrackMetadata,
    TrackOrder,
};
pub use single_batch::{order_section, order_single_batch, BatchOutcome, OrderSource};
pub use validate::{check_permutation, repair_order, validate_candidate, OrderingViolation, Validation};
