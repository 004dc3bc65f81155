//! Playflow - 歌单流向重排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 统一错误、恢复决策、oracle 并发与歌单互斥
//! - **jobs**: 重排任务状态机、持久化、流水线与管理
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **metadata**: 曲目元数据补全
//! - **observability**: 日志初始化
//! - **oracle**: 排序 / 分类 oracle（不可信输出，必须校验）
//! - **playlist**: 远端歌单客户端抽象与内存实现
//! - **reorder**: 校验、移动编译、成本估算、兜底排序、单批与分层排序

pub mod config;
pub mod core;
pub mod jobs;
pub mod llm;
pub mod metadata;
pub mod observability;
pub mod oracle;
pub mod playlist;
pub mod reorder;

pub use crate::core::ReorderError;
pub use jobs::{JobManager, JobState, JobStatus};
pub use reorder::{compile_moves, ReorderMethod, ReorderStyle, StyleSpec, Track, TrackOrder};
