//! 排序 oracle：由语言模型给出候选顺序或分类
//!
//! oracle 的输出一律视为不可信输入：可能格式错误、缺曲目、重复或编造 id。
//! 这里只负责调用与解析，校验与兜底在 reorder 的各排序器里完成。

pub mod llm_oracle;
pub mod parse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;
use crate::reorder::{StyleSpec, Track, TrackId};

pub use llm_oracle::LlmOracle;

/// oracle 调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("oracle timed out")]
    Timeout,

    #[error("malformed oracle response: {0}")]
    Malformed(String),
}

impl From<LlmError> for OracleError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout => Self::Timeout,
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// 一个分类：名称 + 曲目 id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub label: String,
    pub track_ids: Vec<TrackId>,
}

impl Category {
    pub fn new(label: impl Into<String>, track_ids: Vec<TrackId>) -> Self {
        Self {
            label: label.into(),
            track_ids,
        }
    }
}

/// 分类结果（按 oracle 给出的先后保留顺序；未经校验，可能缺漏或重复）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryAssignment {
    pub categories: Vec<Category>,
}

impl CategoryAssignment {
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// 排序 oracle
#[async_trait]
pub trait Oracle: Send + Sync {
    /// 为整批曲目给出候选顺序；`section` 为所在分类名（分层排序的第二阶段）
    async fn order(
        &self,
        tracks: &[Track],
        style: &StyleSpec,
        section: Option<&str>,
    ) -> Result<Vec<TrackId>, OracleError>;

    /// 把曲目分进至多 `max_categories` 个分类
    async fn categorize(
        &self,
        tracks: &[Track],
        style: &StyleSpec,
        max_categories: usize,
    ) -> Result<CategoryAssignment, OracleError>;
}
