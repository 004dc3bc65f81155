//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PLAYFLOW__*` 覆盖（双下划线表示嵌套，如 `PLAYFLOW__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::jobs::{EnrichSettings, RemoteSettings};
use crate::reorder::{OrdererSettings, RewriteCapability};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub reorder: ReorderSection,
    pub remote: RemoteSection,
    pub metadata: MetadataSection,
    pub jobs: JobsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择、超时与重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；没有 API Key 时一律退回 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmDeepSeekSection,
    #[serde(default)]
    pub openai: LlmOpenAiSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
    #[serde(default)]
    pub retry: LlmRetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmDeepSeekSection::default(),
            openai: LlmOpenAiSection::default(),
            timeouts: LlmTimeoutsSection::default(),
            retry: LlmRetrySection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [llm.retry] 段：只重试限流、超时、连接类错误
#[derive(Debug, Clone, Deserialize)]
pub struct LlmRetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

/// [reorder] 段：排序规模与并发
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReorderSection {
    /// 不超过该曲目数走单批排序
    pub small_playlist_threshold: usize,
    pub category_budget: usize,
    pub max_tracks_per_oracle_call: usize,
    /// 同时在途的 oracle 调用上限
    pub max_concurrent_oracle_calls: usize,
    pub oracle_timeout_secs: u64,
    pub category_timeout_secs: u64,
}

impl Default for ReorderSection {
    fn default() -> Self {
        Self {
            small_playlist_threshold: 40,
            category_budget: 5,
            max_tracks_per_oracle_call: 150,
            max_concurrent_oracle_calls: 3,
            oracle_timeout_secs: 60,
            category_timeout_secs: 120,
        }
    }
}

impl ReorderSection {
    pub fn orderer_settings(&self) -> OrdererSettings {
        OrdererSettings {
            small_playlist_threshold: self.small_playlist_threshold.max(1),
            category_budget: self.category_budget.max(1),
            max_tracks_per_oracle_call: self.max_tracks_per_oracle_call.max(1),
            oracle_timeout: Duration::from_secs(self.oracle_timeout_secs),
            category_timeout: Duration::from_secs(self.category_timeout_secs),
        }
    }
}

/// [remote] 段：远端歌单服务的调用约束
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    /// 一个任务最多发出的写调用数
    pub max_calls: usize,
    pub batch_limit: usize,
    pub supports_batch_replace: bool,
    pub call_timeout_secs: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            max_calls: 100,
            batch_limit: 100,
            supports_batch_replace: false,
            call_timeout_secs: 30,
        }
    }
}

impl RemoteSection {
    pub fn remote_settings(&self) -> RemoteSettings {
        RemoteSettings {
            max_calls: self.max_calls,
            capability: RewriteCapability {
                batch_limit: self.batch_limit.max(1),
                supports_batch_replace: self.supports_batch_replace,
            },
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }
}

/// [metadata] 段：排序前的元数据补全
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetadataSection {
    /// 是否用 LLM 推断叙事阶段 / 语气标签
    pub analyze_with_llm: bool,
    pub timeout_secs: u64,
    pub concurrency: usize,
}

impl Default for MetadataSection {
    fn default() -> Self {
        Self {
            analyze_with_llm: false,
            timeout_secs: 20,
            concurrency: 4,
        }
    }
}

impl MetadataSection {
    pub fn enrich_settings(&self) -> EnrichSettings {
        EnrichSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            concurrency: self.concurrency.max(1),
        }
    }
}

/// 任务存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStoreKind {
    #[default]
    Memory,
    File,
    Sqlite,
}

/// [jobs] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsSection {
    pub store: JobStoreKind,
    /// file：目录；sqlite：数据库文件
    pub path: PathBuf,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            store: JobStoreKind::Memory,
            path: PathBuf::from("data/jobs"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 PLAYFLOW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PLAYFLOW__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PLAYFLOW")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.provider, "deepseek");
        assert_eq!(cfg.llm.retry.max_retries, 2);
        assert_eq!(cfg.reorder.orderer_settings(), OrdererSettings::default());
        assert_eq!(cfg.remote.remote_settings(), RemoteSettings::default());
        assert_eq!(cfg.metadata.enrich_settings(), EnrichSettings::default());
        assert_eq!(cfg.jobs.store, JobStoreKind::Memory);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[reorder]
category_budget = 4
small_playlist_threshold = 10

[remote]
max_calls = 12
supports_batch_replace = true

[jobs]
store = "file"
path = "/tmp/playflow-jobs"
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.reorder.category_budget, 4);
        assert_eq!(cfg.reorder.small_playlist_threshold, 10);
        assert_eq!(cfg.reorder.max_tracks_per_oracle_call, 150);
        let remote = cfg.remote.remote_settings();
        assert_eq!(remote.max_calls, 12);
        assert_eq!(remote.capability.rewrite_calls(500), 1);
        assert_eq!(cfg.jobs.store, JobStoreKind::File);
    }
}
