//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PLAYBEE__*` 覆盖（双下划线表示嵌套，如 `PLAYBEE__MEMORY__KEEP_RECENT_TURNS=10`）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::AgentError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub memory: MemorySection,
    pub exploration: ExplorationSection,
    pub actions: ActionsSection,
    pub goals: GoalsSection,
    pub progress: ProgressSection,
}

/// [app] 段：名称、数据目录、回合上限、是否从检查点恢复
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 检查点等运行数据的根目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// 本次运行最多尝试的回合数；未设置则一直运行到关闭
    pub max_turns: Option<u64>,
    #[serde(default = "default_true")]
    pub resume: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: default_data_dir(),
            max_turns: None,
            resume: true,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_true() -> bool {
    true
}

/// [llm] 段：后端选择、超时与按角色覆盖模型
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点）/ deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
    /// 角色名 -> 模型名，如 `critique = "gpt-4o"`
    #[serde(default)]
    pub roles: HashMap<String, String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: None,
            timeouts: LlmTimeoutsSection::default(),
            roles: HashMap::new(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 决策与压缩调用的超时（秒）
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

/// [memory] 段：压缩阈值与渲染上限
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,
    #[serde(default = "default_keep_recent_turns")]
    pub keep_recent_turns: usize,
    /// 交给决策协作者的上下文文本最大字符数
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_context_turns: default_max_context_turns(),
            keep_recent_turns: default_keep_recent_turns(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_max_context_turns() -> usize {
    100
}

fn default_keep_recent_turns() -> usize {
    20
}

fn default_max_context_chars() -> usize {
    24_000
}

/// [exploration] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ExplorationSection {
    #[serde(default = "default_frontier_radius")]
    pub frontier_radius: u32,
    /// 状态文本里最多列出的前沿格子数
    #[serde(default = "default_frontier_preview")]
    pub frontier_preview: usize,
}

impl Default for ExplorationSection {
    fn default() -> Self {
        Self {
            frontier_radius: default_frontier_radius(),
            frontier_preview: default_frontier_preview(),
        }
    }
}

fn default_frontier_radius() -> u32 {
    5
}

fn default_frontier_preview() -> usize {
    10
}

/// [actions] 段：卡住阈值、执行超时、每个输入推进的帧数
#[derive(Debug, Clone, Deserialize)]
pub struct ActionsSection {
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold: usize,
    #[serde(default = "default_action_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_frames_per_action")]
    pub frames_per_action: u32,
    #[serde(default = "default_wait_frames")]
    pub wait_frames: u32,
}

impl Default for ActionsSection {
    fn default() -> Self {
        Self {
            stuck_threshold: default_stuck_threshold(),
            timeout_ms: default_action_timeout_ms(),
            frames_per_action: default_frames_per_action(),
            wait_frames: default_wait_frames(),
        }
    }
}

fn default_stuck_threshold() -> usize {
    10
}

fn default_action_timeout_ms() -> u64 {
    5_000
}

fn default_frames_per_action() -> u32 {
    10
}

fn default_wait_frames() -> u32 {
    30
}

/// [goals] 段：初始主目标
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GoalsSection {
    pub primary_goal: Option<String>,
}

/// [progress] 段：检查点间隔、保留份数、连续失败上限
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressSection {
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    #[serde(default = "default_keep_checkpoints")]
    pub keep_checkpoints: usize,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self {
            checkpoint_interval: default_checkpoint_interval(),
            keep_checkpoints: default_keep_checkpoints(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

fn default_checkpoint_interval() -> u64 {
    100
}

fn default_keep_checkpoints() -> usize {
    5
}

fn default_max_consecutive_failures() -> u32 {
    5
}

impl AppConfig {
    /// 启动前校验；不合法的组合返回 ConfigError
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.memory.max_context_turns == 0 {
            return Err(AgentError::ConfigError(
                "memory.max_context_turns must be greater than 0".to_string(),
            ));
        }
        if self.memory.keep_recent_turns >= self.memory.max_context_turns {
            return Err(AgentError::ConfigError(format!(
                "memory.keep_recent_turns ({}) must be smaller than memory.max_context_turns ({})",
                self.memory.keep_recent_turns, self.memory.max_context_turns
            )));
        }
        if self.actions.stuck_threshold == 0 {
            return Err(AgentError::ConfigError(
                "actions.stuck_threshold must be greater than 0".to_string(),
            ));
        }
        if self.progress.checkpoint_interval == 0 {
            return Err(AgentError::ConfigError(
                "progress.checkpoint_interval must be greater than 0".to_string(),
            ));
        }
        for role in self.llm.roles.keys() {
            if !crate::decision::DecisionRole::ALL
                .iter()
                .any(|r| r.as_str() == role.as_str())
            {
                return Err(AgentError::ConfigError(format!(
                    "llm.roles: unknown role '{}'",
                    role
                )));
            }
        }
        Ok(())
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeouts.request)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.actions.timeout_ms)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.app.data_dir.join("checkpoints")
    }
}

/// 从 config 目录加载配置，环境变量 PLAYBEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PLAYBEE__*（双下划线表示嵌套键）
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
        } else {
            tracing::warn!("Config file {} not found, ignoring", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PLAYBEE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.memory.max_context_turns, 100);
        assert_eq!(cfg.memory.keep_recent_turns, 20);
        assert_eq!(cfg.actions.stuck_threshold, 10);
        assert_eq!(cfg.progress.checkpoint_interval, 100);
        assert_eq!(cfg.exploration.frontier_radius, 5);
        assert!(cfg.app.resume);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tail_at_threshold() {
        let mut cfg = AppConfig::default();
        cfg.memory.keep_recent_turns = 100;
        assert!(matches!(cfg.validate(), Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_zero_values_and_unknown_roles() {
        let mut cfg = AppConfig::default();
        cfg.progress.checkpoint_interval = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.actions.stuck_threshold = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.llm.roles.insert("navigation".into(), "gpt-4o".into());
        assert!(cfg.validate().is_ok());
        cfg.llm.roles.insert("speedrunner".into(), "gpt-4o".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(
            &path,
            "[memory]\nmax_context_turns = 40\nkeep_recent_turns = 8\n\n[goals]\nprimary_goal = \"Reach Viridian City\"\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.memory.max_context_turns, 40);
        assert_eq!(cfg.memory.keep_recent_turns, 8);
        assert_eq!(cfg.goals.primary_goal.as_deref(), Some("Reach Viridian City"));
    }
}
