//! Agent 错误类型、错误分类与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 与已尝试次数决定 RetryWithPrompt / Retry / FailTurn / Abort。

use thiserror::Error;

/// 回合运行过程中可能出现的错误（决策、压缩、校验、模拟器、检查点等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 超时上限（毫秒）
    #[error("Decision timeout after {0}ms")]
    DecisionTimeout(u64),

    /// 决策协作者返回了无法严格解析的文本（保留原文便于排查）
    #[error("Malformed decision: {0}")]
    MalformedDecision(String),

    #[error("Compaction failed: {0}")]
    CompactionFailed(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Invalid goal slot: {0}")]
    InvalidGoalSlot(String),

    /// 槽位合法但目标文本不可用（如空文本）
    #[error("Invalid goal value: {0}")]
    InvalidGoalValue(String),

    #[error("Action timeout: {0}")]
    ActionTimeout(String),

    #[error("Emulator error: {0}")]
    Emulator(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Cancelled")]
    Cancelled,

    /// 连续失败回合数超过上限，升级为致命错误
    #[error("Too many consecutive failed turns: {0}")]
    TooManyFailures(u32),
}

/// 错误分类：决定回合失败后会话是继续、拒绝输入还是终止
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 协作者瞬时失败（超时、格式错误）：重试一次后本回合失败，会话继续
    Transient,
    /// 边界校验失败（未知目标槽、词表外动作）：拒绝且不做部分修改
    Validation,
    /// 模拟器或检查点存储不可用：最后尝试一次检查点后向上传播
    Fatal,
    Cancelled,
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::DecisionTimeout(_)
            | AgentError::MalformedDecision(_)
            | AgentError::CompactionFailed(_)
            | AgentError::LlmError(_)
            | AgentError::ActionTimeout(_) => ErrorKind::Transient,
            AgentError::InvalidAction(_)
            | AgentError::InvalidGoalSlot(_)
            | AgentError::InvalidGoalValue(_) => ErrorKind::Validation,
            AgentError::Emulator(_)
            | AgentError::Checkpoint(_)
            | AgentError::ConfigError(_)
            | AgentError::TooManyFailures(_) => ErrorKind::Fatal,
            AgentError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 以更严格的格式要求重新请求一次决策（如输出格式错误）
    RetryWithPrompt(String),
    /// 原样重试一次（如超时、网络错误）
    Retry,
    /// 放弃本回合，会话继续下一回合
    FailTurn,
    /// 终止会话
    Abort,
}
