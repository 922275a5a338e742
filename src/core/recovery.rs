//! 错误恢复引擎
//!
//! 根据 AgentError 类型与当前尝试次数返回 RecoveryAction，供回合编排器决定重试、放弃本回合还是终止。

use crate::core::{AgentError, ErrorKind, RecoveryAction};

/// 决策输出格式错误时追加的严格格式说明
pub const STRICT_FORMAT_INSTRUCTION: &str = "Your previous reply could not be parsed. \
Reply with EXACTLY three lines and nothing else:\n\
REASONING: <one paragraph>\n\
ACTION: <one of up, down, left, right, a, b, start, select, wait>\n\
GOAL_UPDATE: <none | PRIMARY: <text> | SECONDARY: <text> | TERTIARY: <text> | <SLOT>: clear>";

/// 语义化错误恢复：瞬时失败最多重试一次，校验失败与致命错误不重试
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    max_retries: u32,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self { max_retries: 1 }
    }

    /// attempt 为已失败的尝试次数（首次失败传 1）
    pub fn handle(&self, err: &AgentError, attempt: u32) -> RecoveryAction {
        match err.kind() {
            ErrorKind::Transient if attempt <= self.max_retries => match err {
                AgentError::MalformedDecision(_) => {
                    RecoveryAction::RetryWithPrompt(STRICT_FORMAT_INSTRUCTION.to_string())
                }
                // 动作执行超时不重放输入，避免重复按键
                AgentError::ActionTimeout(_) => RecoveryAction::FailTurn,
                _ => RecoveryAction::Retry,
            },
            ErrorKind::Transient | ErrorKind::Validation => RecoveryAction::FailTurn,
            ErrorKind::Fatal | ErrorKind::Cancelled => RecoveryAction::Abort,
        }
    }
}
