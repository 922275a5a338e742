//! 回合过程事件：供实时观察者（日志面板、测试）订阅

use serde::Serialize;

use crate::decision::DecisionRole;
use crate::memory::CheckpointReason;
use crate::tools::ActionToken;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    TurnStarted { turn: u64 },
    /// 状态观测结果
    Observed {
        location: String,
        coordinate: String,
        new_cell: bool,
    },
    Compacted { first: u64, last: u64 },
    /// 压缩失败，原始记录保留
    CompactionDeferred { reason: String },
    /// 决策失败后的恢复动作
    Recovery { action: String, detail: String },
    Decided {
        role: DecisionRole,
        action: ActionToken,
        rationale: String,
    },
    ActionExecuted { action: ActionToken, frame: u64 },
    /// 卡住：下一回合交给 escalate_to
    Stuck {
        action: ActionToken,
        escalate_to: DecisionRole,
    },
    GoalUpdated { slot: String, text: Option<String> },
    GoalRejected { reason: String },
    NewLocation { location: String },
    TurnCommitted { turn: u64 },
    TurnFailed { turn: u64, reason: String },
    CheckpointWritten { turn: u64, reason: CheckpointReason },
    SessionEnded { turns_completed: u64, reason: String },
}
