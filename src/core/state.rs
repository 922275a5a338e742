//! 会话快照：编排器每步之后发布的不可变投影
//!
//! 观察者只拿到 SessionSnapshot 的拷贝（通过 watch 通道），从不接触实时的记忆结构。

use serde::Serialize;

use crate::decision::DecisionRole;
use crate::memory::{Coord, GoalSlots, ProgressCounters};
use crate::tools::ActionToken;

/// 回合协议所处阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Observing,
    Compacting,
    Deciding,
    Executing,
    Committing,
    Checkpointing,
    Stopped,
    Error,
}

/// 观察者看到的会话状态
#[derive(Clone, Debug, Default, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    /// 下一个要执行的回合序号
    pub next_turn: u64,
    pub role: DecisionRole,
    pub location: Option<String>,
    pub coordinate: Option<Coord>,
    pub goals: GoalSlots,
    pub last_action: Option<ActionToken>,
    pub summaries: usize,
    pub recent_turns: usize,
    pub locations_explored: usize,
    pub progress: ProgressCounters,
    pub error_message: Option<String>,
}

impl SessionSnapshot {
    /// 一行状态，用于监控日志
    pub fn status_line(&self) -> String {
        let position = match (&self.location, &self.coordinate) {
            (Some(l), Some(c)) => format!("{} {}", l, c),
            _ => "unknown".to_string(),
        };
        format!(
            "[{:?}] turn {} | {} | role {} | done {} failed {} stuck {}",
            self.phase,
            self.next_turn,
            position,
            self.role,
            self.progress.turns_completed,
            self.progress.failed_turns,
            self.progress.stuck_events,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        let snap = SessionSnapshot {
            phase: SessionPhase::Deciding,
            next_turn: 12,
            location: Some("pallet_town".to_string()),
            coordinate: Some(Coord::new(5, 8)),
            ..Default::default()
        };
        let line = snap.status_line();
        assert!(line.starts_with("[Deciding] turn 12 | pallet_town (5, 8)"));
        assert!(line.contains("role main"));
    }
}
