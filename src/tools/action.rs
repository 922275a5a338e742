//! 动作词表：决策协作者可选择的全部输入
//!
//! 方向键、A/B、Start/Select 与 wait（只推进时间，不按键）。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 固定动作词表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionToken {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    Start,
    Select,
    Wait,
}

impl ActionToken {
    pub const ALL: [ActionToken; 9] = [
        ActionToken::Up,
        ActionToken::Down,
        ActionToken::Left,
        ActionToken::Right,
        ActionToken::A,
        ActionToken::B,
        ActionToken::Start,
        ActionToken::Select,
        ActionToken::Wait,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionToken::Up => "up",
            ActionToken::Down => "down",
            ActionToken::Left => "left",
            ActionToken::Right => "right",
            ActionToken::A => "a",
            ActionToken::B => "b",
            ActionToken::Start => "start",
            ActionToken::Select => "select",
            ActionToken::Wait => "wait",
        }
    }

    /// 方向键的坐标位移 (dx, dy)，y 轴向下为正
    pub fn direction(&self) -> Option<(i32, i32)> {
        match self {
            ActionToken::Up => Some((0, -1)),
            ActionToken::Down => Some((0, 1)),
            ActionToken::Left => Some((-1, 0)),
            ActionToken::Right => Some((1, 0)),
            _ => None,
        }
    }

    /// 以逗号分隔的词表，用于拼 prompt
    pub fn vocabulary() -> String {
        Self::ALL
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ActionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionToken {
    type Err = AgentError;

    /// 忽略大小写与首尾空白；词表外的输入返回 InvalidAction
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| AgentError::InvalidAction(s.trim().to_string()))
    }
}
