//! 目标层级：主要 / 次要 / 第三目标
//!
//! 三个槽位只通过决策给出的更新指令修改，编排器不会隐式改动；每次修改原子生效并追加到历史日志。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 未设置目标时渲染的占位文本
pub const UNSET: &str = "Not set";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalSlot {
    Primary,
    Secondary,
    Tertiary,
}

impl GoalSlot {
    pub const ALL: [GoalSlot; 3] = [GoalSlot::Primary, GoalSlot::Secondary, GoalSlot::Tertiary];

    pub fn as_str(&self) -> &'static str {
        match self {
            GoalSlot::Primary => "primary",
            GoalSlot::Secondary => "secondary",
            GoalSlot::Tertiary => "tertiary",
        }
    }
}

impl fmt::Display for GoalSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GoalSlot {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary" => Ok(GoalSlot::Primary),
            "secondary" => Ok(GoalSlot::Secondary),
            "tertiary" => Ok(GoalSlot::Tertiary),
            _ => Err(AgentError::InvalidGoalSlot(s.trim().to_string())),
        }
    }
}

/// 更新指令中的新值：设置文本或清空
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "text", rename_all = "lowercase")]
pub enum GoalValue {
    Set(String),
    Clear,
}

/// 决策给出的目标更新指令；slot 保留原始文本，由 GoalSet::apply_update 校验
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalDirective {
    pub slot: String,
    pub new_value: GoalValue,
}

impl GoalDirective {
    pub fn set(slot: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            new_value: GoalValue::Set(text.into()),
        }
    }

    pub fn clear(slot: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            new_value: GoalValue::Clear,
        }
    }
}

impl fmt::Display for GoalDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.new_value {
            GoalValue::Set(text) => write!(f, "{}: {}", self.slot.to_uppercase(), text),
            GoalValue::Clear => write!(f, "{}: clear", self.slot.to_uppercase()),
        }
    }
}

/// 当前三个槽位的只读视图（未设置为 None，键永远存在）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalSlots {
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub tertiary: Option<String>,
}

impl GoalSlots {
    pub fn get(&self, slot: GoalSlot) -> Option<&str> {
        match slot {
            GoalSlot::Primary => self.primary.as_deref(),
            GoalSlot::Secondary => self.secondary.as_deref(),
            GoalSlot::Tertiary => self.tertiary.as_deref(),
        }
    }

    fn slot_mut(&mut self, slot: GoalSlot) -> &mut Option<String> {
        match slot {
            GoalSlot::Primary => &mut self.primary,
            GoalSlot::Secondary => &mut self.secondary,
            GoalSlot::Tertiary => &mut self.tertiary,
        }
    }
}

/// 目标历史日志中的一条记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalChange {
    pub slot: GoalSlot,
    pub previous: Option<String>,
    pub current: Option<String>,
    pub at: DateTime<Utc>,
}

/// 目标集合；序列化为 `{primary, secondary, tertiary, history: [...]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalSet {
    #[serde(flatten)]
    slots: GoalSlots,
    #[serde(default)]
    history: Vec<GoalChange>,
}

impl GoalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> GoalSlots {
        self.slots.clone()
    }

    pub fn history(&self) -> &[GoalChange] {
        &self.history
    }

    /// 校验并应用一条指令；未知槽位或空文本直接拒绝，不做任何修改
    pub fn apply_update(&mut self, directive: &GoalDirective) -> Result<GoalChange, AgentError> {
        let slot: GoalSlot = directive.slot.parse()?;
        let current = match &directive.new_value {
            GoalValue::Set(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(AgentError::InvalidGoalValue(format!(
                        "{}: empty goal text",
                        slot
                    )));
                }
                Some(text.to_string())
            }
            GoalValue::Clear => None,
        };

        let previous = std::mem::replace(self.slots.slot_mut(slot), current.clone());
        let change = GoalChange {
            slot,
            previous,
            current,
            at: Utc::now(),
        };
        match (slot, &change.current) {
            (GoalSlot::Primary, Some(text)) => tracing::info!(slot = %slot, "NEW PRIMARY GOAL: {}", text),
            (_, Some(text)) => tracing::info!(slot = %slot, "new goal: {}", text),
            (_, None) => tracing::info!(slot = %slot, "goal cleared"),
        }
        self.history.push(change.clone());
        Ok(change)
    }

    /// 供决策 prompt 使用的目标段落
    pub fn render(&self) -> String {
        let mut text = String::from("=== CURRENT GOALS ===\n");
        for slot in GoalSlot::ALL {
            text.push_str(&format!(
                "{}: {}\n",
                slot.as_str().to_uppercase(),
                self.slots.get(slot).unwrap_or(UNSET)
            ));
        }
        let finished: Vec<&str> = self
            .history
            .iter()
            .filter_map(|c| c.previous.as_deref())
            .collect();
        if !finished.is_empty() {
            text.push_str(&format!("\nCOMPLETED GOALS: {}\n", finished.len()));
            for goal in finished.iter().skip(finished.len().saturating_sub(3)) {
                text.push_str(&format!("  - {}\n", goal));
            }
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_always_has_three_slots() {
        let goals = GoalSet::new();
        let json = serde_json::to_value(goals.current()).unwrap();
        for key in ["primary", "secondary", "tertiary"] {
            assert!(json.get(key).is_some(), "missing {}", key);
            assert!(json[key].is_null());
        }
    }

    #[test]
    fn test_apply_set_and_clear() {
        let mut goals = GoalSet::new();
        goals
            .apply_update(&GoalDirective::set("primary", "Get the first badge"))
            .unwrap();
        goals
            .apply_update(&GoalDirective::set("Tertiary", "Catch a Pidgey"))
            .unwrap();
        assert_eq!(goals.current().get(GoalSlot::Primary), Some("Get the first badge"));
        assert_eq!(goals.current().get(GoalSlot::Tertiary), Some("Catch a Pidgey"));

        let change = goals.apply_update(&GoalDirective::clear("tertiary")).unwrap();
        assert_eq!(change.previous.as_deref(), Some("Catch a Pidgey"));
        assert_eq!(goals.current().tertiary, None);
        assert_eq!(goals.history().len(), 3);
    }

    #[test]
    fn test_invalid_slot_leaves_set_unchanged() {
        let mut goals = GoalSet::new();
        goals
            .apply_update(&GoalDirective::set("primary", "Beat Brock"))
            .unwrap();
        let before = serde_json::to_vec(&goals).unwrap();

        let err = goals
            .apply_update(&GoalDirective::set("quaternary", "Nap"))
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidGoalSlot(_)));

        let after = serde_json::to_vec(&goals).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_empty_text_rejected() {
        let mut goals = GoalSet::new();
        assert!(matches!(
            goals.apply_update(&GoalDirective::set("secondary", "  ")),
            Err(AgentError::InvalidGoalValue(_))
        ));
        assert!(goals.history().is_empty());
        assert_eq!(goals.current().secondary, None);
    }

    #[test]
    fn test_render_marks_unset_and_completed() {
        let mut goals = GoalSet::new();
        goals.apply_update(&GoalDirective::set("primary", "Leave home")).unwrap();
        goals.apply_update(&GoalDirective::set("primary", "Visit the lab")).unwrap();
        let text = goals.render();
        assert!(text.contains("PRIMARY: Visit the lab"));
        assert!(text.contains("SECONDARY: Not set"));
        assert!(text.contains("COMPLETED GOALS: 1"));
        assert!(text.contains("- Leave home"));
    }

    #[test]
    fn test_persisted_layout() {
        let mut goals = GoalSet::new();
        goals.apply_update(&GoalDirective::set("secondary", "Buy potions")).unwrap();
        let json = serde_json::to_value(&goals).unwrap();
        assert_eq!(json["secondary"], "Buy potions");
        assert!(json["primary"].is_null());
        assert_eq!(json["history"].as_array().unwrap().len(), 1);
        let back: GoalSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, goals);
    }
}
