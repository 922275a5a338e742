//! 决策输出解析
//!
//! 期望格式（每个字段一行，REASONING 可续行）：
//! ```text
//! REASONING: ...
//! ACTION: up
//! GOAL_UPDATE: none | PRIMARY: <text> | SECONDARY: clear
//! ```
//! 解析严格：缺字段、重复字段、词表外动作、无法识别的多余文本都判为 Malformed，不做部分采信。

use std::sync::OnceLock;

use regex::Regex;

use crate::memory::GoalDirective;
use crate::tools::ActionToken;

/// 解析成功的决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: ActionToken,
    pub rationale: String,
    pub goal_directive: Option<GoalDirective>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    Ok(Decision),
    /// 原始文本，便于日志排查
    Malformed(String),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Reasoning,
    Action,
    GoalUpdate,
}

fn field_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:\*\*)?(REASONING|ACTION|GOAL_UPDATE)(?:\*\*)?\s*:(?:\*\*)?\s*(.*)$")
            .expect("valid field regex")
    })
}

/// 严格解析一次决策输出
pub fn parse_decision(raw: &str) -> DecisionOutcome {
    match parse_fields(raw) {
        Some(d) => DecisionOutcome::Ok(d),
        None => DecisionOutcome::Malformed(raw.to_string()),
    }
}

fn parse_fields(raw: &str) -> Option<Decision> {
    let mut reasoning: Option<String> = None;
    let mut action: Option<String> = None;
    let mut goal_update: Option<String> = None;
    let mut current: Option<Field> = None;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("```") {
            continue;
        }
        if let Some(caps) = field_line().captures(line) {
            let value = caps[2].trim().to_string();
            let (slot, field) = match &caps[1] {
                "REASONING" => (&mut reasoning, Field::Reasoning),
                "ACTION" => (&mut action, Field::Action),
                _ => (&mut goal_update, Field::GoalUpdate),
            };
            if slot.is_some() {
                return None;
            }
            *slot = Some(value);
            current = Some(field);
            continue;
        }
        // 只有推理允许多行
        match (current, reasoning.as_mut()) {
            (Some(Field::Reasoning), Some(r)) => {
                if !r.is_empty() {
                    r.push(' ');
                }
                r.push_str(trimmed);
            }
            _ => return None,
        }
    }

    let rationale = reasoning?;
    let action = parse_action(&action?)?;
    let goal_directive = match goal_update {
        Some(text) => parse_goal_update(&text)?,
        None => None,
    };
    Some(Decision {
        action,
        rationale,
        goal_directive,
    })
}

fn parse_action(value: &str) -> Option<ActionToken> {
    let token = value
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '*' | '.'));
    if token.contains(char::is_whitespace) {
        return None;
    }
    token.parse().ok()
}

/// 外层 Option 表示是否合法，内层表示是否有指令
fn parse_goal_update(value: &str) -> Option<Option<GoalDirective>> {
    let value = value.trim().trim_matches('"');
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return Some(None);
    }
    let (slot, text) = value.split_once(':')?;
    let slot = slot.trim();
    let text = text.trim();
    if slot.is_empty() || slot.contains(char::is_whitespace) {
        return None;
    }
    let slot = slot.to_lowercase();
    if text.eq_ignore_ascii_case("clear") || text.eq_ignore_ascii_case("none") {
        return Some(Some(GoalDirective::clear(slot)));
    }
    if text.is_empty() {
        return None;
    }
    Some(Some(GoalDirective::set(slot, text)))
}
