//! 各决策角色的 system prompt 与用户消息拼装
//!
//! 内置默认 prompt；存在 config/prompts/<role>.txt 时以文件内容替换。

use crate::decision::{DecisionRequest, DecisionRole};
use crate::tools::ActionToken;

const RESPONSE_FORMAT: &str = "Your response must use exactly this format:\n\
REASONING: <your analysis of the situation and decision-making process>\n\
ACTION: <single action to take>\n\
GOAL_UPDATE: <none, or SLOT: new goal text, or SLOT: clear (SLOT is PRIMARY, SECONDARY or TERTIARY)>\n\n\
Example response:\n\
REASONING: I'm in Pallet Town and need to reach Professor Oak's lab. The lab is north of my current position.\n\
ACTION: up\n\
GOAL_UPDATE: none";

const MAIN_PROMPT: &str = "You are an AI agent playing a turn-based adventure game on an emulator. \
Each turn you choose exactly one button press.\n\n\
You receive the previous activity summary, recent turns, your current goals (primary, secondary, tertiary) \
and the current game state including map exploration status.\n\n\
Guidelines:\n\
1. Work towards your PRIMARY goal, use SECONDARY to enable it, TERTIARY for opportunistic actions\n\
2. Explore systematically - prioritize unexplored cells from the frontier\n\
3. Avoid getting stuck - if repeating actions without progress, try a different approach\n\
4. Talk to characters (press a) for information and items";

const NAVIGATION_PROMPT: &str = "You are a pathfinding specialist. The main agent has been pressing the same \
button without making progress.\n\n\
Your task:\n\
1. Use the current position, the known exits and the unexplored frontier to pick a route\n\
2. Avoid the direction that was just repeated unless the state clearly changed\n\
3. Choose the single next move along that route";

const PUZZLE_PROMPT: &str = "You are a puzzle-solving specialist. The agent keeps getting stuck, which often \
means a puzzle, an obstacle or an open menu blocks the way.\n\n\
Given the state:\n\
- Analyze what is blocking progress (menus, dialogue, boulders, switches, mazes)\n\
- Identify the goal of the obstacle\n\
- Choose the single next input that moves towards solving it";

const CRITIQUE_PROMPT: &str = "You are a strategy critic. Review the recent action history, point out why the \
agent is stuck and what it missed, then choose a concrete corrective action yourself.\n\n\
Put your assessment, the issues you found and your suggestion in REASONING.";

/// 角色的内置 prompt（不含输出格式）
fn builtin_prompt(role: DecisionRole) -> &'static str {
    match role {
        DecisionRole::Main => MAIN_PROMPT,
        DecisionRole::Navigation => NAVIGATION_PROMPT,
        DecisionRole::PuzzleSolving => PUZZLE_PROMPT,
        DecisionRole::Critique => CRITIQUE_PROMPT,
    }
}

/// 读取 system prompt：配置文件优先，其次内置；输出格式说明总是追加
pub fn system_prompt(role: DecisionRole) -> String {
    let file = format!("{}.txt", role.as_str());
    let body = [
        format!("config/prompts/{}", file),
        format!("../config/prompts/{}", file),
    ]
    .into_iter()
    .find_map(|p| std::fs::read_to_string(p).ok())
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty())
    .unwrap_or_else(|| builtin_prompt(role).to_string());
    format!(
        "{}\n\nAvailable actions: {}.\n\n{}",
        body,
        ActionToken::vocabulary(),
        RESPONSE_FORMAT
    )
}

/// 拼装一次决策的用户消息：上下文 + 目标 + 状态（+ 卡住时的最近动作，+ 格式纠正）
pub fn user_prompt(request: &DecisionRequest) -> String {
    let mut prompt = String::new();
    if !request.context.trim().is_empty() {
        prompt.push_str(request.context.trim_end());
        prompt.push_str("\n\n");
    }
    prompt.push_str(request.goals.trim_end());
    prompt.push_str("\n\n=== CURRENT STATE ===\n");
    prompt.push_str(request.state.trim_end());
    prompt.push('\n');

    if !request.recent_actions.is_empty() {
        let actions: Vec<&str> = request.recent_actions.iter().map(|a| a.as_str()).collect();
        prompt.push_str(&format!("\nRecent actions (oldest first): {}\n", actions.join(", ")));
    }
    if request.role != DecisionRole::Main {
        prompt.push_str(
            "\nWARNING: The agent appears to be stuck repeating the same action. Choose a different approach.\n",
        );
    }
    prompt.push_str("\nWhat action should you take next?");
    if let Some(strict) = &request.reformulation {
        prompt.push_str("\n\n");
        prompt.push_str(strict);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_role_has_format_instructions() {
        for role in DecisionRole::ALL {
            let p = system_prompt(role);
            assert!(p.contains("ACTION: <single action to take>"), "role {}", role);
            assert!(
                p.contains("Available actions: up, down, left, right, a, b, start, select, wait."),
                "role {}",
                role
            );
        }
    }

    #[test]
    fn test_user_prompt_sections() {
        let req = DecisionRequest {
            role: DecisionRole::Critique,
            context: "=== RECENT TURNS (Detailed) ===\n--- Turn 1 ---".to_string(),
            goals: "=== CURRENT GOALS ===\nPRIMARY: Not set".to_string(),
            state: "Location: town".to_string(),
            recent_actions: vec![ActionToken::Down, ActionToken::Down],
            reformulation: Some("Reply with EXACTLY three lines".to_string()),
        };
        let p = user_prompt(&req);
        assert!(p.starts_with("=== RECENT TURNS"));
        assert!(p.contains("=== CURRENT STATE ===\nLocation: town"));
        assert!(p.contains("Recent actions (oldest first): down, down"));
        assert!(p.contains("appears to be stuck"));
        assert!(p.ends_with("Reply with EXACTLY three lines"));
    }
}
