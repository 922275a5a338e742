//! 基于 LLM 的决策协作者
//!
//! 一个角色一个 LlmDecider：system prompt + 用户消息 -> LLM -> 严格解析。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::decision::{
    parse_decision, prompts, Decision, DecisionCollaborator, DecisionOutcome, DecisionPaths,
    DecisionRequest, DecisionRole,
};
use crate::llm::{LlmClient, Message};

pub struct LlmDecider {
    llm: Arc<dyn LlmClient>,
    role: DecisionRole,
    system_prompt: String,
}

impl LlmDecider {
    pub fn new(llm: Arc<dyn LlmClient>, role: DecisionRole) -> Self {
        Self {
            llm,
            role,
            system_prompt: prompts::system_prompt(role),
        }
    }

    pub fn role(&self) -> DecisionRole {
        self.role
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }
}

#[async_trait]
impl DecisionCollaborator for LlmDecider {
    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, AgentError> {
        let messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(prompts::user_prompt(request)),
        ];
        let raw = self
            .llm
            .complete(&messages)
            .await
            .map_err(AgentError::LlmError)?;

        match parse_decision(&raw) {
            DecisionOutcome::Ok(decision) => {
                tracing::debug!(role = %self.role, action = %decision.action, "decision parsed");
                Ok(decision)
            }
            DecisionOutcome::Malformed(raw) => {
                tracing::warn!(role = %self.role, "malformed decision output: {}", preview(&raw));
                Err(AgentError::MalformedDecision(raw))
            }
        }
    }
}

fn preview(raw: &str) -> String {
    let mut p: String = raw.chars().take(200).collect();
    if raw.chars().count() > 200 {
        p.push_str("...");
    }
    p.replace('\n', " | ")
}

/// 为全部角色构建 LlmDecider；llm_for_role 返回 None 时共用 default_llm
pub fn llm_decision_paths<F>(default_llm: Arc<dyn LlmClient>, mut llm_for_role: F) -> DecisionPaths
where
    F: FnMut(DecisionRole) -> Option<Arc<dyn LlmClient>>,
{
    let build = |role: DecisionRole, llm: Arc<dyn LlmClient>| -> Arc<dyn DecisionCollaborator> {
        Arc::new(LlmDecider::new(llm, role))
    };
    let main_llm = llm_for_role(DecisionRole::Main).unwrap_or_else(|| Arc::clone(&default_llm));
    let mut paths = DecisionPaths::new(build(DecisionRole::Main, main_llm));
    for role in [
        DecisionRole::Navigation,
        DecisionRole::PuzzleSolving,
        DecisionRole::Critique,
    ] {
        let llm = llm_for_role(role).unwrap_or_else(|| Arc::clone(&default_llm));
        paths = paths.with_role(role, build(role, llm));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::tools::ActionToken;

    #[tokio::test]
    async fn test_decider_parses_llm_reply() {
        let llm = Arc::new(MockLlmClient::scripted([
            "REASONING: head to the exit\nACTION: up\nGOAL_UPDATE: SECONDARY: Find the exit",
        ]));
        let decider = LlmDecider::new(llm, DecisionRole::Main);
        let d = decider.decide(&DecisionRequest::default()).await.unwrap();
        assert_eq!(d.action, ActionToken::Up);
        assert_eq!(d.goal_directive.unwrap().slot, "secondary");
    }

    #[tokio::test]
    async fn test_decider_reports_malformed() {
        let llm = Arc::new(MockLlmClient::scripted(["just press up"]));
        let decider = LlmDecider::new(llm, DecisionRole::Navigation);
        let err = decider.decide(&DecisionRequest::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::MalformedDecision(raw) if raw == "just press up"));
    }

    #[tokio::test]
    async fn test_paths_cover_all_roles() {
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new());
        let paths = llm_decision_paths(llm, |_| None);
        for role in DecisionRole::ALL {
            assert_eq!(paths.resolve(role).0, role);
        }
    }
}
