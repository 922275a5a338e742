//! 基于 LLM 的压缩协作者：把一段回合记录概括为 2-3 句话

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::memory::{CompactionCollaborator, TurnRecord};

pub struct LlmSummarizer {
    llm: Arc<dyn LlmClient>,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn prompt(turns: &[TurnRecord]) -> String {
        let lines: Vec<String> = turns
            .iter()
            .map(|t| {
                let mut line = format!("Turn {}: Action={}", t.index, t.action);
                if !t.state.is_empty() {
                    line.push_str(&format!(", State={}", t.state));
                }
                if let Some(d) = &t.goal_directive {
                    line.push_str(&format!(", Goal={}", d));
                }
                line
            })
            .collect();

        format!(
            "You are summarizing a sequence of gameplay actions.\n\n\
             Please create a concise summary (2-3 sentences) of the following {} turns, focusing on:\n\
             - Major progress made (significant locations reached, items or events)\n\
             - Current objectives being pursued\n\
             - Any challenges or obstacles encountered\n\n\
             Turns to summarize:\n{}\n\n\
             Provide ONLY the summary, no additional commentary.",
            turns.len(),
            lines.join("\n")
        )
    }
}

#[async_trait]
impl CompactionCollaborator for LlmSummarizer {
    async fn summarize(&self, turns: &[TurnRecord]) -> Result<String, AgentError> {
        tracing::info!("Summarizing {} turns", turns.len());
        let messages = vec![Message::user(Self::prompt(turns))];
        let summary = self
            .llm
            .complete(&messages)
            .await
            .map_err(AgentError::CompactionFailed)?;
        Ok(summary.trim().to_string())
    }
}
