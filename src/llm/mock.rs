//! Mock LLM 客户端（用于测试与本地演示，无需 API）
//!
//! 先按顺序返回预置回复；预置回复用完后：摘要请求返回固定摘要，决策请求按方向键轮转给出合法的三行格式。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

const WALK_CYCLE: [&str; 4] = ["up", "right", "down", "left"];

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    scripted: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置回复，按调用顺序依次返回
    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scripted: Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self
            .scripted
            .lock()
            .map_err(|_| "mock poisoned".to_string())?
            .pop_front()
        {
            return Ok(next);
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        if last_user.contains("Turns to summarize") {
            let turns = last_user.lines().filter(|l| l.starts_with("Turn ")).count();
            return Ok(format!("Wandered around for {} turns (mock summary).", turns));
        }

        let action = WALK_CYCLE[n % WALK_CYCLE.len()];
        Ok(format!(
            "REASONING: Mock walker exploring step {}.\nACTION: {}\nGOAL_UPDATE: none",
            n, action
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_walk() {
        let llm = MockLlmClient::scripted(["first"]);
        let msgs = [Message::user("decide")];
        assert_eq!(llm.complete(&msgs).await.unwrap(), "first");
        let walk = llm.complete(&msgs).await.unwrap();
        assert!(walk.contains("ACTION: right"));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_summary_request() {
        let llm = MockLlmClient::new();
        let msgs = [Message::user("Turns to summarize:\nTurn 1: Action=up\nTurn 2: Action=up")];
        let out = llm.complete(&msgs).await.unwrap();
        assert!(out.contains("2 turns"));
    }
}
