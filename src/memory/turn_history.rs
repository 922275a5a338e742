//! 回合历史与上下文窗口
//!
//! 原始回合记录按顺序追加；数量达到 max_context_turns 时，把除最近 keep_recent 条以外的记录交给
//! 压缩协作者生成一条摘要，摘要只追加不展开。压缩失败时保留全部原始记录，下次调用重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::decision::DecisionRole;
use crate::memory::GoalDirective;
use crate::tools::ActionToken;

/// 单个回合的不可变记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    /// 紧凑的状态快照文本（地点、坐标等）
    pub state: String,
    pub action: ActionToken,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_directive: Option<GoalDirective>,
    #[serde(default)]
    pub role: DecisionRole,
}

impl TurnRecord {
    pub fn new(index: u64, state: impl Into<String>, action: ActionToken, rationale: impl Into<String>) -> Self {
        Self {
            index,
            timestamp: Utc::now(),
            state: state.into(),
            action,
            rationale: rationale.into(),
            goal_directive: None,
            role: DecisionRole::Main,
        }
    }

    pub fn with_directive(mut self, directive: Option<GoalDirective>) -> Self {
        self.goal_directive = directive;
        self
    }

    pub fn with_role(mut self, role: DecisionRole) -> Self {
        self.role = role;
        self
    }

    fn render(&self) -> String {
        let mut text = format!("\n--- Turn {} ---\n", self.index);
        if !self.state.is_empty() {
            text.push_str(&format!("State: {}\n", self.state));
        }
        text.push_str(&format!("Action: {}\n", self.action));
        if !self.rationale.is_empty() {
            text.push_str(&format!("Reasoning: {}\n", self.rationale));
        }
        if let Some(d) = &self.goal_directive {
            text.push_str(&format!("Goal update: {}\n", d));
        }
        text
    }
}

/// 压缩协作者：把一段回合记录概括为一条摘要（对调用方无副作用）
#[async_trait]
pub trait CompactionCollaborator: Send + Sync {
    async fn summarize(&self, turns: &[TurnRecord]) -> Result<String, AgentError>;
}

/// 上下文窗口；序列化为 `{summaries: [...], recent_turns: [...]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub summaries: Vec<String>,
    pub recent_turns: Vec<TurnRecord>,
}

/// 压缩阈值配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    max_context_turns: usize,
    keep_recent: usize,
}

impl CompactionPolicy {
    /// keep_recent 必须小于 max_context_turns，否则压缩后仍会立即触发下一次
    pub fn new(max_context_turns: usize, keep_recent: usize) -> Result<Self, AgentError> {
        if max_context_turns == 0 {
            return Err(AgentError::ConfigError(
                "max_context_turns must be greater than 0".to_string(),
            ));
        }
        if keep_recent >= max_context_turns {
            return Err(AgentError::ConfigError(format!(
                "keep_recent_turns ({}) must be smaller than max_context_turns ({})",
                keep_recent, max_context_turns
            )));
        }
        Ok(Self {
            max_context_turns,
            keep_recent,
        })
    }

    pub fn max_context_turns(&self) -> usize {
        self.max_context_turns
    }

    pub fn keep_recent(&self) -> usize {
        self.keep_recent
    }
}

/// 一次 compact_if_needed 调用的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    NotNeeded,
    Compacted { turns: usize, first: u64, last: u64 },
    /// 压缩协作者失败，记录原样保留，下次重试
    Deferred(String),
}

/// 回合历史管理器
pub struct TurnHistory {
    window: ContextWindow,
    policy: CompactionPolicy,
    compactor: Arc<dyn CompactionCollaborator>,
    timeout: Option<Duration>,
}

impl TurnHistory {
    pub fn new(policy: CompactionPolicy, compactor: Arc<dyn CompactionCollaborator>) -> Self {
        Self {
            window: ContextWindow::default(),
            policy,
            compactor,
            timeout: None,
        }
    }

    /// 为压缩调用设置超时（超时视为压缩失败）
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn policy(&self) -> CompactionPolicy {
        self.policy
    }

    pub fn window(&self) -> &ContextWindow {
        &self.window
    }

    pub fn summaries(&self) -> &[String] {
        &self.window.summaries
    }

    pub fn recent(&self) -> &[TurnRecord] {
        &self.window.recent_turns
    }

    pub fn last_index(&self) -> Option<u64> {
        self.window.recent_turns.last().map(|t| t.index)
    }

    /// 用检查点中的窗口替换当前窗口
    pub fn restore(&mut self, window: ContextWindow) {
        self.window = window;
    }

    pub fn append(&mut self, turn: TurnRecord) {
        if let Some(last) = self.last_index() {
            if turn.index <= last {
                tracing::warn!(last, index = turn.index, "turn index is not increasing");
            }
        }
        self.window.recent_turns.push(turn);
    }

    pub fn needs_compaction(&self) -> bool {
        self.window.recent_turns.len() >= self.policy.max_context_turns
    }

    /// 每次 append 之后调用；单次调用最多压缩一次
    pub async fn compact_if_needed(&mut self) -> Result<CompactionOutcome, AgentError> {
        if !self.needs_compaction() {
            return Ok(CompactionOutcome::NotNeeded);
        }

        let total = self.window.recent_turns.len();
        let keep = self.policy.keep_recent;
        if keep >= self.policy.max_context_turns {
            return Err(AgentError::ConfigError(format!(
                "tail of {} turns would still reach the compaction threshold {}",
                keep, self.policy.max_context_turns
            )));
        }
        let split = total - keep;
        let head = &self.window.recent_turns[..split];
        let (first, last) = (head[0].index, head[split - 1].index);
        tracing::info!(turns = split, first, last, "compacting turn history");

        let result = match self.timeout {
            Some(t) => match tokio::time::timeout(t, self.compactor.summarize(head)).await {
                Ok(r) => r,
                Err(_) => Err(AgentError::CompactionFailed(format!(
                    "summarizer timed out after {}ms",
                    t.as_millis()
                ))),
            },
            None => self.compactor.summarize(head).await,
        };

        match result {
            Ok(summary) if !summary.trim().is_empty() => {
                self.window
                    .summaries
                    .push(format!("[Turns {}-{}]: {}", first, last, summary.trim()));
                self.window.recent_turns.drain(..split);
                Ok(CompactionOutcome::Compacted {
                    turns: split,
                    first,
                    last,
                })
            }
            Ok(_) => {
                tracing::warn!("summarizer returned empty text, keeping raw turns");
                Ok(CompactionOutcome::Deferred("empty summary".to_string()))
            }
            Err(e) => {
                tracing::warn!("Compaction failed ({}), keeping raw turns for retry", e);
                Ok(CompactionOutcome::Deferred(e.to_string()))
            }
        }
    }

    /// 摘要 + 原始回合组成的上下文文本
    pub fn render_context(&self) -> String {
        render_parts(&self.window.summaries, &self.window.recent_turns, 0)
    }

    /// 渲染不超过 max_chars 的上下文：先丢最旧的摘要，再丢最旧的回合（只影响渲染，不改存储）
    pub fn render_context_within(&self, max_chars: usize) -> String {
        let mut summaries: &[String] = &self.window.summaries;
        let mut turns: &[TurnRecord] = &self.window.recent_turns;
        let mut omitted = 0;
        loop {
            let text = render_parts(summaries, turns, omitted);
            if text.chars().count() <= max_chars {
                return text;
            }
            if !summaries.is_empty() {
                summaries = &summaries[1..];
            } else if turns.len() > 1 {
                turns = &turns[1..];
            } else {
                return text.chars().take(max_chars).collect();
            }
            omitted += 1;
        }
    }
}

fn render_parts(summaries: &[String], turns: &[TurnRecord], omitted: usize) -> String {
    let mut parts = String::new();
    if omitted > 0 {
        parts.push_str(&format!("({} older entries omitted)\n\n", omitted));
    }
    if !summaries.is_empty() {
        parts.push_str("=== PREVIOUS ACTIVITY SUMMARY ===\n");
        for s in summaries {
            parts.push_str(s);
            parts.push('\n');
        }
        parts.push('\n');
    }
    if !turns.is_empty() {
        parts.push_str("=== RECENT TURNS (Detailed) ===\n");
        for t in turns {
            parts.push_str(&t.render());
        }
    }
    parts
}
