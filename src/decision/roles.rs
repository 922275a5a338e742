//! 决策路径：主路径与卡住后的专用路径
//!
//! 角色是封闭枚举，调用时解析为具体的决策协作者；未注册的角色回退到 Main。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::decision::Decision;
use crate::tools::ActionToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRole {
    #[default]
    Main,
    Navigation,
    PuzzleSolving,
    Critique,
}

/// 连续卡住时依次尝试的专用路径
const ESCALATION_LADDER: [DecisionRole; 3] = [
    DecisionRole::Navigation,
    DecisionRole::Critique,
    DecisionRole::PuzzleSolving,
];

impl DecisionRole {
    pub const ALL: [DecisionRole; 4] = [
        DecisionRole::Main,
        DecisionRole::Navigation,
        DecisionRole::PuzzleSolving,
        DecisionRole::Critique,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionRole::Main => "main",
            DecisionRole::Navigation => "navigation",
            DecisionRole::PuzzleSolving => "puzzle_solving",
            DecisionRole::Critique => "critique",
        }
    }

    /// 第 streak 次连续卡住（从 1 开始）使用的角色
    pub fn escalation(streak: u32) -> DecisionRole {
        let i = (streak.max(1) - 1) as usize % ESCALATION_LADDER.len();
        ESCALATION_LADDER[i]
    }
}

impl fmt::Display for DecisionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次决策请求：渲染好的上下文、目标、状态文本
#[derive(Debug, Clone, Default)]
pub struct DecisionRequest {
    pub role: DecisionRole,
    pub context: String,
    pub goals: String,
    pub state: String,
    /// 最近执行的动作（从旧到新）；卡住升级时为清空前的窗口内容
    pub recent_actions: Vec<ActionToken>,
    /// 上一次输出无法解析时追加的严格格式说明
    pub reformulation: Option<String>,
}

/// 决策协作者：输出无法严格解析时返回 MalformedDecision
#[async_trait]
pub trait DecisionCollaborator: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, AgentError>;
}

/// 角色到协作者的映射，Main 必须存在
#[derive(Clone)]
pub struct DecisionPaths {
    main: Arc<dyn DecisionCollaborator>,
    specialized: HashMap<DecisionRole, Arc<dyn DecisionCollaborator>>,
}

impl DecisionPaths {
    pub fn new(main: Arc<dyn DecisionCollaborator>) -> Self {
        Self {
            main,
            specialized: HashMap::new(),
        }
    }

    pub fn with_role(mut self, role: DecisionRole, collaborator: Arc<dyn DecisionCollaborator>) -> Self {
        if role == DecisionRole::Main {
            self.main = collaborator;
        } else {
            self.specialized.insert(role, collaborator);
        }
        self
    }

    /// 返回实际使用的角色与协作者
    pub fn resolve(&self, role: DecisionRole) -> (DecisionRole, Arc<dyn DecisionCollaborator>) {
        match self.specialized.get(&role) {
            Some(c) => (role, Arc::clone(c)),
            None => {
                if role != DecisionRole::Main {
                    tracing::debug!(%role, "no collaborator registered, falling back to main");
                }
                (DecisionRole::Main, Arc::clone(&self.main))
            }
        }
    }
}
