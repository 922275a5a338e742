//! 核心编排层：错误与恢复、会话快照、过程事件、关闭管理、回合编排与构建

pub mod builder;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod recovery;
pub mod shutdown;
pub mod state;

pub use builder::{create_llm_from_config, SessionBuilder};
pub use error::{AgentError, ErrorKind, RecoveryAction};
pub use events::TurnEvent;
pub use orchestrator::{OrchestratorSettings, RunSummary, TurnOrchestrator, TurnOutcome};
pub use recovery::RecoveryEngine;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{SessionPhase, SessionSnapshot};
