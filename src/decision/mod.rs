//! 决策层：角色路径、输出解析、prompt 与 LLM 协作者

pub mod collaborator;
pub mod parser;
pub mod prompts;
pub mod roles;
pub mod summarizer;

pub use collaborator::{llm_decision_paths, LlmDecider};
pub use parser::{parse_decision, Decision, DecisionOutcome};
pub use roles::{DecisionCollaborator, DecisionPaths, DecisionRequest, DecisionRole};
pub use summarizer::LlmSummarizer;
