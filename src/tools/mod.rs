//! 动作层：固定动作词表与动作执行器（含卡住检测）

pub mod action;
pub mod executor;

pub use action::ActionToken;
pub use executor::{ActionExecutor, ActionOutcome, ActionWindow, ExecutorState};
