//! PlayBee - 回合制游戏智能体核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 回合编排、错误与恢复、会话快照、关闭管理
//! - **decision**: 决策角色、输出解析、prompt、LLM 决策与压缩协作者
//! - **emulator**: 模拟器与状态观测边界，内置网格世界模拟器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 回合历史与压缩、探索记忆、目标层级、进度与检查点
//! - **tools**: 动作词表与动作执行器（卡住检测）

pub mod config;
pub mod core;
pub mod decision;
pub mod emulator;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
