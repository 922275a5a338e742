//! 模拟器与状态观测边界
//!
//! 核心只依赖这里的 trait：Emulator 负责推进帧、注入按键、导出/恢复状态；StateObserver 负责给出
//! 当前地点、坐标与状态文本。真实模拟器在 crate 外实现；SimulatedEmulator 供演示与测试使用。

pub mod simulated;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::{Coord, MapBounds};
use crate::tools::ActionToken;

pub use simulated::{SimLocation, SimulatedEmulator};

/// 模拟器状态的不透明字节
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorSnapshot(pub Vec<u8>);

/// 模拟器协作者
#[async_trait]
pub trait Emulator: Send + Sync {
    /// 推进 frames 帧，返回推进后的帧计数
    async fn step(&self, frames: u32) -> Result<u64, AgentError>;

    /// 注入一个输入（wait 不按键）
    async fn inject(&self, action: ActionToken) -> Result<(), AgentError>;

    fn capture_state(&self) -> Result<EmulatorSnapshot, AgentError>;

    fn restore_state(&self, snapshot: &EmulatorSnapshot) -> Result<(), AgentError>;

    /// 把当前状态写到 handle 指向的文件（同步、幂等）
    fn save(&self, handle: &Path) -> Result<(), AgentError> {
        let snapshot = self.capture_state()?;
        std::fs::write(handle, &snapshot.0)
            .map_err(|e| AgentError::Emulator(format!("save {}: {}", handle.display(), e)))
    }

    /// 从 handle 指向的文件恢复状态（同步、幂等）
    fn load(&self, handle: &Path) -> Result<(), AgentError> {
        let bytes = std::fs::read(handle)
            .map_err(|e| AgentError::Emulator(format!("load {}: {}", handle.display(), e)))?;
        self.restore_state(&EmulatorSnapshot(bytes))
    }
}

/// 一次状态观测：地点、坐标、可选边界与供决策使用的状态文本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameObservation {
    pub location: String,
    pub coordinate: Coord,
    pub bounds: Option<MapBounds>,
    pub description: String,
}

impl GameObservation {
    /// 写入回合记录的紧凑快照
    pub fn compact(&self) -> String {
        format!("{} {}", self.location, self.coordinate)
    }
}

/// 状态观测协作者（同步，不挂起）
pub trait StateObserver: Send + Sync {
    fn observe(&self) -> Result<GameObservation, AgentError>;
}
