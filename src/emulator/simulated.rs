//! 确定性的网格世界模拟器
//!
//! 没有接入真实模拟器时使用：若干矩形地点，边界与墙不可通过，踩到出口切换地点。
//! 同时实现 Emulator 与 StateObserver，便于本地跑通完整回合流程与集成测试。

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::emulator::{Emulator, EmulatorSnapshot, GameObservation, StateObserver};
use crate::memory::{Coord, MapBounds};
use crate::tools::ActionToken;

/// 地点出口：站到 at 上时传送到 to 号地点的 spawn
#[derive(Debug, Clone)]
pub struct SimExit {
    pub at: Coord,
    pub to: usize,
    pub spawn: Coord,
}

#[derive(Debug, Clone)]
pub struct SimLocation {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub walls: Vec<Coord>,
    pub exits: Vec<SimExit>,
}

impl SimLocation {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            walls: Vec::new(),
            exits: Vec::new(),
        }
    }

    pub fn with_wall(mut self, at: Coord) -> Self {
        self.walls.push(at);
        self
    }

    pub fn with_exit(mut self, at: Coord, to: usize, spawn: Coord) -> Self {
        self.exits.push(SimExit { at, to, spawn });
        self
    }

    fn bounds(&self) -> MapBounds {
        MapBounds {
            width: self.width,
            height: self.height,
        }
    }

    fn passable(&self, c: &Coord) -> bool {
        self.bounds().contains(c) && !self.walls.contains(c)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SimState {
    location: usize,
    position: Coord,
    frame: u64,
    presses: u64,
    menu_open: bool,
}

/// 网格世界模拟器
#[derive(Debug)]
pub struct SimulatedEmulator {
    world: Vec<SimLocation>,
    state: Mutex<SimState>,
    /// 注入次数达到该值后所有调用失败（模拟模拟器不可用）
    fail_after: Option<u64>,
}

impl Default for SimulatedEmulator {
    fn default() -> Self {
        Self::pallet_demo()
    }
}

impl SimulatedEmulator {
    pub fn new(world: Vec<SimLocation>, start: Coord) -> Self {
        Self {
            world,
            state: Mutex::new(SimState {
                location: 0,
                position: start,
                frame: 0,
                presses: 0,
                menu_open: false,
            }),
            fail_after: None,
        }
    }

    /// 两个地点的小世界：小镇北侧出口通往 1 号道路
    pub fn pallet_demo() -> Self {
        let town = SimLocation::new("pallet_town", 20, 18)
            .with_wall(Coord::new(5, 5))
            .with_wall(Coord::new(6, 5))
            .with_wall(Coord::new(13, 5))
            .with_wall(Coord::new(14, 5))
            .with_exit(Coord::new(10, 0), 1, Coord::new(10, 34));
        let route = SimLocation::new("route_1", 20, 36).with_exit(Coord::new(10, 35), 0, Coord::new(10, 1));
        Self::new(vec![town, route], Coord::new(5, 8))
    }

    pub fn with_failure_after(mut self, injections: u64) -> Self {
        self.fail_after = Some(injections);
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SimState>, AgentError> {
        self.state
            .lock()
            .map_err(|_| AgentError::Emulator("emulator state poisoned".to_string()))
    }

    fn check_alive(&self, state: &SimState) -> Result<(), AgentError> {
        match self.fail_after {
            Some(limit) if state.presses >= limit => {
                Err(AgentError::Emulator("emulator unreachable".to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Emulator for SimulatedEmulator {
    async fn step(&self, frames: u32) -> Result<u64, AgentError> {
        let mut state = self.lock()?;
        state.frame += frames as u64;
        Ok(state.frame)
    }

    async fn inject(&self, action: ActionToken) -> Result<(), AgentError> {
        let mut state = self.lock()?;
        self.check_alive(&state)?;
        state.presses += 1;

        match action {
            ActionToken::Start => state.menu_open = !state.menu_open,
            ActionToken::B => state.menu_open = false,
            _ if state.menu_open => {}
            _ => {
                if let Some((dx, dy)) = action.direction() {
                    let location = &self.world[state.location];
                    let next = Coord::new(state.position.x + dx, state.position.y + dy);
                    if location.passable(&next) {
                        state.position = next;
                        if let Some(exit) = location.exits.iter().find(|e| e.at == next) {
                            state.location = exit.to;
                            state.position = exit.spawn;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn capture_state(&self) -> Result<EmulatorSnapshot, AgentError> {
        let state = self.lock()?;
        serde_json::to_vec(&*state)
            .map(EmulatorSnapshot)
            .map_err(|e| AgentError::Emulator(e.to_string()))
    }

    fn restore_state(&self, snapshot: &EmulatorSnapshot) -> Result<(), AgentError> {
        let restored: SimState = serde_json::from_slice(&snapshot.0)
            .map_err(|e| AgentError::Emulator(format!("corrupt emulator state: {}", e)))?;
        if restored.location >= self.world.len() {
            return Err(AgentError::Emulator(format!(
                "unknown location index {}",
                restored.location
            )));
        }
        *self.lock()? = restored;
        Ok(())
    }
}

impl StateObserver for SimulatedEmulator {
    fn observe(&self) -> Result<GameObservation, AgentError> {
        let state = self.lock()?;
        self.check_alive(&state)?;
        let location = &self.world[state.location];
        let mut description = format!(
            "Location: {}\nPosition: {}\nFrame: {}\n",
            location.id, state.position, state.frame
        );
        if state.menu_open {
            description.push_str("Menu: open (press b to close)\n");
        }
        let exits: Vec<String> = location.exits.iter().map(|e| e.at.to_string()).collect();
        if !exits.is_empty() {
            description.push_str(&format!("Known exits: {}\n", exits.join(", ")));
        }
        Ok(GameObservation {
            location: location.id.clone(),
            coordinate: state.position,
            bounds: Some(location.bounds()),
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_moves_and_blocks_at_walls() {
        let emu = SimulatedEmulator::pallet_demo();
        emu.inject(ActionToken::Right).await.unwrap();
        assert_eq!(emu.observe().unwrap().coordinate, Coord::new(6, 8));

        // (6,5) 是墙：从 (6,8) 向上两步到 (6,6)，第三步被挡住
        for _ in 0..3 {
            emu.inject(ActionToken::Up).await.unwrap();
        }
        assert_eq!(emu.observe().unwrap().coordinate, Coord::new(6, 6));
    }

    #[tokio::test]
    async fn test_exit_switches_location() {
        let town = SimLocation::new("town", 3, 3).with_exit(Coord::new(1, 0), 1, Coord::new(0, 0));
        let cave = SimLocation::new("cave", 2, 2);
        let emu = SimulatedEmulator::new(vec![town, cave], Coord::new(1, 1));
        emu.inject(ActionToken::Up).await.unwrap();
        let obs = emu.observe().unwrap();
        assert_eq!(obs.location, "cave");
        assert_eq!(obs.coordinate, Coord::new(0, 0));
        assert_eq!(obs.bounds, Some(MapBounds { width: 2, height: 2 }));
    }

    #[tokio::test]
    async fn test_menu_blocks_movement() {
        let emu = SimulatedEmulator::pallet_demo();
        emu.inject(ActionToken::Start).await.unwrap();
        emu.inject(ActionToken::Left).await.unwrap();
        let obs = emu.observe().unwrap();
        assert_eq!(obs.coordinate, Coord::new(5, 8));
        assert!(obs.description.contains("Menu: open"));
        emu.inject(ActionToken::B).await.unwrap();
        emu.inject(ActionToken::Left).await.unwrap();
        assert_eq!(emu.observe().unwrap().coordinate, Coord::new(4, 8));
    }

    #[tokio::test]
    async fn test_capture_restore_and_file_handles() {
        let emu = SimulatedEmulator::pallet_demo();
        emu.inject(ActionToken::Down).await.unwrap();
        emu.step(10).await.unwrap();
        let snap = emu.capture_state().unwrap();

        emu.inject(ActionToken::Down).await.unwrap();
        emu.restore_state(&snap).unwrap();
        assert_eq!(emu.observe().unwrap().coordinate, Coord::new(5, 9));

        let dir = tempfile::tempdir().unwrap();
        let handle = dir.path().join("emu.state");
        emu.save(&handle).unwrap();
        emu.save(&handle).unwrap();
        emu.inject(ActionToken::Right).await.unwrap();
        emu.load(&handle).unwrap();
        emu.load(&handle).unwrap();
        assert_eq!(emu.capture_state().unwrap(), snap);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let emu = SimulatedEmulator::pallet_demo().with_failure_after(1);
        emu.inject(ActionToken::A).await.unwrap();
        assert!(matches!(
            emu.inject(ActionToken::A).await,
            Err(AgentError::Emulator(_))
        ));
        assert!(emu.observe().is_err());
    }

    #[test]
    fn test_corrupt_snapshot_rejected() {
        let emu = SimulatedEmulator::pallet_demo();
        let err = emu.restore_state(&EmulatorSnapshot(b"garbage".to_vec())).unwrap_err();
        assert!(matches!(err, AgentError::Emulator(_)));
    }
}
