//! 动作执行器
//!
//! 校验动作属于固定词表，在超时内把输入转发给模拟器并推进帧，记录到定长动作窗口用于卡住检测；
//! 每次执行输出结构化审计日志（JSON）。卡住时执行器不自行恢复，由编排器升级处理后清空窗口。
//!
//! 超时覆盖注入与推进帧两步：注入已被模拟器接受、但推进帧超时的动作同样按 ActionTimeout 失败，
//! 不进入动作窗口，本回合由编排器按失败处理（输入可能已生效，不会重放）。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::emulator::Emulator;
use crate::tools::ActionToken;

/// 最近 N 个已执行动作的环形窗口
#[derive(Debug, Clone)]
pub struct ActionWindow {
    capacity: usize,
    actions: VecDeque<ActionToken>,
}

impl ActionWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            actions: VecDeque::with_capacity(capacity),
        }
    }

    /// 满了之后覆盖最旧的一个
    pub fn push(&mut self, action: ActionToken) {
        if self.capacity == 0 {
            return;
        }
        if self.actions.len() == self.capacity {
            self.actions.pop_front();
        }
        self.actions.push_back(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.actions.len() == self.capacity
    }

    /// 窗口已满且只有一个不同的值
    pub fn is_uniform(&self) -> bool {
        match self.actions.front() {
            Some(first) => self.is_full() && self.actions.iter().all(|a| a == first),
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }

    /// 从旧到新
    pub fn to_vec(&self) -> Vec<ActionToken> {
        self.actions.iter().copied().collect()
    }
}

/// 执行器状态机：Idle -> Executing -> (Ok | Stuck)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutorState {
    Idle,
    Executing,
    Ok,
    Stuck,
}

/// 一次执行的结果：动作、执行后帧计数、是否触发卡住
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionOutcome {
    pub action: ActionToken,
    pub frame: u64,
    pub stuck: bool,
}

/// 动作执行器：持有模拟器句柄、动作窗口与超时
pub struct ActionExecutor {
    emulator: Arc<dyn Emulator>,
    window: ActionWindow,
    state: ExecutorState,
    timeout: Duration,
    frames_per_action: u32,
    wait_frames: u32,
}

impl ActionExecutor {
    pub fn new(emulator: Arc<dyn Emulator>, stuck_threshold: usize, timeout: Duration) -> Self {
        Self {
            emulator,
            window: ActionWindow::new(stuck_threshold),
            state: ExecutorState::Idle,
            timeout,
            frames_per_action: 10,
            wait_frames: 30,
        }
    }

    /// 每次输入后推进的帧数；wait 推进 wait_frames 帧
    pub fn with_frames(mut self, frames_per_action: u32, wait_frames: u32) -> Self {
        self.frames_per_action = frames_per_action;
        self.wait_frames = wait_frames;
        self
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// 校验词表后执行；词表外的输入直接拒绝，不改变任何状态
    pub async fn execute(&mut self, action_token: &str) -> Result<ActionOutcome, AgentError> {
        let action: ActionToken = action_token.parse()?;
        self.execute_token(action).await
    }

    pub async fn execute_token(&mut self, action: ActionToken) -> Result<ActionOutcome, AgentError> {
        self.state = ExecutorState::Executing;
        let start = Instant::now();
        let frames = if action == ActionToken::Wait {
            self.wait_frames
        } else {
            self.frames_per_action
        };

        let emulator = Arc::clone(&self.emulator);
        let result = timeout(self.timeout, async move {
            if action != ActionToken::Wait {
                emulator.inject(action).await?;
            }
            let frame = emulator.step(frames).await?;
            Ok::<u64, AgentError>(frame)
        })
        .await;

        let outcome: &str = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "action_audit",
            "action": action.as_str(),
            "outcome": outcome,
            "frames": frames,
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "action");

        match result {
            Ok(Ok(frame)) => {
                self.window.push(action);
                let stuck = self.is_stuck();
                self.state = if stuck {
                    tracing::warn!(
                        "Stuck detected: repeating '{}' {} times",
                        action,
                        self.window.len()
                    );
                    ExecutorState::Stuck
                } else {
                    ExecutorState::Ok
                };
                Ok(ActionOutcome {
                    action,
                    frame,
                    stuck,
                })
            }
            Ok(Err(e)) => {
                self.state = ExecutorState::Idle;
                Err(e)
            }
            Err(_) => {
                self.state = ExecutorState::Idle;
                Err(AgentError::ActionTimeout(action.to_string()))
            }
        }
    }

    /// 窗口已满且全部相同才算卡住；交替往返（如 up/down）不会被识别
    pub fn is_stuck(&self) -> bool {
        self.window.is_uniform()
    }

    /// 编排器完成升级后调用，避免下一回合立即再次触发
    pub fn reset_stuck_detection(&mut self) {
        self.window.clear();
        self.state = ExecutorState::Idle;
        tracing::debug!("Reset stuck detection");
    }

    /// 最近 n 个动作（从旧到新）
    pub fn recent_actions(&self, n: usize) -> Vec<ActionToken> {
        let all = self.window.to_vec();
        all[all.len().saturating_sub(n)..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::emulator::{Emulator, EmulatorSnapshot, SimulatedEmulator};

    /// 注入立即成功，推进帧一直挂起
    #[derive(Default)]
    struct FrozenEmulator {
        injected: AtomicUsize,
    }

    #[async_trait]
    impl Emulator for FrozenEmulator {
        async fn step(&self, _frames: u32) -> Result<u64, AgentError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(0)
        }

        async fn inject(&self, _action: ActionToken) -> Result<(), AgentError> {
            self.injected.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn capture_state(&self) -> Result<EmulatorSnapshot, AgentError> {
            Ok(EmulatorSnapshot::default())
        }

        fn restore_state(&self, _snapshot: &EmulatorSnapshot) -> Result<(), AgentError> {
            Ok(())
        }
    }

    fn executor(threshold: usize) -> ActionExecutor {
        ActionExecutor::new(
            Arc::new(SimulatedEmulator::pallet_demo()),
            threshold,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_ten_downs_is_stuck() {
        let mut exec = executor(10);
        for i in 1..=10 {
            let outcome = exec.execute("down").await.unwrap();
            assert_eq!(outcome.stuck, i == 10);
        }
        assert!(exec.is_stuck());
        assert_eq!(exec.state(), ExecutorState::Stuck);
    }

    #[tokio::test]
    async fn test_one_up_then_nine_downs_not_stuck() {
        let mut exec = executor(10);
        exec.execute("up").await.unwrap();
        for _ in 0..9 {
            exec.execute("down").await.unwrap();
        }
        assert!(!exec.is_stuck());
        assert_eq!(exec.state(), ExecutorState::Ok);
        // 再来一个 down，up 被挤出窗口
        exec.execute("down").await.unwrap();
        assert!(exec.is_stuck());
    }

    #[tokio::test]
    async fn test_any_differing_token_breaks_stuck() {
        for position in 0..5 {
            let mut exec = executor(5);
            for i in 0..5 {
                let token = if i == position { "left" } else { "a" };
                exec.execute(token).await.unwrap();
            }
            assert!(!exec.is_stuck(), "differing token at {}", position);
        }
    }

    #[tokio::test]
    async fn test_alternating_is_not_detected() {
        let mut exec = executor(4);
        for token in ["up", "down", "up", "down", "up", "down"] {
            exec.execute(token).await.unwrap();
        }
        assert!(!exec.is_stuck());
    }

    #[tokio::test]
    async fn test_invalid_token_rejected_without_state_change() {
        let mut exec = executor(3);
        exec.execute("a").await.unwrap();
        let err = exec.execute("jump").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidAction(_)));
        assert_eq!(exec.recent_actions(10), vec![ActionToken::A]);
        assert_eq!(exec.state(), ExecutorState::Ok);
    }

    #[tokio::test]
    async fn test_step_timeout_after_inject_is_not_recorded() {
        let emulator = Arc::new(FrozenEmulator::default());
        let mut exec = ActionExecutor::new(emulator.clone(), 3, Duration::from_millis(50));

        let err = exec.execute("left").await.unwrap_err();
        assert!(matches!(err, AgentError::ActionTimeout(_)));
        assert_eq!(emulator.injected.load(Ordering::SeqCst), 1);
        assert!(exec.recent_actions(10).is_empty());
        assert_eq!(exec.state(), ExecutorState::Idle);
    }

    #[tokio::test]
    async fn test_reset_clears_window() {
        let mut exec = executor(2);
        exec.execute("b").await.unwrap();
        exec.execute("b").await.unwrap();
        assert!(exec.is_stuck());
        exec.reset_stuck_detection();
        assert!(!exec.is_stuck());
        assert_eq!(exec.state(), ExecutorState::Idle);
        exec.execute("b").await.unwrap();
        assert!(!exec.is_stuck());
    }

    #[tokio::test]
    async fn test_wait_steps_without_input() {
        let mut exec = executor(3).with_frames(10, 30);
        let outcome = exec.execute("wait").await.unwrap();
        assert_eq!(outcome.frame, 30);
        let outcome = exec.execute("right").await.unwrap();
        assert_eq!(outcome.frame, 40);
    }

    #[tokio::test]
    async fn test_emulator_failure_is_not_recorded() {
        let emu = Arc::new(SimulatedEmulator::pallet_demo().with_failure_after(0));
        let mut exec = ActionExecutor::new(emu, 3, Duration::from_secs(5));
        let err = exec.execute("up").await.unwrap_err();
        assert!(err.is_fatal());
        assert!(exec.recent_actions(3).is_empty());
        assert_eq!(exec.state(), ExecutorState::Idle);
    }

    #[test]
    fn test_window_overwrites_oldest() {
        let mut w = ActionWindow::new(3);
        for a in [ActionToken::Up, ActionToken::Down, ActionToken::Left, ActionToken::Right] {
            w.push(a);
        }
        assert_eq!(w.to_vec(), vec![ActionToken::Down, ActionToken::Left, ActionToken::Right]);
        assert!(w.is_full());
        assert!(!w.is_uniform());
    }
}
