//! 回合编排器：主控循环
//!
//! 每个会话一个任务，按固定协议推进回合：
//! 观测 -> 探索记忆 -> 按需压缩 -> 组装上下文 -> 决策（格式错误重试一次）-> 执行动作 -> 卡住升级
//! -> 应用目标指令 -> 追加回合记录 -> 每 K 回合写检查点。
//!
//! 会话状态全部由编排器独占；对外只通过 watch 通道发布 SessionSnapshot 拷贝。
//! 失败的回合不修改回合历史、探索记忆与目标集合，回合序号也不前进。
//! 关闭请求只在步骤之间生效；输入一旦送达模拟器，本回合总会提交。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::{AgentError, RecoveryAction, RecoveryEngine, SessionPhase, SessionSnapshot, TurnEvent};
use crate::decision::{Decision, DecisionCollaborator, DecisionPaths, DecisionRequest, DecisionRole};
use crate::emulator::{Emulator, GameObservation, StateObserver};
use crate::memory::{
    Checkpoint, CheckpointManifest, CheckpointReason, CheckpointStore, CompactionOutcome, Coord,
    ExplorationMap, GoalSet, ProgressCounters, TurnHistory, TurnRecord,
};
use crate::tools::{ActionExecutor, ActionToken};

/// 非卡住回合交给决策协作者的最近动作数
const RECENT_ACTIONS_SHOWN: usize = 5;

/// 编排参数（来自 AppConfig）
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub decision_timeout: Duration,
    pub checkpoint_interval: u64,
    pub max_consecutive_failures: u32,
    pub frontier_radius: u32,
    pub frontier_preview: usize,
    pub max_context_chars: usize,
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            decision_timeout: cfg.decision_timeout(),
            checkpoint_interval: cfg.progress.checkpoint_interval.max(1),
            max_consecutive_failures: cfg.progress.max_consecutive_failures,
            frontier_radius: cfg.exploration.frontier_radius,
            frontier_preview: cfg.exploration.frontier_preview,
            max_context_chars: cfg.memory.max_context_chars,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// 单个回合的结果（致命错误走 Err）
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Committed {
        turn: u64,
        action: ActionToken,
        role: DecisionRole,
        stuck: bool,
    },
    /// 瞬时失败或校验失败：会话继续，序号不前进
    Failed { turn: u64, reason: String },
}

/// run 正常结束时的汇总
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub attempted: u64,
    /// 最后一个已提交回合的序号
    pub last_turn: u64,
    pub cancelled: bool,
    pub progress: ProgressCounters,
}

/// 回合编排器
pub struct TurnOrchestrator {
    session_id: Uuid,
    emulator: Arc<dyn Emulator>,
    observer: Arc<dyn StateObserver>,
    history: TurnHistory,
    exploration: ExplorationMap,
    goals: GoalSet,
    progress: ProgressCounters,
    executor: ActionExecutor,
    paths: DecisionPaths,
    recovery: RecoveryEngine,
    store: Option<Arc<dyn CheckpointStore>>,
    settings: OrchestratorSettings,
    next_turn: u64,
    /// 下一回合使用的专用角色（只用一次）
    escalation: Option<DecisionRole>,
    stuck_streak: u32,
    /// 最近一次卡住时窗口内的动作，供升级角色参考
    stuck_actions: Vec<ActionToken>,
    consecutive_failures: u32,
    position: Option<(String, Coord)>,
    last_action: Option<ActionToken>,
    cancel: CancellationToken,
    state_tx: watch::Sender<SessionSnapshot>,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl TurnOrchestrator {
    pub fn new(
        emulator: Arc<dyn Emulator>,
        observer: Arc<dyn StateObserver>,
        history: TurnHistory,
        executor: ActionExecutor,
        paths: DecisionPaths,
        settings: OrchestratorSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionSnapshot {
            next_turn: 1,
            ..Default::default()
        });
        Self {
            session_id: Uuid::new_v4(),
            emulator,
            observer,
            history,
            exploration: ExplorationMap::new(),
            goals: GoalSet::new(),
            progress: ProgressCounters::new(),
            executor,
            paths,
            recovery: RecoveryEngine::new(),
            store: None,
            settings,
            next_turn: 1,
            escalation: None,
            stuck_streak: 0,
            stuck_actions: Vec::new(),
            consecutive_failures: 0,
            position: None,
            last_action: None,
            cancel: CancellationToken::new(),
            state_tx,
            events: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_goals(mut self, goals: GoalSet) -> Self {
        self.goals = goals;
        self
    }

    /// 订阅会话快照
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state_tx.subscribe()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn next_turn(&self) -> u64 {
        self.next_turn
    }

    pub fn history(&self) -> &TurnHistory {
        &self.history
    }

    pub fn exploration(&self) -> &ExplorationMap {
        &self.exploration
    }

    pub fn goals(&self) -> &GoalSet {
        &self.goals
    }

    pub fn progress(&self) -> &ProgressCounters {
        &self.progress
    }

    pub fn pending_escalation(&self) -> Option<DecisionRole> {
        self.escalation
    }

    /// 从存储中最新的检查点恢复；没有检查点时返回 None
    pub fn resume_latest(&mut self) -> Result<Option<u64>, AgentError> {
        let Some(store) = self.store.clone() else {
            return Ok(None);
        };
        match store.read_latest()? {
            Some(cp) => {
                let turn = cp.manifest.turn_index;
                self.restore(cp)?;
                Ok(Some(turn))
            }
            None => Ok(None),
        }
    }

    /// 用检查点替换会话状态（模拟器状态一并恢复）
    pub fn restore(&mut self, cp: Checkpoint) -> Result<(), AgentError> {
        self.emulator.restore_state(&cp.emulator_state)?;
        self.history.restore(cp.context);
        self.goals = cp.goals;
        self.exploration = cp.exploration;
        self.progress = cp.progress;
        self.session_id = cp.manifest.session_id;
        self.next_turn = cp.manifest.turn_index + 1;
        self.escalation = None;
        self.stuck_streak = 0;
        self.stuck_actions.clear();
        self.consecutive_failures = 0;
        self.executor.reset_stuck_detection();
        tracing::info!(
            session = %self.session_id,
            "Resumed from checkpoint at turn {} ({:?})",
            cp.manifest.turn_index,
            cp.manifest.reason
        );
        self.publish(SessionPhase::Idle);
        Ok(())
    }

    /// 一直运行到 max_turns 次尝试、关闭信号或致命错误；正常结束与关闭都会写最后一个检查点
    pub async fn run(&mut self, max_turns: Option<u64>) -> Result<RunSummary, AgentError> {
        tracing::info!(session = %self.session_id, "Starting session at turn {}", self.next_turn);
        let mut attempted = 0u64;
        let mut cancelled = false;

        loop {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if max_turns.is_some_and(|max| attempted >= max) {
                break;
            }
            attempted += 1;
            match self.run_turn().await {
                Ok(_) => {}
                Err(AgentError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(e) => {
                    tracing::error!("Fatal error on turn {}: {}", self.next_turn, e);
                    if let Err(cp_err) = self.checkpoint(CheckpointReason::Fatal) {
                        tracing::error!("Final checkpoint failed: {}", cp_err);
                    }
                    self.publish_error(e.to_string());
                    self.emit(TurnEvent::SessionEnded {
                        turns_completed: self.progress.turns_completed,
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }

        let reason = if cancelled { "shutdown" } else { "turn limit reached" };
        tracing::info!("Stopping session: {}", reason);
        if let Err(e) = self.checkpoint(CheckpointReason::Shutdown) {
            tracing::warn!("Final checkpoint failed: {}", e);
        }
        self.publish(SessionPhase::Stopped);
        self.emit(TurnEvent::SessionEnded {
            turns_completed: self.progress.turns_completed,
            reason: reason.to_string(),
        });

        Ok(RunSummary {
            attempted,
            last_turn: self.next_turn.saturating_sub(1),
            cancelled,
            progress: self.progress.clone(),
        })
    }

    /// 执行一个完整回合
    pub async fn run_turn(&mut self) -> Result<TurnOutcome, AgentError> {
        let turn = self.next_turn;
        self.ensure_running()?;
        tracing::debug!("=== Turn {} ===", turn);
        self.emit(TurnEvent::TurnStarted { turn });

        // 1. 观测
        self.publish(SessionPhase::Observing);
        let obs = self.observer.observe()?;
        self.position = Some((obs.location.clone(), obs.coordinate));

        // 2. 探索记忆：只读计算，标记留到提交时
        let new_cell = !self.exploration.is_visited(&obs.location, &obs.coordinate);
        let state_text = self.describe_state(&obs, new_cell);
        self.emit(TurnEvent::Observed {
            location: obs.location.clone(),
            coordinate: obs.coordinate.to_string(),
            new_cell,
        });
        self.ensure_running()?;

        // 3. 压缩
        self.publish(SessionPhase::Compacting);
        match self.history.compact_if_needed().await? {
            CompactionOutcome::Compacted { first, last, .. } => {
                self.progress.compactions += 1;
                self.emit(TurnEvent::Compacted { first, last });
            }
            CompactionOutcome::Deferred(reason) => {
                self.emit(TurnEvent::CompactionDeferred { reason });
            }
            CompactionOutcome::NotNeeded => {}
        }
        self.ensure_running()?;

        // 4. 组装
        let (role, collaborator) = self.paths.resolve(self.escalation.unwrap_or_default());
        let recent_actions = if self.escalation.is_some() {
            self.stuck_actions.clone()
        } else {
            self.executor.recent_actions(RECENT_ACTIONS_SHOWN)
        };
        let mut request = DecisionRequest {
            role,
            context: self.history.render_context_within(self.settings.max_context_chars),
            goals: self.goals.render(),
            state: state_text,
            recent_actions,
            reformulation: None,
        };

        // 5. 决策
        self.publish(SessionPhase::Deciding);
        let decision = match self.decide(collaborator.as_ref(), &mut request).await {
            Ok(d) => d,
            Err(e) => match self.recovery.handle(&e, u32::MAX) {
                RecoveryAction::Abort => return Err(e),
                _ => return self.fail_turn(turn, &e),
            },
        };
        tracing::info!(turn, role = %role, action = %decision.action, "Decision: {}", decision.rationale);
        self.emit(TurnEvent::Decided {
            role,
            action: decision.action,
            rationale: decision.rationale.clone(),
        });
        self.ensure_running()?;

        // 6. 执行
        self.publish(SessionPhase::Executing);
        let outcome = match self.executor.execute_token(decision.action).await {
            Ok(o) => o,
            Err(e) => match self.recovery.handle(&e, 1) {
                RecoveryAction::Abort => return Err(e),
                _ => return self.fail_turn(turn, &e),
            },
        };
        self.last_action = Some(outcome.action);
        self.emit(TurnEvent::ActionExecuted {
            action: outcome.action,
            frame: outcome.frame,
        });

        // 7. 卡住升级
        let next_escalation = if outcome.stuck {
            self.stuck_streak += 1;
            let to = DecisionRole::escalation(self.stuck_streak);
            self.stuck_actions = self.executor.recent_actions(usize::MAX);
            self.executor.reset_stuck_detection();
            self.progress.stuck_events += 1;
            self.progress.escalations += 1;
            tracing::warn!(
                turn,
                "Agent appears stuck repeating '{}', escalating to {}",
                outcome.action,
                to
            );
            self.emit(TurnEvent::Stuck {
                action: outcome.action,
                escalate_to: to,
            });
            Some(to)
        } else {
            if new_cell {
                self.stuck_streak = 0;
            }
            None
        };

        // 8. 目标指令：非法槽位只拒绝指令，不影响回合
        let mut directive = decision.goal_directive.clone();
        if let Some(d) = &decision.goal_directive {
            match self.goals.apply_update(d) {
                Ok(change) => {
                    self.progress.goal_updates += 1;
                    self.emit(TurnEvent::GoalUpdated {
                        slot: change.slot.to_string(),
                        text: change.current,
                    });
                }
                Err(e) => {
                    tracing::warn!(turn, "Rejected goal update '{}': {}", d, e);
                    self.emit(TurnEvent::GoalRejected {
                        reason: e.to_string(),
                    });
                    directive = None;
                }
            }
        }

        // 9. 提交
        self.publish(SessionPhase::Committing);
        self.commit_exploration(&obs);
        let Decision {
            action, rationale, ..
        } = decision;
        self.history.append(
            TurnRecord::new(turn, obs.compact(), action, rationale)
                .with_directive(directive)
                .with_role(role),
        );
        self.progress.turns_completed += 1;
        self.consecutive_failures = 0;
        self.escalation = next_escalation;
        self.next_turn += 1;
        self.emit(TurnEvent::TurnCommitted { turn });

        // 10. 检查点
        if turn % self.settings.checkpoint_interval == 0 {
            self.checkpoint(CheckpointReason::Interval)?;
        }
        self.publish(SessionPhase::Idle);

        Ok(TurnOutcome::Committed {
            turn,
            action,
            role,
            stuck: outcome.stuck,
        })
    }

    /// 写一个检查点（以最后一个已提交回合为序号）；未配置存储时跳过
    pub fn checkpoint(&mut self, reason: CheckpointReason) -> Result<(), AgentError> {
        let Some(store) = self.store.clone() else {
            return Ok(());
        };
        self.publish(SessionPhase::Checkpointing);
        let turn = self.next_turn.saturating_sub(1);
        let mut progress = self.progress.clone();
        progress.last_checkpoint_turn = turn;

        let bundle = Checkpoint {
            manifest: CheckpointManifest {
                session_id: self.session_id,
                turn_index: turn,
                created_at: Utc::now(),
                reason,
            },
            emulator_state: self.emulator.capture_state()?,
            context: self.history.window().clone(),
            goals: self.goals.clone(),
            exploration: self.exploration.clone(),
            progress,
        };
        store.write(turn, &bundle)?;
        self.progress.last_checkpoint_turn = turn;
        tracing::info!("\n{}", self.progress.summary());
        self.emit(TurnEvent::CheckpointWritten { turn, reason });
        Ok(())
    }

    /// 请求决策；瞬时失败按 RecoveryEngine 的建议重试
    async fn decide(
        &self,
        collaborator: &dyn DecisionCollaborator,
        request: &mut DecisionRequest,
    ) -> Result<Decision, AgentError> {
        let limit = self.settings.decision_timeout;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match timeout(limit, collaborator.decide(&*request)).await {
                Ok(r) => r,
                Err(_) => Err(AgentError::DecisionTimeout(limit.as_millis() as u64)),
            };
            let err = match result {
                Ok(decision) => return Ok(decision),
                Err(e) => e,
            };
            match self.recovery.handle(&err, attempt) {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    tracing::warn!("Decision attempt {} failed ({}), retrying with strict format", attempt, err);
                    self.emit(TurnEvent::Recovery {
                        action: "retry_with_prompt".to_string(),
                        detail: err.to_string(),
                    });
                    request.reformulation = Some(prompt);
                }
                RecoveryAction::Retry => {
                    tracing::warn!("Decision attempt {} failed ({}), retrying", attempt, err);
                    self.emit(TurnEvent::Recovery {
                        action: "retry".to_string(),
                        detail: err.to_string(),
                    });
                }
                RecoveryAction::FailTurn | RecoveryAction::Abort => return Err(err),
            }
            if self.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
        }
    }

    fn fail_turn(&mut self, turn: u64, err: &AgentError) -> Result<TurnOutcome, AgentError> {
        self.progress.failed_turns += 1;
        self.consecutive_failures += 1;
        tracing::warn!(
            turn,
            consecutive = self.consecutive_failures,
            "Turn failed: {}",
            err
        );
        self.emit(TurnEvent::TurnFailed {
            turn,
            reason: err.to_string(),
        });
        if self.consecutive_failures > self.settings.max_consecutive_failures {
            return Err(AgentError::TooManyFailures(self.consecutive_failures));
        }
        self.publish_with(SessionPhase::Idle, Some(err.to_string()));
        Ok(TurnOutcome::Failed {
            turn,
            reason: err.to_string(),
        })
    }

    fn commit_exploration(&mut self, obs: &GameObservation) {
        if let Some(bounds) = obs.bounds {
            if self.exploration.bounds(&obs.location) != Some(bounds) {
                self.exploration.declare_bounds(&obs.location, bounds);
            }
        }
        self.exploration.mark_visited(&obs.location, obs.coordinate);
        if self.progress.see_location(&obs.location) {
            self.emit(TurnEvent::NewLocation {
                location: obs.location.clone(),
            });
        }
    }

    /// 状态文本 + 探索情况（已探索数、探索率、最近的前沿格子）
    fn describe_state(&self, obs: &GameObservation, new_cell: bool) -> String {
        let location = obs.location.as_str();
        let explored = self.exploration.visited_count(location) + usize::from(new_cell);
        let bounds = obs.bounds.or_else(|| self.exploration.bounds(location));

        let mut text = obs.description.trim_end().to_string();
        text.push_str("\n\n=== EXPLORATION ===\n");
        match bounds {
            Some(b) if b.total_cells() > 0 => text.push_str(&format!(
                "Explored {} of {} cells in {} ({:.1}%)\n",
                explored,
                b.total_cells(),
                location,
                explored as f64 * 100.0 / b.total_cells() as f64
            )),
            _ => text.push_str(&format!("Explored {} cells in {}\n", explored, location)),
        }
        text.push_str(&format!(
            "Locations discovered: {}\n",
            self.progress.locations_seen.len().max(self.exploration.location_count())
        ));
        if !new_cell {
            text.push_str("Current tile was already visited.\n");
        }

        let frontier: Vec<String> = self
            .exploration
            .frontier(location, obs.coordinate, self.settings.frontier_radius)
            .into_iter()
            .filter(|c| bounds.map_or(true, |b| b.contains(c)))
            .take(self.settings.frontier_preview)
            .map(|c| c.to_string())
            .collect();
        if frontier.is_empty() {
            text.push_str("No unexplored cells nearby.\n");
        } else {
            text.push_str(&format!("Nearest unexplored: {}\n", frontier.join(", ")));
        }
        text
    }

    fn ensure_running(&self) -> Result<(), AgentError> {
        if self.cancel.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn publish(&self, phase: SessionPhase) {
        self.publish_with(phase, None);
    }

    fn publish_error(&self, message: String) {
        self.publish_with(SessionPhase::Error, Some(message));
    }

    fn publish_with(&self, phase: SessionPhase, error_message: Option<String>) {
        let snapshot = SessionSnapshot {
            phase,
            next_turn: self.next_turn,
            role: self.escalation.unwrap_or_default(),
            location: self.position.as_ref().map(|(l, _)| l.clone()),
            coordinate: self.position.as_ref().map(|(_, c)| *c),
            goals: self.goals.current(),
            last_action: self.last_action,
            summaries: self.history.summaries().len(),
            recent_turns: self.history.recent().len(),
            locations_explored: self.exploration.location_count(),
            progress: self.progress.clone(),
            error_message,
        };
        self.state_tx.send_replace(snapshot);
    }
}
