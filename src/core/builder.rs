//! 会话构建器：统一的会话初始化逻辑
//!
//! 从 AppConfig 组装 LLM、决策路径、压缩协作者、动作执行器与检查点存储；
//! 测试与二进制都走这里，只替换需要替换的协作者。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, OrchestratorSettings, TurnEvent, TurnOrchestrator};
use crate::decision::{llm_decision_paths, DecisionPaths, DecisionRole, LlmSummarizer};
use crate::emulator::{Emulator, SimulatedEmulator, StateObserver};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{
    CheckpointStore, CompactionCollaborator, CompactionPolicy, FileCheckpointStore, GoalDirective,
    GoalSet, TurnHistory,
};
use crate::tools::ActionExecutor;

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / DeepSeek / Mock）；model_override 用于按角色换模型
pub fn create_llm_from_config(cfg: &AppConfig, model_override: Option<&str>) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let model = model_override.unwrap_or(&cfg.llm.model);

    let client = match provider.as_str() {
        "mock" => None,
        "deepseek" => std::env::var("DEEPSEEK_API_KEY").ok().map(|key| {
            let base = cfg
                .llm
                .base_url
                .as_deref()
                .unwrap_or("https://api.deepseek.com/v1");
            tracing::info!("Using DeepSeek LLM ({})", model);
            OpenAiClient::new(Some(base), model, Some(key.as_str()))
        }),
        _ => std::env::var("OPENAI_API_KEY").ok().map(|key| {
            tracing::info!("Using OpenAI-compatible LLM ({})", model);
            OpenAiClient::new(cfg.llm.base_url.as_deref(), model, Some(key.as_str()))
        }),
    };

    match client {
        Some(c) => match cfg.llm.temperature {
            Some(t) => Arc::new(c.with_temperature(t)),
            None => Arc::new(c),
        },
        None => {
            tracing::warn!("No API key set or provider is mock, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}

/// 会话构建器
pub struct SessionBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    emulator: Option<(Arc<dyn Emulator>, Arc<dyn StateObserver>)>,
    paths: Option<DecisionPaths>,
    compactor: Option<Arc<dyn CompactionCollaborator>>,
    store: Option<Arc<dyn CheckpointStore>>,
    cancel: Option<CancellationToken>,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl SessionBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            emulator: None,
            paths: None,
            compactor: None,
            store: None,
            cancel: None,
            events: None,
        }
    }

    /// 所有角色与压缩共用的 LLM（不设置时按配置创建）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_emulator(mut self, emulator: Arc<dyn Emulator>, observer: Arc<dyn StateObserver>) -> Self {
        self.emulator = Some((emulator, observer));
        self
    }

    /// 同一个对象既是模拟器也是观测器
    pub fn with_simulated(self, sim: Arc<SimulatedEmulator>) -> Self {
        let emulator: Arc<dyn Emulator> = sim.clone();
        self.with_emulator(emulator, sim)
    }

    pub fn with_decision_paths(mut self, paths: DecisionPaths) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn with_compactor(mut self, compactor: Arc<dyn CompactionCollaborator>) -> Self {
        self.compactor = Some(compactor);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn build_decision_paths(&self, llm: &Arc<dyn LlmClient>) -> DecisionPaths {
        let shared = self.llm.is_some();
        llm_decision_paths(Arc::clone(llm), |role: DecisionRole| {
            if shared {
                return None;
            }
            self.config
                .llm
                .roles
                .get(role.as_str())
                .map(|model| create_llm_from_config(&self.config, Some(model.as_str())))
        })
    }

    /// 初始目标通过 apply_update 写入，保证出现在目标历史中
    fn initial_goals(&self) -> Result<GoalSet, AgentError> {
        let mut goals = GoalSet::new();
        if let Some(primary) = self.config.goals.primary_goal.as_deref() {
            if !primary.trim().is_empty() {
                goals.apply_update(&GoalDirective::set("primary", primary))?;
            }
        }
        Ok(goals)
    }

    /// 校验配置并组装编排器；app.resume 为 true 时从最新检查点恢复
    pub fn build(self) -> Result<TurnOrchestrator, AgentError> {
        self.config.validate()?;
        let cfg = &self.config;

        let llm = self
            .llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(cfg, None));
        let paths = match &self.paths {
            Some(p) => p.clone(),
            None => self.build_decision_paths(&llm),
        };
        let compactor = self
            .compactor
            .clone()
            .unwrap_or_else(|| Arc::new(LlmSummarizer::new(Arc::clone(&llm))));

        let (emulator, observer) = match &self.emulator {
            Some((e, o)) => (Arc::clone(e), Arc::clone(o)),
            None => {
                tracing::info!("No emulator attached, using simulated grid world");
                let sim = Arc::new(SimulatedEmulator::pallet_demo());
                let e: Arc<dyn Emulator> = sim.clone();
                let o: Arc<dyn StateObserver> = sim;
                (e, o)
            }
        };

        let policy = CompactionPolicy::new(cfg.memory.max_context_turns, cfg.memory.keep_recent_turns)?;
        let history = TurnHistory::new(policy, compactor).with_timeout(cfg.decision_timeout());
        let executor = ActionExecutor::new(
            Arc::clone(&emulator),
            cfg.actions.stuck_threshold,
            cfg.action_timeout(),
        )
        .with_frames(cfg.actions.frames_per_action, cfg.actions.wait_frames);

        let store = self.store.clone().unwrap_or_else(|| {
            Arc::new(
                FileCheckpointStore::new(cfg.checkpoint_dir())
                    .with_keep_last(cfg.progress.keep_checkpoints),
            )
        });

        let mut orchestrator = TurnOrchestrator::new(
            emulator,
            observer,
            history,
            executor,
            paths,
            OrchestratorSettings::from_config(cfg),
        )
        .with_goals(self.initial_goals()?)
        .with_store(store);
        if let Some(token) = self.cancel.clone() {
            orchestrator = orchestrator.with_cancel_token(token);
        }
        if let Some(tx) = self.events.clone() {
            orchestrator = orchestrator.with_events(tx);
        }

        if cfg.app.resume {
            match orchestrator.resume_latest()? {
                Some(turn) => tracing::info!("Resuming after turn {}", turn),
                None => tracing::info!("No checkpoint found, starting a new session"),
            }
        }
        Ok(orchestrator)
    }
}
