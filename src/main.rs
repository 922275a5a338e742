//! PlayBee - 回合制游戏智能体
//!
//! 入口：初始化日志、加载配置（可选第一个参数为配置文件路径）、构建会话并运行回合循环。
//! Ctrl+C / SIGTERM 在当前步骤结束后停止，并写最后一个检查点。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use playbee::config::load_config;
use playbee::core::{SessionBuilder, SessionPhase, ShutdownManager, ShutdownReason};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    playbee::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    std::fs::create_dir_all(&cfg.app.data_dir)
        .with_context(|| format!("Failed to create {}", cfg.app.data_dir.display()))?;
    let max_turns = cfg.app.max_turns;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut orchestrator = SessionBuilder::new(cfg)
        .with_cancel_token(shutdown.token())
        .with_events(event_tx)
        .build()
        .context("Failed to build session")?;

    // 快照监控：每个回合结束时打一行状态
    let mut state_rx = orchestrator.subscribe();
    let monitor = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let snapshot = state_rx.borrow_and_update().clone();
            if snapshot.phase == SessionPhase::Idle {
                tracing::info!("{}", snapshot.status_line());
            }
        }
    });

    // 过程事件以 JSON 输出到 debug 日志
    let events = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                tracing::debug!(event = %json, "turn event");
            }
        }
    });

    let result = orchestrator.run(max_turns).await;
    drop(orchestrator);
    let _ = monitor.await;
    let _ = events.await;

    match result {
        Ok(summary) => {
            tracing::info!(
                "Session finished: {} turns attempted, last turn {}, cancelled: {}",
                summary.attempted,
                summary.last_turn,
                summary.cancelled
            );
            tracing::info!("\n{}", summary.progress.summary());
            Ok(())
        }
        Err(e) => {
            shutdown.shutdown(ShutdownReason::FatalError(e.to_string()));
            Err(e).context("Session aborted")
        }
    }
}
