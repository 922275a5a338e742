//! 会话集成测试：SessionBuilder + MockLlmClient + SimulatedEmulator，检查点落在临时目录

use std::path::Path;
use std::sync::Arc;

use playbee::config::AppConfig;
use playbee::core::{AgentError, SessionBuilder, TurnEvent, TurnOrchestrator, TurnOutcome};
use playbee::decision::DecisionRole;
use playbee::emulator::SimulatedEmulator;
use playbee::llm::{LlmClient, MockLlmClient};
use playbee::memory::{CheckpointReason, CheckpointStore, FileCheckpointStore};
use playbee::tools::ActionToken;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn test_config(dir: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.app.data_dir = dir.to_path_buf();
    cfg.llm.provider = "mock".to_string();
    cfg.actions.frames_per_action = 1;
    cfg.actions.wait_frames = 1;
    cfg
}

fn reply(action: &str) -> String {
    format!("REASONING: Testing.\nACTION: {}\nGOAL_UPDATE: none", action)
}

fn build(cfg: AppConfig, llm: MockLlmClient) -> TurnOrchestrator {
    let llm: Arc<dyn LlmClient> = Arc::new(llm);
    SessionBuilder::new(cfg)
        .with_llm(llm)
        .with_simulated(Arc::new(SimulatedEmulator::pallet_demo()))
        .build()
        .unwrap()
}

fn latest_checkpoint(dir: &Path) -> playbee::memory::Checkpoint {
    FileCheckpointStore::new(dir.join("checkpoints"))
        .read_latest()
        .unwrap()
        .expect("checkpoint written")
}

#[tokio::test]
async fn test_mock_session_runs_and_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.progress.checkpoint_interval = 3;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut orch = SessionBuilder::new(cfg)
        .with_llm(Arc::new(MockLlmClient::new()))
        .with_events(tx)
        .build()
        .unwrap();

    let summary = orch.run(Some(6)).await.unwrap();
    assert_eq!(summary.attempted, 6);
    assert_eq!(summary.last_turn, 6);
    assert!(!summary.cancelled);
    assert_eq!(summary.progress.turns_completed, 6);

    let indices: Vec<u64> = orch.history().recent().iter().map(|t| t.index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5, 6]);
    assert!(orch.exploration().visited_count("pallet_town") >= 1);

    let cp = latest_checkpoint(dir.path());
    assert_eq!(cp.manifest.turn_index, 6);
    assert_eq!(cp.manifest.reason, CheckpointReason::Shutdown);
    assert_eq!(cp.context.recent_turns.len(), 6);

    let mut started = 0;
    let mut committed = 0;
    let mut interval_checkpoints = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            TurnEvent::TurnStarted { .. } => started += 1,
            TurnEvent::TurnCommitted { .. } => committed += 1,
            TurnEvent::CheckpointWritten {
                reason: CheckpointReason::Interval,
                ..
            } => interval_checkpoints += 1,
            _ => {}
        }
    }
    assert_eq!(started, 6);
    assert_eq!(committed, 6);
    assert_eq!(interval_checkpoints, 2);
}

#[tokio::test]
async fn test_two_malformed_replies_fail_turn_without_records() {
    let dir = tempfile::tempdir().unwrap();
    let llm = MockLlmClient::scripted(["I think I should go up", "UP!!"]);
    let mut orch = build(test_config(dir.path()), llm);

    let outcome = orch.run_turn().await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Failed { turn: 1, .. }));
    assert!(orch.history().recent().is_empty());
    assert_eq!(orch.next_turn(), 1);
    assert_eq!(orch.progress().failed_turns, 1);
    assert_eq!(orch.exploration().visited_count("pallet_town"), 0);

    // 失败后同一序号可以正常提交
    let outcome = orch.run_turn().await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Committed { turn: 1, .. }));
    assert_eq!(orch.next_turn(), 2);
}

#[tokio::test]
async fn test_malformed_then_valid_reply_commits() {
    let dir = tempfile::tempdir().unwrap();
    let llm = MockLlmClient::scripted(["go up please".to_string(), reply("up")]);
    let mut orch = build(test_config(dir.path()), llm);

    match orch.run_turn().await.unwrap() {
        TurnOutcome::Committed { turn, action, .. } => {
            assert_eq!(turn, 1);
            assert_eq!(action, ActionToken::Up);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(orch.history().recent().len(), 1);
}

#[tokio::test]
async fn test_repeated_action_escalates_for_one_turn() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.actions.stuck_threshold = 3;
    let llm = MockLlmClient::scripted([reply("a"), reply("a"), reply("a")]);
    let mut orch = build(cfg, llm);

    for _ in 0..2 {
        let outcome = orch.run_turn().await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Committed { stuck: false, .. }));
    }
    let outcome = orch.run_turn().await.unwrap();
    assert!(matches!(
        outcome,
        TurnOutcome::Committed {
            turn: 3,
            stuck: true,
            ..
        }
    ));
    assert_eq!(orch.pending_escalation(), Some(DecisionRole::Navigation));
    assert_eq!(orch.progress().stuck_events, 1);

    match orch.run_turn().await.unwrap() {
        TurnOutcome::Committed { turn, role, .. } => {
            assert_eq!(turn, 4);
            assert_eq!(role, DecisionRole::Navigation);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(orch.pending_escalation(), None);
    assert_eq!(
        orch.history().recent().last().map(|t| t.role),
        Some(DecisionRole::Navigation)
    );
}

#[tokio::test]
async fn test_goal_update_applied_and_invalid_slot_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let llm = MockLlmClient::scripted([
        "REASONING: Need the parcel.\nACTION: up\nGOAL_UPDATE: secondary: Pick up the parcel from the shop",
        "REASONING: Extra slot.\nACTION: up\nGOAL_UPDATE: quaternary: Something else",
    ]);
    let mut orch = build(test_config(dir.path()), llm);

    orch.run_turn().await.unwrap();
    assert_eq!(
        orch.goals().current().secondary.as_deref(),
        Some("Pick up the parcel from the shop")
    );
    assert!(orch.history().recent()[0].goal_directive.is_some());

    let before = orch.goals().current();
    let outcome = orch.run_turn().await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Committed { turn: 2, .. }));
    assert_eq!(orch.goals().current(), before);
    assert!(orch.history().recent()[1].goal_directive.is_none());
}

#[tokio::test]
async fn test_history_compacts_during_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.memory.max_context_turns = 4;
    cfg.memory.keep_recent_turns = 1;
    let mut orch = build(cfg, MockLlmClient::new());

    orch.run(Some(6)).await.unwrap();
    assert_eq!(orch.history().summaries().len(), 1);
    assert!(orch.history().summaries()[0].contains("mock summary"));
    let indices: Vec<u64> = orch.history().recent().iter().map(|t| t.index).collect();
    assert_eq!(indices, vec![4, 5, 6]);
    assert_eq!(orch.progress().compactions, 1);
}

#[tokio::test]
async fn test_resume_from_latest_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.progress.checkpoint_interval = 2;

    let mut first = build(cfg.clone(), MockLlmClient::new());
    let session = first.session_id();
    first.run(Some(5)).await.unwrap();
    let goals = first.goals().current();
    drop(first);

    let mut second = build(cfg, MockLlmClient::new());
    assert_eq!(second.session_id(), session);
    assert_eq!(second.next_turn(), 6);
    assert_eq!(second.history().recent().len(), 5);
    assert_eq!(second.goals().current(), goals);
    assert_eq!(second.progress().turns_completed, 5);

    let summary = second.run(Some(1)).await.unwrap();
    assert_eq!(summary.last_turn, 6);
}

#[tokio::test]
async fn test_emulator_failure_is_fatal_and_checkpointed() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let sim = Arc::new(SimulatedEmulator::pallet_demo().with_failure_after(3));
    let mut orch = SessionBuilder::new(cfg)
        .with_llm(Arc::new(MockLlmClient::new()))
        .with_simulated(sim)
        .build()
        .unwrap();

    let err = orch.run(Some(10)).await.unwrap_err();
    assert!(matches!(err, AgentError::Emulator(_)));
    assert_eq!(orch.next_turn(), 4);

    let cp = latest_checkpoint(dir.path());
    assert_eq!(cp.manifest.turn_index, 3);
    assert_eq!(cp.manifest.reason, CheckpointReason::Fatal);
}

#[tokio::test]
async fn test_cancel_stops_between_turns_with_final_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    let mut orch = SessionBuilder::new(test_config(dir.path()))
        .with_llm(Arc::new(MockLlmClient::new()))
        .with_cancel_token(token.clone())
        .build()
        .unwrap();

    orch.run_turn().await.unwrap();
    orch.run_turn().await.unwrap();
    token.cancel();

    let summary = orch.run(None).await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.attempted, 0);
    assert_eq!(summary.last_turn, 2);

    let cp = latest_checkpoint(dir.path());
    assert_eq!(cp.manifest.turn_index, 2);
    assert_eq!(cp.manifest.reason, CheckpointReason::Shutdown);
}

#[tokio::test]
async fn test_consecutive_failures_abort_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.progress.max_consecutive_failures = 1;
    let llm = MockLlmClient::scripted(["nope", "nope", "still nope", "still nope"]);
    let mut orch = build(cfg, llm);

    let err = orch.run(Some(10)).await.unwrap_err();
    assert!(matches!(err, AgentError::TooManyFailures(2)));
    assert!(orch.history().recent().is_empty());
    assert_eq!(orch.progress().failed_turns, 2);
}
