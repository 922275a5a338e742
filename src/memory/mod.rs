//! 记忆层：回合历史（上下文窗口 + 压缩）、探索记忆、目标层级、进度计数与检查点持久化

pub mod exploration;
pub mod goals;
pub mod persistence;
pub mod progress;
pub mod turn_history;

pub use exploration::{Coord, ExplorationMap, MapBounds};
pub use goals::{GoalChange, GoalDirective, GoalSet, GoalSlot, GoalSlots, GoalValue};
pub use persistence::{
    Checkpoint, CheckpointManifest, CheckpointReason, CheckpointStore, FileCheckpointStore,
};
pub use progress::ProgressCounters;
pub use turn_history::{
    CompactionCollaborator, CompactionOutcome, CompactionPolicy, ContextWindow, TurnHistory,
    TurnRecord,
};
