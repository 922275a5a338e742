//! 检查点持久化
//!
//! 每个检查点一个目录 `checkpoint_<turn>`：emulator.state（模拟器原始字节）、context.json、goals.json、
//! exploration.json、progress.json，最后写 manifest.json。先写临时目录再 rename，半写入的检查点不会被读到。

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::AgentError;
use crate::emulator::EmulatorSnapshot;
use crate::memory::{ContextWindow, ExplorationMap, GoalSet, ProgressCounters};

const MANIFEST: &str = "manifest.json";
const EMULATOR_STATE: &str = "emulator.state";
const DIR_PREFIX: &str = "checkpoint_";

/// 检查点触发原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    Interval,
    Shutdown,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub session_id: Uuid,
    pub turn_index: u64,
    pub created_at: DateTime<Utc>,
    pub reason: CheckpointReason,
}

/// 恢复会话所需的完整快照
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub manifest: CheckpointManifest,
    pub emulator_state: EmulatorSnapshot,
    pub context: ContextWindow,
    pub goals: GoalSet,
    pub exploration: ExplorationMap,
    pub progress: ProgressCounters,
}

/// 检查点存储：按回合写入、读取最新一份
pub trait CheckpointStore: Send + Sync {
    fn write(&self, turn_index: u64, bundle: &Checkpoint) -> Result<(), AgentError>;

    fn read_latest(&self) -> Result<Option<Checkpoint>, AgentError>;
}

/// 基于目录的检查点存储
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
    /// 保留最近几份；0 表示全部保留
    keep_last: usize,
}

impl FileCheckpointStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            keep_last: 0,
        }
    }

    pub fn with_keep_last(mut self, keep_last: usize) -> Self {
        self.keep_last = keep_last;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, turn_index: u64) -> PathBuf {
        self.root.join(format!("{}{:06}", DIR_PREFIX, turn_index))
    }

    /// 所有检查点目录，按回合升序
    fn list(&self) -> anyhow::Result<Vec<(u64, PathBuf)>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("reading {}", self.root.display()))?
        {
            let entry = entry?;
            let name = entry.file_name();
            let Some(turn) = name
                .to_str()
                .and_then(|n| n.strip_prefix(DIR_PREFIX))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            if entry.path().is_dir() {
                found.push((turn, entry.path()));
            }
        }
        found.sort_by_key(|(turn, _)| *turn);
        Ok(found)
    }

    fn write_inner(&self, turn_index: u64, bundle: &Checkpoint) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("creating {}", self.root.display()))?;
        let final_dir = self.dir_for(turn_index);
        let tmp_dir = self.root.join(format!(".{}{:06}.tmp", DIR_PREFIX, turn_index));
        if tmp_dir.exists() {
            std::fs::remove_dir_all(&tmp_dir)?;
        }
        std::fs::create_dir_all(&tmp_dir)?;

        std::fs::write(tmp_dir.join(EMULATOR_STATE), &bundle.emulator_state.0)
            .context("writing emulator state")?;
        write_json(&tmp_dir.join("context.json"), &bundle.context)?;
        write_json(&tmp_dir.join("goals.json"), &bundle.goals)?;
        write_json(&tmp_dir.join("exploration.json"), &bundle.exploration)?;
        write_json(&tmp_dir.join("progress.json"), &bundle.progress)?;
        write_json(&tmp_dir.join(MANIFEST), &bundle.manifest)?;

        // 同一回合的检查点（如间隔检查点后紧接着关闭）以新的为准
        if final_dir.exists() {
            std::fs::remove_dir_all(&final_dir)?;
        }
        std::fs::rename(&tmp_dir, &final_dir)
            .with_context(|| format!("publishing {}", final_dir.display()))?;
        Ok(final_dir)
    }

    fn read_dir(&self, dir: &Path) -> anyhow::Result<Checkpoint> {
        let manifest: CheckpointManifest = read_json(&dir.join(MANIFEST))?;
        let emulator_state = std::fs::read(dir.join(EMULATOR_STATE)).context("reading emulator state")?;
        Ok(Checkpoint {
            manifest,
            emulator_state: EmulatorSnapshot(emulator_state),
            context: read_json(&dir.join("context.json"))?,
            goals: read_json(&dir.join("goals.json"))?,
            exploration: read_json(&dir.join("exploration.json"))?,
            progress: read_json(&dir.join("progress.json"))?,
        })
    }

    fn prune(&self) -> anyhow::Result<()> {
        if self.keep_last == 0 {
            return Ok(());
        }
        let all = self.list()?;
        if all.len() <= self.keep_last {
            return Ok(());
        }
        for (turn, dir) in &all[..all.len() - self.keep_last] {
            tracing::debug!(turn, "pruning old checkpoint");
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn write(&self, turn_index: u64, bundle: &Checkpoint) -> Result<(), AgentError> {
        let dir = self
            .write_inner(turn_index, bundle)
            .map_err(|e| AgentError::Checkpoint(format!("{:#}", e)))?;
        tracing::info!("Checkpoint saved to {}", dir.display());
        if let Err(e) = self.prune() {
            tracing::warn!("Failed to prune old checkpoints: {:#}", e);
        }
        Ok(())
    }

    /// 从最新的目录开始读取；损坏的检查点跳过并尝试更早的一份
    fn read_latest(&self) -> Result<Option<Checkpoint>, AgentError> {
        let all = self
            .list()
            .map_err(|e| AgentError::Checkpoint(format!("{:#}", e)))?;
        for (turn, dir) in all.iter().rev() {
            match self.read_dir(dir) {
                Ok(cp) => return Ok(Some(cp)),
                Err(e) => tracing::warn!(turn, "Skipping unreadable checkpoint: {:#}", e),
            }
        }
        Ok(None)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let data = serde_json::to_string_pretty(value)?;
    std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}
