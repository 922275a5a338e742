//! 进度计数器：回合、失败、卡住、升级、压缩、检查点
//!
//! 随检查点一起持久化，恢复后继续累加。

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub turns_completed: u64,
    pub failed_turns: u64,
    pub stuck_events: u64,
    pub escalations: u64,
    pub compactions: u64,
    pub goal_updates: u64,
    pub last_checkpoint_turn: u64,
    #[serde(default)]
    pub locations_seen: BTreeSet<String>,
    pub started_at: DateTime<Utc>,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self {
            turns_completed: 0,
            failed_turns: 0,
            stuck_events: 0,
            escalations: 0,
            compactions: 0,
            goal_updates: 0,
            last_checkpoint_turn: 0,
            locations_seen: BTreeSet::new(),
            started_at: Utc::now(),
        }
    }
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录进入的地点；首次进入返回 true
    pub fn see_location(&mut self, location: &str) -> bool {
        let first = self.locations_seen.insert(location.to_string());
        if first {
            tracing::info!("NEW LOCATION: {} (turn {})", location, self.turns_completed + 1);
        }
        first
    }

    pub fn summary(&self) -> String {
        let elapsed = Utc::now() - self.started_at;
        let hours = elapsed.num_seconds() as f64 / 3600.0;
        format!(
            "=== PROGRESS SUMMARY ===\n\
             Time Elapsed: {:.1} hours\n\
             Turns Completed: {}\n\
             Failed Turns: {}\n\
             Stuck Events: {} (escalations: {})\n\
             Compactions: {}\n\
             Goal Updates: {}\n\
             Locations Seen: {}\n",
            hours,
            self.turns_completed,
            self.failed_turns,
            self.stuck_events,
            self.escalations,
            self.compactions,
            self.goal_updates,
            self.locations_seen.len(),
        )
    }
}
