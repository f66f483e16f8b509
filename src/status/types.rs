//! In-memory model of one agent's published status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::now_millis;

/// Recent actions kept in memory; older entries are dropped first.
pub const MAX_RECENT_ACTIONS: usize = 50;

/// Coarse agent state, rendered uppercase in status documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentState {
    #[default]
    Idle,
    Busy,
    Blocked,
    Error,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "IDLE",
            AgentState::Busy => "BUSY",
            AgentState::Blocked => "BLOCKED",
            AgentState::Error => "ERROR",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentState {
    type Err = String;

    /// Exact match only; documents always carry the uppercase form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(AgentState::Idle),
            "BUSY" => Ok(AgentState::Busy),
            "BLOCKED" => Ok(AgentState::Blocked),
            "ERROR" => Ok(AgentState::Error),
            other => Err(format!("unknown agent state `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentActivity {
    pub task: Option<String>,
    /// Percent complete, 0..=100.
    pub progress: u8,
    /// Ordered, without duplicates.
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentAction {
    pub timestamp: DateTime<Utc>,
    pub action: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub tasks_completed: u64,
    pub uptime_seconds: u64,
    pub error_count: u64,
}

/// Everything an agent publishes about itself.
///
/// The on-disk document is always regenerated from this record as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusRecord {
    pub agent_type: String,
    pub status: AgentState,
    pub last_updated: DateTime<Utc>,
    pub current_activity: CurrentActivity,
    /// Oldest first.
    pub recent_actions: Vec<RecentAction>,
    pub metrics: AgentMetrics,
}

impl AgentStatusRecord {
    /// A fresh IDLE record stamped now.
    pub fn new(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            status: AgentState::Idle,
            last_updated: now_millis(),
            current_activity: CurrentActivity::default(),
            recent_actions: Vec::new(),
            metrics: AgentMetrics::default(),
        }
    }

    /// Append an action stamped now, dropping the oldest past the cap.
    pub fn push_action(&mut self, action: impl Into<String>) {
        self.recent_actions.push(RecentAction {
            timestamp: now_millis(),
            action: action.into(),
        });
        self.trim_actions();
    }

    pub fn set_progress(&mut self, progress: u8) {
        self.current_activity.progress = progress.min(100);
    }

    /// Replace the dependency list, keeping first occurrences in order.
    ///
    /// Documents store the list comma-separated, so an entry containing commas
    /// is split into separate dependencies here.
    pub fn set_dependencies<I, S>(&mut self, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut deduped: Vec<String> = Vec::new();
        for entry in dependencies {
            let entry = entry.into();
            for dep in entry.split(',').map(str::trim) {
                if !dep.is_empty() && !deduped.iter().any(|d| d == dep) {
                    deduped.push(dep.to_string());
                }
            }
        }
        self.current_activity.dependencies = deduped;
    }

    /// Enforce the record's invariants after arbitrary edits.
    pub fn normalize(&mut self) {
        // Documents keep millisecond precision.
        self.last_updated = self.last_updated.trunc_subsecs(3);
        for action in &mut self.recent_actions {
            action.timestamp = action.timestamp.trunc_subsecs(3);
        }
        self.set_progress(self.current_activity.progress);
        let deps = std::mem::take(&mut self.current_activity.dependencies);
        self.set_dependencies(deps);
        self.trim_actions();
    }

    pub fn touch(&mut self) {
        self.last_updated = now_millis();
    }

    fn trim_actions(&mut self) {
        let len = self.recent_actions.len();
        if len > MAX_RECENT_ACTIONS {
            self.recent_actions.drain(..len - MAX_RECENT_ACTIONS);
        }
    }
}
