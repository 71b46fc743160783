//! Session and Checkpoint types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    PausedManual,
    PausedNoAgents,
    PausedError,
    Completed,
    Aborted,
}

impl SessionStatus {
    pub fn is_paused(&self) -> bool {
        matches!(
            self,
            SessionStatus::PausedManual | SessionStatus::PausedNoAgents | SessionStatus::PausedError
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Aborted)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub tasks_created: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_completed_task: Option<Uuid>,
    pub pending_tasks: Vec<Uuid>,
    pub in_progress_tasks: Vec<Uuid>,
    pub cycle_started_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self {
            last_completed_task: None,
            pending_tasks: Vec::new(),
            in_progress_tasks: Vec::new(),
            cycle_started_at: Utc::now(),
        }
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub goal: String,
    pub session_id: Uuid,
    pub project_path: String,
    pub status: SessionStatus,
    pub current_cycle: u32,
    pub max_cycles: u32,
    pub branch: String,
    pub checkpoint: Checkpoint,
    pub stats: SessionStats,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(goal: impl Into<String>, project_path: impl Into<String>, max_cycles: u32) -> Self {
        let session_id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            goal: goal.into(),
            session_id,
            project_path: project_path.into(),
            status: SessionStatus::Running,
            current_cycle: 0,
            max_cycles,
            branch: format!("orbit/session-{session_id}"),
            checkpoint: Checkpoint::new(),
            stats: SessionStats::default(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Completed,
    MaxCyclesReached,
    JudgeAbort,
    FatalError,
}

/// The final result handed back to the Orchestrator's caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResult {
    pub status: SessionStatus,
    pub total_cycles: u32,
    pub tasks_created: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub duration_secs: f64,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_running_with_zeroed_cycle() {
        let session = Session::new("goal", "/tmp/proj", 20);
        assert_eq!(session.current_cycle, 0);
        assert_eq!(session.status, SessionStatus::Running);
        assert!(session.branch.contains(&session.session_id.to_string()));
    }

    #[test]
    fn paused_statuses_are_not_terminal() {
        assert!(SessionStatus::PausedManual.is_paused());
        assert!(!SessionStatus::PausedManual.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(!SessionStatus::Completed.is_paused());
    }
}
