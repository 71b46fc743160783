//! Task model and the Task Store.
//!
//! The store holds the ordered task list and enforces the status
//! transition graph. Unlike the DAG-scheduled, Postgres-backed task table
//! this engine's ancestor used, task readiness here does not depend on
//! inter-task dependencies -- the Planner is responsible for sequencing
//! work across cycles. The four statuses (`pending`, `in_progress`,
//! `completed`, `failed`) form a much smaller graph than a full
//! pending/assigned/running/checking/passed/failed/escalated lifecycle.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    Completed,
    Failed,
    Timeout,
    RateLimited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub category: Category,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    pub agent: String,
    pub output_snippet: String,
}

const OUTPUT_SNIPPET_MAX_BYTES: usize = 2048;

impl ErrorInfo {
    pub fn new(category: Category, message: impl Into<String>, agent: impl Into<String>, output: &str) -> Self {
        Self {
            category,
            message: message.into(),
            occurred_at: Utc::now(),
            agent: agent.into(),
            output_snippet: truncate_snippet(output, OUTPUT_SNIPPET_MAX_BYTES),
        }
    }
}

fn truncate_snippet(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_owned();
    truncated.push_str("...");
    truncated
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAttempt {
    pub agent_kind: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result: AttemptResult,
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub assigned_agent: Option<String>,
    pub worker_id: Option<String>,
    pub files: Vec<String>,
    pub needs_web_search: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<ErrorInfo>,
    pub agent_history: Vec<AgentAttempt>,
}

impl Task {
    fn new(
        title: String,
        description: String,
        created_by: String,
        files: Vec<String>,
        max_attempts: u32,
        needs_web_search: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            description,
            status: TaskStatus::Pending,
            assigned_agent: None,
            worker_id: None,
            files,
            needs_web_search,
            created_by,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempts: 0,
            max_attempts,
            last_error: None,
            agent_history: Vec::new(),
        }
    }
}

/// Ordered collection of tasks, with serialized mutation.
///
/// A single in-process mutex is sufficient serialization: exactly one
/// engine process runs against a project's state directory at a time, so
/// there is no cross-process contention to arbitrate, only cross-worker
/// contention within this process.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: Mutex<Vec<Task>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
        }
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_task(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
        created_by: impl Into<String>,
        files: Vec<String>,
        max_attempts: u32,
        needs_web_search: bool,
    ) -> Task {
        let task = Task::new(
            title.into(),
            description.into(),
            created_by.into(),
            files,
            max_attempts,
            needs_web_search,
        );
        tracing::debug!(task_id = %task.id, title = %task.title, "created task");
        task
    }

    /// Append a pre-built task to the store.
    pub fn add(&self, task: Task) {
        let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        guard.push(task);
    }

    /// Claim the task at the front of the pending list (REDESIGNED: see
    /// design notes -- this replaces a worker-ordinal `k mod n` selection
    /// with an atomic pop-front, which is always distinct regardless of
    /// how many workers run relative to the pending count).
    ///
    /// The agent kind is not yet known at claim time (the pool picks it
    /// once the worker is ready to dispatch); `assigned_agent` is set
    /// later by `complete`/`record_error` once the real kind is known.
    pub fn claim(&self, worker_id: &str) -> Option<Task> {
        let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let idx = guard.iter().position(|t| t.status == TaskStatus::Pending)?;
        let task = &mut guard[idx];
        task.status = TaskStatus::InProgress;
        task.worker_id = Some(worker_id.to_string());
        task.started_at = Some(Utc::now());
        task.attempts += 1;
        tracing::info!(task_id = %task.id, worker_id, attempt = task.attempts, "claimed task");
        Some(task.clone())
    }

    pub fn complete(&self, task_id: Uuid, agent_kind: &str) {
        let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = guard.iter_mut().find(|t| t.id == task_id) {
            task.status = TaskStatus::Completed;
            task.completed_at = Some(Utc::now());
            task.assigned_agent = Some(agent_kind.to_string());
            push_attempt(task, agent_kind, AttemptResult::Completed, None);
            tracing::info!(task_id = %task.id, agent_kind, "task completed");
        }
    }

    pub fn record_error(&self, task_id: Uuid, agent_kind: &str, error: ErrorInfo) {
        let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = guard.iter_mut().find(|t| t.id == task_id) {
            let result = match error.category {
                Category::RateLimit => AttemptResult::RateLimited,
                Category::Timeout => AttemptResult::Timeout,
                _ => AttemptResult::Failed,
            };
            task.assigned_agent = Some(agent_kind.to_string());
            push_attempt(task, agent_kind, result, Some(error.clone()));
            task.last_error = Some(error);
        }
    }

    pub fn release(&self, task_id: Uuid) {
        let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = guard.iter_mut().find(|t| t.id == task_id) {
            task.status = TaskStatus::Pending;
            task.assigned_agent = None;
            task.worker_id = None;
            tracing::warn!(task_id = %task.id, "released task back to pending");
        }
    }

    pub fn mark_failed(&self, task_id: Uuid) {
        let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = guard.iter_mut().find(|t| t.id == task_id) {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(Utc::now());
            tracing::warn!(task_id = %task.id, "task marked failed (terminal)");
        }
    }

    /// Release all `in_progress` tasks back to `pending`. Called at cycle
    /// boundaries and on resume as a safety net against crashed workers.
    /// Idempotent: calling this with no in-progress tasks is a no-op.
    pub fn release_stuck(&self) -> usize {
        let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut count = 0;
        for task in guard.iter_mut() {
            if task.status == TaskStatus::InProgress {
                task.status = TaskStatus::Pending;
                task.assigned_agent = None;
                task.worker_id = None;
                count += 1;
            }
        }
        if count > 0 {
            tracing::info!(count, "released stuck in-progress tasks");
        }
        count
    }

    pub fn get(&self, task_id: Uuid) -> Option<Task> {
        let guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        guard.iter().find(|t| t.id == task_id).cloned()
    }

    pub fn counts(&self) -> TaskCounts {
        let guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut counts = TaskCounts::default();
        for task in guard.iter() {
            counts.total += 1;
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

fn push_attempt(task: &mut Task, agent_kind: &str, result: AttemptResult, error: Option<ErrorInfo>) {
    if let Some(last) = task
        .agent_history
        .iter_mut()
        .rev()
        .find(|a| a.ended_at.is_none() && a.agent_kind == agent_kind)
    {
        last.ended_at = Some(Utc::now());
        last.result = result;
        last.error = error;
    } else {
        task.agent_history.push(AgentAttempt {
            agent_kind: agent_kind.to_string(),
            started_at: task.started_at.unwrap_or_else(Utc::now),
            ended_at: Some(Utc::now()),
            result,
            error,
        });
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_task(store: &TaskStore) -> Task {
        let task = store.create_task("t", "d", "planner", vec![], 3, false);
        store.add(task.clone());
        task
    }

    #[test]
    fn claim_returns_none_on_empty_store() {
        let store = TaskStore::new();
        assert!(store.claim("w1").is_none());
    }

    #[test]
    fn claim_pops_front_and_is_distinct_for_concurrent_workers() {
        let store = TaskStore::new();
        let t1 = add_task(&store);
        let t2 = add_task(&store);

        let c1 = store.claim("w1").unwrap();
        let c2 = store.claim("w2").unwrap();

        assert_eq!(c1.id, t1.id);
        assert_eq!(c2.id, t2.id);
        assert_ne!(c1.id, c2.id);
        assert!(store.claim("w3").is_none());
    }

    #[test]
    fn claim_more_workers_than_tasks_never_duplicates() {
        let store = TaskStore::new();
        add_task(&store);
        let mut claimed = Vec::new();
        for i in 0..5 {
            if let Some(t) = store.claim(&format!("w{i}")) {
                claimed.push(t.id);
            }
        }
        assert_eq!(claimed.len(), 1, "only one task should ever be claimed");
    }

    #[test]
    fn attempts_is_monotonic_across_release_and_reclaim() {
        let store = TaskStore::new();
        let t = add_task(&store);
        let claimed = store.claim("w1").unwrap();
        assert_eq!(claimed.attempts, 1);
        store.release(t.id);
        let reclaimed = store.claim("w2").unwrap();
        assert_eq!(reclaimed.attempts, 2);
    }

    #[test]
    fn completed_task_is_terminal_and_not_reclaimed() {
        let store = TaskStore::new();
        let t = add_task(&store);
        store.claim("w1").unwrap();
        store.complete(t.id, "kind");
        assert!(store.claim("w2").is_none());
        assert_eq!(store.get(t.id).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn release_stuck_moves_in_progress_to_pending_and_is_idempotent() {
        let store = TaskStore::new();
        let t = add_task(&store);
        store.claim("w1").unwrap();
        assert_eq!(store.release_stuck(), 1);
        assert_eq!(store.get(t.id).unwrap().status, TaskStatus::Pending);
        assert_eq!(store.release_stuck(), 0);
    }

    #[test]
    fn record_error_sets_last_error_and_appends_history() {
        let store = TaskStore::new();
        let t = add_task(&store);
        store.claim("w1").unwrap();
        let err = ErrorInfo::new(Category::Timeout, "timed out", "kind", "process timed out");
        store.record_error(t.id, "kind", err);
        let updated = store.get(t.id).unwrap();
        assert!(updated.last_error.is_some());
        assert_eq!(updated.agent_history.len(), 1);
        assert_eq!(updated.agent_history[0].result, AttemptResult::Timeout);
    }

    #[test]
    fn counts_reflect_status_distribution() {
        let store = TaskStore::new();
        let t1 = add_task(&store);
        add_task(&store);
        store.claim("w1").unwrap();
        store.complete(t1.id, "kind");
        let counts = store.counts();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.pending, 1);
    }
}
