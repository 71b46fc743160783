//! Orchestrator: the top-level Planner / Workers / Judge cycle loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::agent_pool::AgentPool;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{Event, EventBus, WakeupController};
use crate::executor::manager::ExecutorManager;
use crate::executor::{self, CompletionSignal};
use crate::judge::{Decision, JudgeRunner};
use crate::planner::PlannerRunner;
use crate::session::{EngineResult, Session, SessionStatus};
use crate::store::{ensure_gitignore_excludes, PoolSnapshot, StateDir};
use crate::task::TaskStore;
use crate::vc::{ShellGit, VersionControl};

pub struct Orchestrator {
    project_path: PathBuf,
    config: EngineConfig,
    git: Arc<ShellGit>,
    executor: Arc<ExecutorManager>,
    pool: Arc<AgentPool>,
    tasks: Arc<TaskStore>,
    events: Arc<EventBus>,
    wakeup: Arc<WakeupController>,
    state: StateDir,
}

impl Orchestrator {
    pub fn new(project_path: impl Into<PathBuf>, config: EngineConfig, specs: Vec<executor::AgentSpec>) -> Result<Self> {
        let project_path = project_path.into();
        let git = ShellGit::new(&project_path)?;
        let state = StateDir::new(&project_path, &config.state_dir);
        let executor = ExecutorManager::new(specs, state.prompts_dir());
        let kinds: Vec<(&str, f64)> = config
            .cooldown_minutes
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        let mut fallback_order: Vec<String> = config.cooldown_minutes.keys().cloned().collect();
        fallback_order.sort();
        let pool_config = crate::agent_pool::PoolConfig {
            fallback_order,
            max_consecutive_failures: config.max_consecutive_failures,
            cooldown_multiplier: config.cooldown_multiplier,
            min_available_agents: config.min_available_agents,
        };
        let pool = Arc::new(AgentPool::new(&kinds, pool_config));
        let events = Arc::new(EventBus::new());
        let wakeup = WakeupController::new(config.wakeup_threshold);
        wakeup.attach(&events);

        Ok(Self {
            project_path,
            config,
            git: Arc::new(git),
            executor: Arc::new(executor),
            pool,
            tasks: Arc::new(TaskStore::new()),
            events,
            wakeup,
            state,
        })
    }

    /// Check version control and agent-availability preconditions, failing
    /// fast if unmet.
    fn initialize(&self) -> Result<()> {
        if !self.project_path.join(".git").exists() {
            return Err(EngineError::VersionControlPrecondition("working directory is not a git repository".to_string()).into());
        }
        let available = self.executor.detect_available(&self.pool);
        if available.len() < self.config.min_available_agents as usize {
            return Err(EngineError::NoAgentsAvailable.into());
        }
        self.state.ensure_dirs()?;
        Ok(())
    }

    /// Start a fresh session against `goal` and run to a terminal state.
    pub async fn start(&self, goal: &str) -> Result<EngineResult> {
        self.initialize()?;

        let mut session = Session::new(goal, self.project_path.to_string_lossy(), self.config.max_cycles);

        self.git.create_or_switch_branch(&session.branch)?;
        if ensure_gitignore_excludes(&self.project_path, &self.config.state_dir)? {
            self.git.stage_files(&[PathBuf::from(".gitignore")])?;
            if let Err(e) = self.git.commit(&format!("chore: ignore {}", self.config.state_dir)) {
                tracing::debug!(error = %e, "nothing to commit for .gitignore amendment");
            }
        }

        self.state.save_session(&session)?;
        self.state.save_tasks(&self.tasks)?;
        self.state.save_pool(&PoolSnapshot::from_pool(&self.pool))?;

        self.run_cycles(&mut session).await
    }

    /// Reopen an existing state directory and continue from `current_cycle`.
    pub async fn resume(&self) -> Result<EngineResult> {
        if !self.state.exists() {
            return Err(EngineError::Config(format!("no existing session state at {}", self.state.path().display())));
        }
        self.initialize()?;

        let mut session = self.state.load_session().context("failed to reload session state")?;
        for task in self.state.load_tasks().context("failed to reload tasks")? {
            self.tasks.add(task);
        }
        let pool_snapshot = self.state.load_pool().context("failed to reload agent pool")?;
        let loaded_pool = pool_snapshot.into_pool();
        for state in loaded_pool.snapshot() {
            if state.status == crate::agent_pool::Status::RateLimited {
                if let Some(available_at) = state.available_at {
                    if available_at <= chrono::Utc::now() {
                        self.pool.mark_available(&state.kind);
                    }
                }
            }
        }

        self.tasks.release_stuck();
        self.run_cycles(&mut session).await
    }

    /// Refresh `session.checkpoint` from the current task list at the top
    /// of a cycle: the pending/in-progress id sets and the most recently
    /// completed task, per SPEC_FULL.md's "updated at cycle boundaries."
    fn refresh_checkpoint(&self, session: &mut Session) {
        let snapshot = self.tasks.snapshot();
        session.checkpoint.cycle_started_at = chrono::Utc::now();
        session.checkpoint.pending_tasks = snapshot
            .iter()
            .filter(|t| t.status == crate::task::TaskStatus::Pending)
            .map(|t| t.id)
            .collect();
        session.checkpoint.in_progress_tasks = snapshot
            .iter()
            .filter(|t| t.status == crate::task::TaskStatus::InProgress)
            .map(|t| t.id)
            .collect();
        session.checkpoint.last_completed_task = snapshot
            .iter()
            .filter(|t| t.status == crate::task::TaskStatus::Completed)
            .max_by_key(|t| t.completed_at)
            .map(|t| t.id);
    }

    async fn run_cycles(&self, session: &mut Session) -> Result<EngineResult> {
        let start = std::time::Instant::now();
        let goal = session.goal.clone();

        while session.current_cycle < session.max_cycles && session.status == SessionStatus::Running {
            session.touch();
            let reloaded = self.state.load_session().unwrap_or_else(|_| session.clone());
            if reloaded.status.is_paused() {
                session.status = reloaded.status;
                break;
            }

            let released = self.tasks.release_stuck();
            if released > 0 {
                tracing::info!(released, cycle = session.current_cycle, "released stuck tasks at cycle boundary");
            }

            self.refresh_checkpoint(session);

            let cycle = session.current_cycle;
            PlannerRunner::new(&self.executor)
                .run(&self.pool, &self.tasks, &self.project_path, &goal, cycle, session.max_cycles)
                .await;

            self.execute_all_pending(&goal).await;

            if self.wakeup.take_pending() {
                tracing::info!(cycle, "planner wakeup consumed, replanning mid-cycle");
                let additional = PlannerRunner::new(&self.executor)
                    .run(&self.pool, &self.tasks, &self.project_path, &goal, cycle, session.max_cycles)
                    .await;
                if !additional.is_empty() {
                    self.execute_all_pending(&goal).await;
                }
            }

            let counts = self.tasks.counts();
            session.stats.tasks_created = counts.total as u64;
            session.stats.tasks_completed = counts.completed as u64;
            session.stats.tasks_failed = counts.failed as u64;

            let judgement = JudgeRunner::new(&self.executor)
                .run(&self.pool, &self.tasks, &self.project_path, &goal, cycle, session.max_cycles)
                .await;
            tracing::info!(cycle, decision = ?judgement.decision, reasoning = %judgement.reasoning, "judge decided");

            session.current_cycle += 1;
            session.touch();
            self.state.save_session(session)?;
            self.state.save_tasks(&self.tasks)?;
            self.state.save_pool(&PoolSnapshot::from_pool(&self.pool))?;

            match judgement.decision {
                Decision::Complete => {
                    session.status = SessionStatus::Completed;
                    break;
                }
                Decision::Abort => {
                    session.status = SessionStatus::Aborted;
                    break;
                }
                Decision::Continue => {}
            }
        }

        if session.status == SessionStatus::Running {
            session.status = SessionStatus::Aborted;
            tracing::warn!("cycle budget exhausted without a terminal judge decision");
        }

        session.touch();
        self.state.save_session(session)?;

        if let Err(e) = self.git.commit("chore: final orchestrator state") {
            tracing::debug!(error = %e, "nothing to commit at session end");
        }

        let counts = self.tasks.counts();
        Ok(EngineResult {
            status: session.status,
            total_cycles: session.current_cycle,
            tasks_created: counts.total as u64,
            tasks_completed: counts.completed as u64,
            tasks_failed: counts.failed as u64,
            duration_secs: start.elapsed().as_secs_f64(),
            message: format!("session ended with status {:?}", session.status),
        })
    }

    /// Spawn exactly `max_workers` worker loops as `tokio::task`s and join
    /// all of them; each loop claims, executes, and commits until the task
    /// store has no pending task left, then terminates.
    async fn execute_all_pending(&self, goal: &str) {
        let mut handles = Vec::new();

        for worker_index in 0..self.config.max_workers {
            let tasks = Arc::clone(&self.tasks);
            let pool = Arc::clone(&self.pool);
            let events = Arc::clone(&self.events);
            let executor = Arc::clone(&self.executor);
            let git = Arc::clone(&self.git);
            let project_path = self.project_path.clone();
            let goal = goal.to_string();
            let worker_id = format!("worker-{worker_index}");

            handles.push(tokio::spawn(async move {
                worker_loop(&worker_id, &tasks, &pool, &executor, &git, &events, &project_path, &goal).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task panicked");
            }
        }
    }
}

async fn worker_loop(
    worker_id: &str,
    tasks: &TaskStore,
    pool: &AgentPool,
    executor: &ExecutorManager,
    git: &ShellGit,
    events: &EventBus,
    project_path: &Path,
    goal: &str,
) {
    loop {
        let Some(task) = tasks.claim(worker_id) else {
            tracing::debug!(worker_id, "no pending task, worker exiting");
            break;
        };

        let history_len = task.agent_history.len();
        let prompt_for = |kind: &str| build_worker_prompt(goal, &task.title, &task.description, &task.files, kind);

        let outcome = executor.execute_task(pool, prompt_for, project_path, history_len).await;

        match outcome {
            Ok((kind, result)) => {
                if result.success && matches!(executor::detect_completion(&result.output), CompletionSignal::Completed | CompletionSignal::Unknown) {
                    match commit_task(git, &task.files, &task.title) {
                        Ok(()) => {
                            tasks.complete(task.id, &kind);
                            events.publish(Event::TaskCompleted { task_id: task.id });
                        }
                        Err(e) => {
                            tracing::error!(task_id = %task.id, error = %e, "commit failed after successful task");
                            let error = crate::task::ErrorInfo::new(crate::classifier::Category::GitConflict, e.to_string(), kind.as_str(), &result.output);
                            tasks.record_error(task.id, &kind, error);
                            finalize_after_error(tasks, task.id, crate::classifier::Category::GitConflict);
                            events.publish(Event::TaskFailed { task_id: task.id });
                        }
                    }
                } else {
                    let category = result.classify();
                    let error = crate::task::ErrorInfo::new(category, result.error.clone().unwrap_or_else(|| result.output.clone()), kind.as_str(), &result.output);
                    tasks.record_error(task.id, &kind, error);
                    finalize_after_error(tasks, task.id, category);
                    events.publish(Event::TaskFailed { task_id: task.id });
                }
            }
            Err(reason) => {
                tracing::warn!(task_id = %task.id, reason, "worker could not execute task, releasing");
                tasks.release(task.id);
                break;
            }
        }
    }
}

fn finalize_after_error(tasks: &TaskStore, task_id: uuid::Uuid, category: crate::classifier::Category) {
    let Some(task) = tasks.get(task_id) else { return };
    if crate::classifier::should_retry(category, task.attempts, task.max_attempts) {
        tasks.release(task_id);
    } else {
        tasks.mark_failed(task_id);
    }
}

fn commit_task(git: &ShellGit, files: &[String], title: &str) -> std::result::Result<(), crate::vc::VcError> {
    let paths: Vec<PathBuf> = files.iter().map(PathBuf::from).collect();
    match git.commit_sequence(&paths, &format!("Task completed: {title}")) {
        Ok(_) => Ok(()),
        Err(crate::vc::VcError::NothingToCommit) => Ok(()),
        Err(e) => Err(e),
    }
}

fn build_worker_prompt(goal: &str, title: &str, description: &str, files: &[String], kind: &str) -> String {
    format!(
        "You are a {kind} worker in an autonomous coding session.\n\
         Overall goal: {goal}\n\
         Task: {title}\n\
         {description}\n\
         Files: {files:?}\n\n\
         When finished, print a line of JSON: {{\"status\": \"COMPLETED\"}} or {{\"status\": \"FAILED\"}}. \
         Git conflict? Resolve it yourself."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliOverrides;
    use crate::executor::{AgentSpec, Extractor};
    use orbit_test_utils::create_temp_repo;

    fn config_for(max_cycles: u32, max_workers: u32) -> EngineConfig {
        let mut config = EngineConfig::resolve(&CliOverrides::default());
        config.max_cycles = max_cycles;
        config.max_workers = max_workers;
        config
    }

    #[tokio::test]
    async fn max_cycles_zero_never_runs_and_aborts() {
        let repo = create_temp_repo();
        let spec = AgentSpec::new(
            "alpha",
            orbit_test_utils::write_fake_agent_script(repo.path(), "alpha", "{\"type\":\"result\",\"result\":\"ok\"}", 0),
            Extractor::SingleEnvelope,
        );
        let mut config = config_for(0, 1);
        config.cooldown_minutes = [("alpha".to_string(), 45.0)].into_iter().collect();
        let orchestrator = Orchestrator::new(repo.path(), config, vec![spec]).unwrap();
        let result = orchestrator.start("do nothing").await.unwrap();
        assert_eq!(result.status, SessionStatus::Aborted);
        assert_eq!(result.total_cycles, 0);
    }

    #[tokio::test]
    async fn all_agents_disabled_fails_fast_on_initialize() {
        let repo = create_temp_repo();
        let mut config = config_for(1, 1);
        config.min_available_agents = 1;
        config.cooldown_minutes = [("ghost".to_string(), 45.0)].into_iter().collect();
        let orchestrator = Orchestrator::new(repo.path(), config, vec![]).unwrap();
        let result = orchestrator.start("anything").await;
        assert!(result.is_err());
    }
}
