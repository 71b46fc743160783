//! Executor Manager: select an agent kind, dispatch, account, failover.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::agent_pool::{AgentPool, Selection};
use crate::classifier::{self, Action};
use crate::executor::{self, AgentSpec, ExecutionResult};

pub struct RawOutcome {
    pub agent: String,
    pub result: ExecutionResult,
}

pub struct ExecutorManager {
    specs: HashMap<String, AgentSpec>,
    prompts_dir: PathBuf,
}

impl ExecutorManager {
    pub fn new(specs: Vec<AgentSpec>, prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.kind.clone(), s)).collect(),
            prompts_dir: prompts_dir.into(),
        }
    }

    /// Probe each spec's binary; kinds not found on PATH are disabled in
    /// the pool and excluded from the returned set.
    pub fn detect_available(&self, pool: &AgentPool) -> Vec<String> {
        let mut available = Vec::new();
        for spec in self.specs.values() {
            if spec.binary_on_path() {
                available.push(spec.kind.clone());
            } else {
                tracing::warn!(kind = %spec.kind, "agent binary not found on PATH, disabling");
                pool.disable(&spec.kind);
            }
        }
        available.sort();
        available
    }

    async fn invoke(&self, kind: &str, prompt: &str, working_dir: &Path, label: &str) -> ExecutionResult {
        let Some(spec) = self.specs.get(kind) else {
            return ExecutionResult {
                success: false,
                output: String::new(),
                error: Some(format!("unknown agent kind {kind}")),
                exit_code: -1,
                duration: std::time::Duration::ZERO,
            };
        };
        let result = executor::run(spec, prompt, working_dir).await;
        let ts = Utc::now().format("%Y%m%dT%H%M%S%.3f").to_string();
        if let Err(e) = executor::capture_debug(
            &self.prompts_dir,
            kind,
            &ts,
            prompt,
            &result.output,
            result.error.as_deref().unwrap_or(""),
        ) {
            tracing::warn!(error = %e, "failed to capture prompt debug files");
        }
        tracing::info!(kind, label, success = result.success, duration_ms = result.duration.as_millis() as u64, "agent invocation finished");
        result
    }

    /// Select, mark busy, invoke, record outcome, and perform at most one
    /// bounded failover loop on rate-limit. `agent_history_len` is the
    /// number of prior attempts already recorded against this task.
    pub async fn execute_task(
        &self,
        pool: &AgentPool,
        prompt_for: impl Fn(&str) -> String,
        working_dir: &Path,
        agent_history_len: usize,
    ) -> Result<(String, ExecutionResult), String> {
        let mut tried = Vec::new();
        let mut history_len = agent_history_len;

        loop {
            let kind = match pool.select() {
                Selection::Selected(kind) => kind,
                Selection::Wait { reason, .. } => return Err(format!("no agent available: {reason}")),
                Selection::Pause { reason } => return Err(format!("cycle paused: {reason}")),
            };

            pool.mark_busy(&kind);
            let prompt = prompt_for(&kind);
            let result = self.invoke(&kind, &prompt, working_dir, "worker").await;
            tried.push(kind.clone());

            if result.success {
                pool.record_success(&kind, result.duration.as_secs_f64());
                return Ok((kind, result));
            }

            let category = result.classify();
            let policy = classifier::policy(category);

            if policy.action == Action::Reassign {
                let cooldown = pool.cooldown_minutes(&kind);
                pool.mark_rate_limited(&kind, cooldown * pool.config().cooldown_multiplier);
                history_len += 1;
                if classifier::should_reassign(category, history_len) && tried.len() < 3 {
                    tracing::info!(kind, "attempting failover to a different agent kind");
                    continue;
                }
                return Ok((kind, result));
            }

            pool.record_failure(&kind, category);
            return Ok((kind, result));
        }
    }

    /// Same selection/accounting as `execute_task`, without the Worker
    /// prompt wrapper. Used by Planner and Judge.
    pub async fn execute_raw(&self, pool: &AgentPool, prompt: &str, working_dir: &Path, label: &str) -> Result<RawOutcome, String> {
        let kind = match pool.select() {
            Selection::Selected(kind) => kind,
            Selection::Wait { reason, .. } => return Err(format!("no agent available: {reason}")),
            Selection::Pause { reason } => return Err(format!("cycle paused: {reason}")),
        };

        pool.mark_busy(&kind);
        let result = self.invoke(&kind, prompt, working_dir, label).await;

        if result.success {
            pool.record_success(&kind, result.duration.as_secs_f64());
        } else {
            let category = result.classify();
            if classifier::policy(category).action == Action::Reassign {
                pool.mark_rate_limited(&kind, pool.cooldown_minutes(&kind) * pool.config().cooldown_multiplier);
            } else {
                pool.record_failure(&kind, category);
            }
        }

        Ok(RawOutcome { agent: kind, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_pool::PoolConfig;
    use crate::executor::Extractor;

    fn pool() -> AgentPool {
        AgentPool::new(
            &[("alpha", 45.0), ("beta", 30.0)],
            PoolConfig {
                fallback_order: vec!["alpha".to_string(), "beta".to_string()],
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn execute_raw_records_success() {
        let dir = tempfile::tempdir().unwrap();
        let script = orbit_test_utils::write_fake_agent_script(dir.path(), "alpha", "{\"type\":\"result\",\"result\":\"ok\"}", 0);
        let spec = AgentSpec::new("alpha", script, Extractor::SingleEnvelope);
        let prompts = dir.path().join("prompts");
        let manager = ExecutorManager::new(vec![spec], &prompts);
        let pool = pool();
        let outcome = manager.execute_raw(&pool, "prompt", dir.path(), "planner").await.unwrap();
        assert_eq!(outcome.agent, "alpha");
        assert!(outcome.result.success);
        let state = pool.snapshot().into_iter().find(|s| s.kind == "alpha").unwrap();
        assert_eq!(state.completed, 1);
    }

    #[tokio::test]
    async fn execute_task_fails_over_on_rate_limit() {
        let dir = tempfile::tempdir().unwrap();
        let bad = orbit_test_utils::write_fake_agent_script(dir.path(), "alpha", "rate limit exceeded", 1);
        let good = orbit_test_utils::write_fake_agent_script(dir.path(), "beta", "{\"type\":\"result\",\"result\":\"done\"}", 0);
        let prompts = dir.path().join("prompts");
        let manager = ExecutorManager::new(
            vec![
                AgentSpec::new("alpha", bad, Extractor::SingleEnvelope),
                AgentSpec::new("beta", good, Extractor::SingleEnvelope),
            ],
            &prompts,
        );
        let pool = pool();
        let (kind, result) = manager
            .execute_task(&pool, |_| "do task".to_string(), dir.path(), 0)
            .await
            .unwrap();
        assert_eq!(kind, "beta");
        assert!(result.success);
    }
}
