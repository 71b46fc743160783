//! Judge Runner: end-of-cycle CONTINUE/COMPLETE/ABORT decision.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::executor::manager::ExecutorManager;
use crate::task::TaskStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Continue,
    Complete,
    Abort,
}

#[derive(Debug, Clone)]
pub struct Judgement {
    pub decision: Decision,
    pub reasoning: String,
    pub progress_percent: i32,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JudgeJson {
    decision: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    progress_percent: i32,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
}

pub struct CycleStats {
    pub completed: u64,
    pub failed: u64,
    pub pending: u64,
    pub total: u64,
}

impl CycleStats {
    pub fn from_store(store: &TaskStore) -> Self {
        let c = store.counts();
        Self {
            completed: c.completed as u64,
            failed: c.failed as u64,
            pending: c.pending as u64,
            total: c.total as u64,
        }
    }
}

fn build_prompt(goal: &str, cycle: u32, stats: &CycleStats) -> String {
    format!(
        "You are the judge for an autonomous coding session.\n\
         Goal: {goal}\n\
         Cycle: {cycle}\n\
         Completed: {completed}, Failed: {failed}, Pending: {pending}, Total: {total}\n\n\
         Respond with a single JSON object: {{\"decision\": \"CONTINUE\"|\"COMPLETE\"|\"ABORT\", \
         \"reasoning\": string, \"progress_percent\": int, \"issues\": string[], \"recommendations\": string[]}}.",
        completed = stats.completed,
        failed = stats.failed,
        pending = stats.pending,
        total = stats.total,
    )
}

/// Total heuristic fallback: exactly one decision for every (cycle, stats).
pub fn heuristic_decision(current_cycle: u32, max_cycles: u32, stats: &CycleStats) -> Judgement {
    let decision = if current_cycle >= max_cycles {
        Decision::Abort
    } else if stats.total > 0 && stats.pending == 0 && stats.failed == 0 && stats.completed >= 1 {
        Decision::Complete
    } else if stats.total > 0 && stats.failed as f64 / stats.total as f64 > 0.5 {
        Decision::Abort
    } else {
        Decision::Continue
    };

    Judgement {
        decision,
        reasoning: "heuristic fallback decision".to_string(),
        progress_percent: if stats.total == 0 {
            0
        } else {
            ((stats.completed as f64 / stats.total as f64) * 100.0) as i32
        },
        issues: Vec::new(),
        recommendations: Vec::new(),
    }
}

fn parse_decision(output: &str) -> Option<Judgement> {
    let parsed: JudgeJson = serde_json::from_str(output.trim())
        .or_else(|_| {
            let start = output.find('{')?;
            let end = output.rfind('}')?;
            serde_json::from_str(&output[start..=end]).map_err(|_| ())
        })
        .ok()?;

    let decision = match parsed.decision.to_uppercase().as_str() {
        "CONTINUE" => Decision::Continue,
        "COMPLETE" => Decision::Complete,
        "ABORT" => Decision::Abort,
        _ => return None,
    };

    Some(Judgement {
        decision,
        reasoning: parsed.reasoning,
        progress_percent: parsed.progress_percent,
        issues: parsed.issues,
        recommendations: parsed.recommendations,
    })
}

pub struct JudgeRunner<'a> {
    pub executor: &'a ExecutorManager,
}

impl<'a> JudgeRunner<'a> {
    pub fn new(executor: &'a ExecutorManager) -> Self {
        Self { executor }
    }

    pub async fn run(
        &self,
        pool: &crate::agent_pool::AgentPool,
        store: &TaskStore,
        working_dir: &Path,
        goal: &str,
        current_cycle: u32,
        max_cycles: u32,
    ) -> Judgement {
        let stats = CycleStats::from_store(store);
        let prompt = build_prompt(goal, current_cycle, &stats);

        let outcome = match self.executor.execute_raw(pool, &prompt, working_dir, "judge").await {
            Ok(outcome) => outcome,
            Err(reason) => {
                tracing::warn!(reason, "judge could not run this cycle, using heuristic");
                return heuristic_decision(current_cycle, max_cycles, &stats);
            }
        };

        match parse_decision(&outcome.result.output) {
            Some(judgement) => judgement,
            None => {
                tracing::warn!("failed to parse judge output, using heuristic");
                heuristic_decision(current_cycle, max_cycles, &stats)
            }
        }
    }
}
