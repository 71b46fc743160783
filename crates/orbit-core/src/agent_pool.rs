//! Agent Pool: per-kind health tracking and selection.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Available,
    Busy,
    RateLimited,
    Errored,
    Exhausted,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub kind: String,
    pub status: Status,
    pub available_at: Option<DateTime<Utc>>,
    pub cooldown_minutes: f64,
    pub completed: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub mean_duration_secs: f64,
    pub consecutive_failures: u32,
}

impl AgentState {
    fn new(kind: impl Into<String>, cooldown_minutes: f64) -> Self {
        Self {
            kind: kind.into(),
            status: Status::Available,
            available_at: None,
            cooldown_minutes,
            completed: 0,
            failed: 0,
            success_rate: 1.0,
            mean_duration_secs: 1.0,
            consecutive_failures: 0,
        }
    }

    fn score(&self) -> f64 {
        self.success_rate / self.mean_duration_secs.max(1.0)
    }
}

#[derive(Debug, Clone)]
pub enum Selection {
    Selected(String),
    Wait { until: DateTime<Utc>, reason: String },
    Pause { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Fixed fallback order used to break score ties, and to decide
    /// failover candidate order.
    pub fallback_order: Vec<String>,
    pub max_consecutive_failures: u32,
    pub cooldown_multiplier: f64,
    pub min_available_agents: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            fallback_order: Vec::new(),
            max_consecutive_failures: 3,
            cooldown_multiplier: 1.0,
            min_available_agents: 1,
        }
    }
}

/// Health tracking and selection among a fixed set of agent kinds.
#[derive(Debug)]
pub struct AgentPool {
    states: Mutex<HashMap<String, AgentState>>,
    config: PoolConfig,
}

impl AgentPool {
    pub fn new(kinds: &[(&str, f64)], config: PoolConfig) -> Self {
        let mut states = HashMap::new();
        for (kind, cooldown) in kinds {
            states.insert((*kind).to_string(), AgentState::new(*kind, *cooldown));
        }
        Self {
            states: Mutex::new(states),
            config,
        }
    }

    pub fn from_states(states: Vec<AgentState>, config: PoolConfig) -> Self {
        let map = states.into_iter().map(|s| (s.kind.clone(), s)).collect();
        Self {
            states: Mutex::new(map),
            config,
        }
    }

    pub fn snapshot(&self) -> Vec<AgentState> {
        let guard = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let mut states: Vec<AgentState> = guard.values().cloned().collect();
        states.sort_by(|a, b| a.kind.cmp(&b.kind));
        states
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The configured base cooldown (minutes) for `kind`, as set at pool
    /// construction. Falls back to 45.0 for a kind the pool has never
    /// heard of (defensive only; callers always pass a registered kind).
    pub fn cooldown_minutes(&self, kind: &str) -> f64 {
        let guard = self.states.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(kind).map(|s| s.cooldown_minutes).unwrap_or(45.0)
    }

    pub fn disable(&self, kind: &str) {
        let mut guard = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = guard.get_mut(kind) {
            state.status = Status::Disabled;
        }
    }

    /// Select the best available agent kind, or report why none can run
    /// right now. Transitions expired rate-limited kinds back to
    /// available before scoring.
    pub fn select(&self) -> Selection {
        let mut guard = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();

        for state in guard.values_mut() {
            if state.status == Status::RateLimited {
                if let Some(available_at) = state.available_at {
                    if available_at <= now {
                        state.status = Status::Available;
                        state.available_at = None;
                    }
                }
            }
        }

        let mut candidates: Vec<&AgentState> =
            guard.values().filter(|s| s.status == Status::Available).collect();

        if let Some(best) = pick_best(&mut candidates, &self.config.fallback_order) {
            return Selection::Selected(best.kind.clone());
        }

        let rate_limited: Vec<&AgentState> = guard
            .values()
            .filter(|s| s.status == Status::RateLimited)
            .collect();
        if !rate_limited.is_empty() {
            let earliest = rate_limited
                .iter()
                .filter_map(|s| s.available_at)
                .min()
                .unwrap_or(now);
            return Selection::Wait {
                until: earliest,
                reason: "all agent kinds are rate-limited".to_string(),
            };
        }

        Selection::Pause {
            reason: "all agent kinds are exhausted or disabled".to_string(),
        }
    }

    pub fn mark_busy(&self, kind: &str) {
        let mut guard = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = guard.get_mut(kind) {
            state.status = Status::Busy;
        }
    }

    pub fn mark_available(&self, kind: &str) {
        let mut guard = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = guard.get_mut(kind) {
            if state.status == Status::Busy {
                state.status = Status::Available;
            }
        }
    }

    pub fn mark_rate_limited(&self, kind: &str, cooldown_minutes: f64) {
        let mut guard = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = guard.get_mut(kind) {
            state.status = Status::RateLimited;
            state.available_at =
                Some(Utc::now() + chrono::Duration::seconds((cooldown_minutes * 60.0) as i64));
            tracing::warn!(kind, cooldown_minutes, "agent kind rate-limited");
        }
    }

    pub fn record_success(&self, kind: &str, duration_secs: f64) {
        let mut guard = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = guard.get_mut(kind) {
            state.completed += 1;
            state.consecutive_failures = 0;
            let n = (state.completed + state.failed).max(1) as f64;
            state.mean_duration_secs = ((state.mean_duration_secs * (n - 1.0)) + duration_secs) / n;
            recompute_success_rate(state);
            if state.status == Status::Busy {
                state.status = Status::Available;
            }
            tracing::info!(kind, duration_secs, success_rate = state.success_rate, "agent succeeded");
        }
    }

    pub fn record_failure(&self, kind: &str, _category: Category) {
        let mut guard = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let max_consecutive_failures = self.config.max_consecutive_failures;
        if let Some(state) = guard.get_mut(kind) {
            state.failed += 1;
            state.consecutive_failures += 1;
            recompute_success_rate(state);
            if state.consecutive_failures >= max_consecutive_failures {
                state.status = Status::Errored;
                tracing::error!(kind, "agent kind errored after too many consecutive failures");
            } else if state.status == Status::Busy {
                state.status = Status::Available;
            }
        }
    }

    pub fn all_unavailable(&self) -> bool {
        let guard = self.states.lock().unwrap_or_else(|e| e.into_inner());
        !guard
            .values()
            .any(|s| !matches!(s.status, Status::Exhausted | Status::Disabled))
    }
}

fn recompute_success_rate(state: &mut AgentState) {
    let total = state.completed + state.failed;
    state.success_rate = if total == 0 {
        1.0
    } else {
        state.completed as f64 / total as f64
    };
}

fn pick_best<'a>(candidates: &mut [&'a AgentState], fallback_order: &[String]) -> Option<&'a AgentState> {
    candidates.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let pos = |kind: &str| fallback_order.iter().position(|k| k == kind).unwrap_or(usize::MAX);
                pos(&a.kind).cmp(&pos(&b.kind))
            })
    });
    candidates.first().copied()
}
