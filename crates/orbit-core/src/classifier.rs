//! Error Classifier: a pure function from raw subprocess output onto a
//! fixed category taxonomy, plus the fixed per-category recovery policy.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    RateLimit,
    Timeout,
    Crash,
    InvalidOutput,
    GitConflict,
    Permission,
    Network,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Retry,
    Reassign,
    Fail,
    Pause,
}

#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub retry: bool,
    pub cooldown_minutes: f64,
    pub max_retries: u32,
    pub allow_failover: bool,
    pub action: Action,
}

const RATE_LIMIT_SIGNALS: &[&str] = &[
    "rate limit",
    "too many requests",
    "quota exceeded",
    "429",
    "ratelimit",
];
const TIMEOUT_SIGNALS: &[&str] = &["timed out", "timeout"];
const PERMISSION_SIGNALS: &[&str] = &["permission denied", "access denied", "unauthorized"];
const NETWORK_SIGNALS: &[&str] = &[
    "connection refused",
    "connection reset",
    "name resolution failed",
    "fetch failed",
];
const GIT_CONFLICT_SIGNALS: &[&str] = &["conflict", "merge conflict", "cannot merge"];

const TIMEOUT_EXIT_CODE: i32 = 124;

/// Classify a subprocess outcome. Deterministic: depends only on its
/// arguments, matching rules in the fixed order listed in the match table
/// (first hit wins).
pub fn classify(output: &str, exit_code: i32) -> Category {
    let lower = output.to_lowercase();
    let any_match = |signals: &[&str]| signals.iter().any(|s| lower.contains(s));

    if any_match(RATE_LIMIT_SIGNALS) {
        return Category::RateLimit;
    }
    if exit_code == TIMEOUT_EXIT_CODE || any_match(TIMEOUT_SIGNALS) {
        return Category::Timeout;
    }
    if any_match(PERMISSION_SIGNALS) {
        return Category::Permission;
    }
    if any_match(NETWORK_SIGNALS) {
        return Category::Network;
    }
    if any_match(GIT_CONFLICT_SIGNALS) {
        return Category::GitConflict;
    }
    if exit_code != 0 && !lower.contains("error") {
        return Category::Crash;
    }
    Category::Unknown
}

/// The fixed per-category recovery policy. Reproduced exactly; not
/// configurable (only the cooldown table's per-kind minutes are config).
pub fn policy(category: Category) -> Policy {
    match category {
        Category::RateLimit => Policy {
            retry: false,
            cooldown_minutes: 45.0,
            max_retries: 0,
            allow_failover: true,
            action: Action::Reassign,
        },
        Category::Timeout => Policy {
            retry: true,
            cooldown_minutes: 0.0,
            max_retries: 2,
            allow_failover: true,
            action: Action::Retry,
        },
        Category::Crash => Policy {
            retry: true,
            cooldown_minutes: 1.0,
            max_retries: 3,
            allow_failover: true,
            action: Action::Retry,
        },
        Category::InvalidOutput => Policy {
            retry: true,
            cooldown_minutes: 0.0,
            max_retries: 2,
            allow_failover: false,
            action: Action::Retry,
        },
        Category::GitConflict => Policy {
            retry: true,
            cooldown_minutes: 0.0,
            max_retries: 2,
            allow_failover: false,
            action: Action::Retry,
        },
        Category::Permission => Policy {
            retry: false,
            cooldown_minutes: 0.0,
            max_retries: 0,
            allow_failover: false,
            action: Action::Fail,
        },
        Category::Network => Policy {
            retry: true,
            cooldown_minutes: 0.5,
            max_retries: 5,
            allow_failover: false,
            action: Action::Retry,
        },
        Category::Unknown => Policy {
            retry: true,
            cooldown_minutes: 1.0,
            max_retries: 1,
            allow_failover: true,
            action: Action::Retry,
        },
    }
}

pub fn should_retry(category: Category, attempts: u32, max_attempts: u32) -> bool {
    let p = policy(category);
    p.retry && attempts < max_attempts
}

/// Never reassign a task to a different agent kind more than 3 times.
pub fn should_reassign(category: Category, agent_history_length: usize) -> bool {
    policy(category).allow_failover && agent_history_length < 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit() {
        assert_eq!(classify("Error: rate limit exceeded", 1), Category::RateLimit);
        assert_eq!(classify("HTTP 429 too many requests", 1), Category::RateLimit);
    }

    #[test]
    fn classifies_timeout_by_exit_code_or_text() {
        assert_eq!(classify("still running", 124), Category::Timeout);
        assert_eq!(classify("operation timed out", 1), Category::Timeout);
    }

    #[test]
    fn classifies_permission() {
        assert_eq!(classify("Permission denied", 1), Category::Permission);
    }

    #[test]
    fn classifies_network() {
        assert_eq!(classify("connection refused by host", 1), Category::Network);
    }

    #[test]
    fn classifies_git_conflict() {
        assert_eq!(classify("CONFLICT (content): merge conflict in x.rs", 1), Category::GitConflict);
    }

    #[test]
    fn classifies_crash_on_nonzero_exit_without_error_keyword() {
        assert_eq!(classify("segmentation fault", 139), Category::Crash);
    }

    #[test]
    fn classifies_unknown_as_fallback() {
        assert_eq!(classify("some generic error happened", 1), Category::Unknown);
        assert_eq!(classify("all good", 0), Category::Unknown);
    }

    #[test]
    fn classification_is_deterministic() {
        for _ in 0..10 {
            assert_eq!(classify("rate limit", 1), Category::RateLimit);
        }
    }

    #[test]
    fn first_hit_wins_rate_limit_over_timeout() {
        // Contains both signals; rate_limit rule is checked first.
        assert_eq!(classify("rate limit, request timed out", 1), Category::RateLimit);
    }

    #[test]
    fn policy_table_matches_fixed_values() {
        let p = policy(Category::RateLimit);
        assert!(!p.retry);
        assert_eq!(p.cooldown_minutes, 45.0);
        assert_eq!(p.max_retries, 0);
        assert!(p.allow_failover);
        assert_eq!(p.action, Action::Reassign);

        let p = policy(Category::Permission);
        assert!(!p.retry);
        assert_eq!(p.max_retries, 0);
        assert!(!p.allow_failover);
        assert_eq!(p.action, Action::Fail);
    }

    #[test]
    fn should_reassign_caps_at_three() {
        assert!(should_reassign(Category::Timeout, 0));
        assert!(should_reassign(Category::Timeout, 2));
        assert!(!should_reassign(Category::Timeout, 3));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        assert!(should_retry(Category::Timeout, 1, 3));
        assert!(!should_retry(Category::Timeout, 3, 3));
        assert!(!should_retry(Category::Permission, 0, 3));
    }
}
