//! Layered configuration: CLI flag > environment variable > on-disk TOML
//! file > compiled-in default.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::presets;

fn config_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("orbit")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// The subset of configuration worth persisting to an on-disk file; not
/// every `EngineConfig` field has a file-level override.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub max_cycles: Option<u32>,
    pub max_workers: Option<u32>,
    pub preset: Option<String>,
    pub wakeup_threshold: Option<u32>,
    pub state_dir: Option<String>,
}

pub fn load_config_file() -> Option<ConfigFile> {
    let contents = std::fs::read_to_string(config_path()).ok()?;
    toml::from_str(&contents).ok()
}

pub fn save_config_file(config: &ConfigFile) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir).map_err(|source| EngineError::Persistence { path: dir, source })?;
    let contents = toml::to_string_pretty(config).map_err(|e| EngineError::Config(e.to_string()))?;
    let path = config_path();
    std::fs::write(&path, contents).map_err(|source| EngineError::Persistence { path, source })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    pub call_ms: u64,
    pub cycle_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            call_ms: 300_000,
            cycle_ms: 600_000,
        }
    }
}

impl Timeouts {
    pub fn call(&self) -> Duration {
        Duration::from_millis(self.call_ms)
    }

    pub fn cycle(&self) -> Duration {
        Duration::from_millis(self.cycle_ms)
    }
}

/// Resolved, layered configuration for one engine run. Persisted verbatim
/// as `agents.json`'s `pool_config` field once resolved (see
/// [`crate::store::PoolSnapshot`]) so a resumed session keeps using the
/// configuration it started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub max_cycles: u32,
    pub max_workers: u32,
    pub timeouts: Timeouts,
    pub preset: String,
    pub binary_overrides: HashMap<String, String>,
    pub cooldown_minutes: HashMap<String, f64>,
    pub min_available_agents: u32,
    pub max_consecutive_failures: u32,
    pub cooldown_multiplier: f64,
    pub wakeup_threshold: u32,
    pub state_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut cooldown_minutes = HashMap::new();
        cooldown_minutes.insert("claude".to_string(), 45.0);
        cooldown_minutes.insert("codex".to_string(), 30.0);
        cooldown_minutes.insert("gemini".to_string(), 30.0);

        Self {
            max_cycles: 20,
            max_workers: 3,
            timeouts: Timeouts::default(),
            preset: presets::DEFAULT_PRESET.to_string(),
            binary_overrides: HashMap::new(),
            cooldown_minutes,
            min_available_agents: 1,
            max_consecutive_failures: 3,
            cooldown_multiplier: 1.0,
            wakeup_threshold: 3,
            state_dir: crate::store::DEFAULT_STATE_DIR.to_string(),
        }
    }
}

/// CLI-supplied overrides, all optional; a `None` field falls through to
/// the environment/file/default layers.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub max_cycles: Option<u32>,
    pub max_workers: Option<u32>,
    pub preset: Option<String>,
    pub state_dir: Option<String>,
}

impl EngineConfig {
    /// Resolve through: CLI flag > environment variable > config file >
    /// compiled-in default.
    pub fn resolve(cli: &CliOverrides) -> Self {
        let file = load_config_file();
        let mut config = EngineConfig::default();

        config.max_cycles = cli
            .max_cycles
            .or_else(|| env_u32("ORBIT_MAX_CYCLES"))
            .or_else(|| file.as_ref().and_then(|f| f.max_cycles))
            .unwrap_or(config.max_cycles);

        config.max_workers = cli
            .max_workers
            .or_else(|| env_u32("ORBIT_MAX_WORKERS"))
            .or_else(|| file.as_ref().and_then(|f| f.max_workers))
            .unwrap_or(config.max_workers);

        config.preset = cli
            .preset
            .clone()
            .or_else(|| std::env::var("ORBIT_PRESET").ok())
            .or_else(|| file.as_ref().and_then(|f| f.preset.clone()))
            .unwrap_or(config.preset);

        config.wakeup_threshold = env_u32("ORBIT_WAKEUP_THRESHOLD")
            .or_else(|| file.as_ref().and_then(|f| f.wakeup_threshold))
            .unwrap_or(config.wakeup_threshold);

        config.state_dir = cli
            .state_dir
            .clone()
            .or_else(|| std::env::var("ORBIT_STATE_DIR").ok())
            .or_else(|| file.as_ref().and_then(|f| f.state_dir.clone()))
            .unwrap_or(config.state_dir);

        config
    }

    pub fn binary_for(&self, kind: &str, default_name: &str) -> PathBuf {
        let env_key = format!("ORBIT_{}_BIN", kind.to_uppercase());
        if let Ok(path) = std::env::var(&env_key) {
            return PathBuf::from(path);
        }
        if let Some(path) = self.binary_overrides.get(kind) {
            return PathBuf::from(path);
        }
        PathBuf::from(default_name)
    }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn default_config_has_sane_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_cycles, 20);
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.wakeup_threshold, 3);
    }

    #[test]
    fn cli_override_wins_over_env() {
        let _lock = lock_env();
        unsafe { std::env::set_var("ORBIT_MAX_CYCLES", "7") };
        let config = EngineConfig::resolve(&CliOverrides {
            max_cycles: Some(2),
            ..Default::default()
        });
        unsafe { std::env::remove_var("ORBIT_MAX_CYCLES") };
        assert_eq!(config.max_cycles, 2);
    }

    #[test]
    fn env_var_wins_over_default() {
        let _lock = lock_env();
        unsafe { std::env::set_var("ORBIT_MAX_WORKERS", "9") };
        let config = EngineConfig::resolve(&CliOverrides::default());
        unsafe { std::env::remove_var("ORBIT_MAX_WORKERS") };
        assert_eq!(config.max_workers, 9);
    }

    #[test]
    fn resolve_falls_back_to_default_when_nothing_set() {
        let _lock = lock_env();
        unsafe { std::env::remove_var("ORBIT_MAX_CYCLES") };
        unsafe { std::env::remove_var("ORBIT_PRESET") };
        let config = EngineConfig::resolve(&CliOverrides::default());
        assert_eq!(config.preset, "default");
    }

    #[test]
    fn binary_override_env_var_takes_precedence() {
        let _lock = lock_env();
        unsafe { std::env::set_var("ORBIT_CLAUDE_BIN", "/custom/claude") };
        let config = EngineConfig::default();
        let path = config.binary_for("claude", "claude");
        unsafe { std::env::remove_var("ORBIT_CLAUDE_BIN") };
        assert_eq!(path, PathBuf::from("/custom/claude"));
    }

    #[test]
    fn config_file_round_trips() {
        let file = ConfigFile {
            max_cycles: Some(15),
            max_workers: Some(4),
            preset: Some("max".to_string()),
            wakeup_threshold: Some(2),
            state_dir: None,
        };
        let serialized = toml::to_string_pretty(&file).unwrap();
        let deserialized: ConfigFile = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.max_cycles, Some(15));
        assert_eq!(deserialized.preset, Some("max".to_string()));
    }
}
