//! File-backed persistence: state.json, tasks.json, agents.json.
//!
//! Every file is read and rewritten wholesale (atomic replace via a
//! temp-file-then-rename), never incrementally patched, so a crash mid-write
//! never leaves a half-written file in place of the last good one.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::agent_pool::AgentPool;
use crate::error::{EngineError, Result};
use crate::session::Session;
use crate::task::{Task, TaskStore};

pub const DEFAULT_STATE_DIR: &str = ".orbit";

pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(project_path: impl AsRef<Path>, state_dir_name: &str) -> Self {
        Self {
            root: project_path.as_ref().join(state_dir_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.root.join("prompts")
    }

    fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }

    fn tasks_path(&self) -> PathBuf {
        self.root.join("tasks.json")
    }

    fn agents_path(&self) -> PathBuf {
        self.root.join("agents.json")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.logs_dir(), self.prompts_dir()] {
            fs::create_dir_all(&dir).map_err(|source| EngineError::Persistence { path: dir, source })?;
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.state_path().exists()
    }

    pub fn save_session(&self, session: &Session) -> Result<()> {
        write_json(&self.state_path(), session)
    }

    pub fn load_session(&self) -> Result<Session> {
        read_json(&self.state_path())
    }

    pub fn save_tasks(&self, store: &TaskStore) -> Result<()> {
        write_json(&self.tasks_path(), &store.snapshot())
    }

    pub fn load_tasks(&self) -> Result<Vec<Task>> {
        read_json(&self.tasks_path())
    }

    pub fn save_pool(&self, pool: &PoolSnapshot) -> Result<()> {
        write_json(&self.agents_path(), pool)
    }

    pub fn load_pool(&self) -> Result<PoolSnapshot> {
        read_json(&self.agents_path())
    }
}

/// The on-disk shape of `agents.json`: per-kind state plus the resolved
/// pool configuration, so a resumed session keeps using the configuration
/// it started with.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PoolSnapshot {
    pub states: Vec<crate::agent_pool::AgentState>,
    pub pool_config: crate::agent_pool::PoolConfig,
}

impl PoolSnapshot {
    pub fn from_pool(pool: &AgentPool) -> Self {
        Self {
            states: pool.snapshot(),
            pool_config: pool.config().clone(),
        }
    }

    pub fn into_pool(self) -> AgentPool {
        AgentPool::from_states(self.states, self.pool_config)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let pretty = serde_json::to_string_pretty(value).map_err(|source| EngineError::Serde {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, pretty).map_err(|source| EngineError::Persistence {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| EngineError::Persistence {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|source| EngineError::Persistence {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| EngineError::Serde {
        path: path.to_path_buf(),
        source,
    })
}

/// Amend `.gitignore` in `project_path` to exclude the state directory, if
/// not already present. Returns whether a change was made.
pub fn ensure_gitignore_excludes(project_path: &Path, state_dir_name: &str) -> Result<bool> {
    let gitignore_path = project_path.join(".gitignore");
    let entry = format!("{state_dir_name}/");
    let existing = fs::read_to_string(&gitignore_path).unwrap_or_default();
    if existing.lines().any(|line| line.trim() == entry.trim_end_matches('/') || line.trim() == entry) {
        return Ok(false);
    }
    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&entry);
    updated.push('\n');
    fs::write(&gitignore_path, updated).map_err(|source| EngineError::Persistence {
        path: gitignore_path,
        source,
    })?;
    Ok(true)
}
