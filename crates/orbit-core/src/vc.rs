//! Version control primitives: branch, stage, pull-with-rebase, commit.
//!
//! Shells out to `git` the way the teacher's worktree manager did, but
//! against a single shared working tree (no per-worker worktrees). Commits
//! must be serialized since there is one tree shared across workers.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcError {
    #[error("{0} is not a git repository")]
    NotAGitRepo(PathBuf),

    #[error("failed to run git {args}: {source}")]
    GitCommand { args: String, source: std::io::Error },

    #[error("git {args} exited with status {status}: {stderr}")]
    GitExit {
        args: String,
        status: i32,
        stderr: String,
    },

    #[error("nothing to commit")]
    NothingToCommit,
}

pub trait VersionControl: Send + Sync {
    fn create_or_switch_branch(&self, name: &str) -> Result<(), VcError>;
    fn stage_files(&self, paths: &[PathBuf]) -> Result<(), VcError>;
    fn pull_with_rebase(&self) -> Result<(), VcError>;
    fn commit(&self, message: &str) -> Result<String, VcError>;
}

/// Shells out to the system `git` binary, one commit at a time.
pub struct ShellGit {
    repo_path: PathBuf,
    commit_lock: Mutex<()>,
}

impl ShellGit {
    pub fn new(repo_path: impl Into<PathBuf>) -> Result<Self, VcError> {
        let repo_path = repo_path.into();
        let git = ShellGit {
            repo_path: repo_path.clone(),
            commit_lock: Mutex::new(()),
        };
        if !git.is_git_repo() {
            return Err(VcError::NotAGitRepo(repo_path));
        }
        Ok(git)
    }

    fn is_git_repo(&self) -> bool {
        self.repo_path.join(".git").exists()
    }

    fn run(&self, args: &[&str]) -> Result<Output, VcError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|source| VcError::GitCommand {
                args: args.join(" "),
                source,
            })?;
        Ok(output)
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output, VcError> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(VcError::GitExit {
                args: args.join(" "),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    fn branch_exists(&self, name: &str) -> Result<bool, VcError> {
        let output = self.run(&["rev-parse", "--verify", "--quiet", &format!("refs/heads/{name}")])?;
        Ok(output.status.success())
    }
}

impl VersionControl for ShellGit {
    fn create_or_switch_branch(&self, name: &str) -> Result<(), VcError> {
        if self.branch_exists(name)? {
            self.run_checked(&["checkout", name])?;
        } else {
            self.run_checked(&["checkout", "-b", name])?;
        }
        tracing::info!(branch = name, "switched branch");
        Ok(())
    }

    fn stage_files(&self, paths: &[PathBuf]) -> Result<(), VcError> {
        if paths.is_empty() {
            self.run_checked(&["add", "-A"])?;
            return Ok(());
        }
        let mut args = vec!["add"];
        let path_strs: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        args.extend(path_strs.iter().map(|s| s.as_str()));
        self.run_checked(&args)?;
        Ok(())
    }

    fn pull_with_rebase(&self) -> Result<(), VcError> {
        let output = self.run(&["pull", "--rebase"])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no tracking information") || stderr.contains("couldn't find remote ref") {
                tracing::debug!("skipping rebase pull, no upstream configured");
                return Ok(());
            }
            return Err(VcError::GitExit {
                args: "pull --rebase".to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<String, VcError> {
        let _guard = self.commit_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.commit_unlocked(message)
    }
}

impl ShellGit {
    fn commit_unlocked(&self, message: &str) -> Result<String, VcError> {
        let status = self.run_checked(&["status", "--porcelain"])?;
        if String::from_utf8_lossy(&status.stdout).trim().is_empty() {
            return Err(VcError::NothingToCommit);
        }

        self.run_checked(&["commit", "-m", message])?;
        let rev = self.run_checked(&["rev-parse", "HEAD"])?;
        let sha = String::from_utf8_lossy(&rev.stdout).trim().to_string();
        tracing::info!(sha, "committed");
        Ok(sha)
    }

    /// Runs `pull --rebase`, stages `paths` (or everything if empty), and
    /// commits, all under one lock. Workers share a single working tree, so
    /// the whole sequence -- not just the final commit -- must be
    /// serialized to avoid one worker staging into another's rebase.
    pub fn commit_sequence(&self, paths: &[PathBuf], message: &str) -> Result<String, VcError> {
        let _guard = self.commit_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.pull_with_rebase()?;
        if paths.is_empty() {
            self.run_checked(&["add", "-A"])?;
        } else {
            let mut args = vec!["add"];
            let path_strs: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
            args.extend(path_strs.iter().map(|s| s.as_str()));
            self.run_checked(&args)?;
        }
        self.commit_unlocked(message)
    }
}

pub fn open(repo_path: impl AsRef<Path>) -> Result<ShellGit, VcError> {
    ShellGit::new(repo_path.as_ref().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_test_utils::create_temp_repo;
    use std::fs;

    #[test]
    fn rejects_non_git_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(ShellGit::new(dir.path()), Err(VcError::NotAGitRepo(_))));
    }

    #[test]
    fn create_branch_then_switch_back() {
        let repo = create_temp_repo();
        let git = ShellGit::new(repo.path()).unwrap();
        git.create_or_switch_branch("feature/x").unwrap();
        git.create_or_switch_branch("main").unwrap();
        git.create_or_switch_branch("feature/x").unwrap();
    }

    #[test]
    fn stage_and_commit_round_trip() {
        let repo = create_temp_repo();
        let git = ShellGit::new(repo.path()).unwrap();
        fs::write(repo.path().join("new.txt"), "hello").unwrap();
        git.stage_files(&[PathBuf::from("new.txt")]).unwrap();
        let sha = git.commit("add new.txt").unwrap();
        assert_eq!(sha.len(), 40);
    }

    #[test]
    fn commit_with_nothing_staged_errors() {
        let repo = create_temp_repo();
        let git = ShellGit::new(repo.path()).unwrap();
        assert!(matches!(git.commit("empty"), Err(VcError::NothingToCommit)));
    }

    #[test]
    fn pull_with_rebase_without_remote_is_a_noop() {
        let repo = create_temp_repo();
        let git = ShellGit::new(repo.path()).unwrap();
        git.pull_with_rebase().unwrap();
    }
}
