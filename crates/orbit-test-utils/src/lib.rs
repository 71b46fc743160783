//! Shared test fixtures for orbit integration tests.
//!
//! There is no external service to share across tests (unlike a
//! database-backed project): every fixture here is a throwaway directory.
//! The helpers centralize the fiddly parts -- initializing a real git
//! repository with a committed first commit, and laying out a state
//! directory shape the store code expects -- so integration tests in each
//! crate do not each reinvent them.

use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

/// A temporary git repository with an initial commit already made.
///
/// Holds the `TempDir` alive for the lifetime of the value; the directory
/// and its `.git` are removed when this value is dropped.
pub struct TempRepo {
    pub dir: TempDir,
}

impl TempRepo {
    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

/// Create a temporary git repository with a committed `README.md`.
///
/// # Panics
///
/// Panics if `git` is not on `PATH` or any of the setup commands fail --
/// this is a test fixture, not production code.
pub fn create_temp_repo() -> TempRepo {
    let dir = TempDir::new().expect("failed to create temp dir");
    let repo_path = dir.path();

    let run = |args: &[&str]| {
        let output = Command::new("git")
            .args(args)
            .current_dir(repo_path)
            .output()
            .unwrap_or_else(|e| panic!("git {} failed: {e}", args.join(" ")));
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    };

    run(&["init", "-b", "main"]);
    run(&["config", "user.email", "test@orbit.dev"]);
    run(&["config", "user.name", "Orbit Test"]);
    std::fs::write(repo_path.join("README.md"), "# Test repo\n").unwrap();
    run(&["add", "."]);
    run(&["commit", "-m", "Initial commit"]);

    TempRepo { dir }
}

/// Create a fresh, empty state directory under a new temp dir and return
/// both. The caller decides whether to point it at a repo's working
/// directory or keep it standalone.
pub fn temp_state_dir() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let state_dir = dir.path().join(".orbit");
    std::fs::create_dir_all(&state_dir).expect("failed to create state dir");
    (dir, state_dir)
}

/// Write a tiny fake agent-kind script that echoes a fixed response and
/// exits with a fixed code, for exercising the subprocess executor without
/// a real coding-agent binary installed.
///
/// The script reads (and discards) stdin before printing, matching the
/// real contract of prompt-delivered-over-stdin.
#[cfg(unix)]
pub fn write_fake_agent_script(dir: &std::path::Path, name: &str, stdout: &str, exit_code: i32) -> PathBuf {
    let path = dir.join(name);
    let script = format!(
        "#!/bin/sh\ncat >/dev/null\ncat <<'EOF'\n{stdout}\nEOF\nexit {exit_code}\n"
    );
    std::fs::write(&path, script).expect("failed to write fake agent script");
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_repo_has_initial_commit() {
        let repo = create_temp_repo();
        assert!(repo.path().join("README.md").exists());
        assert!(repo.path().join(".git").exists());
    }

    #[test]
    fn temp_state_dir_is_created() {
        let (_dir, state_dir) = temp_state_dir();
        assert!(state_dir.exists());
    }

    #[cfg(unix)]
    #[test]
    fn fake_agent_script_runs_and_echoes() {
        let dir = TempDir::new().unwrap();
        let path = write_fake_agent_script(dir.path(), "fake.sh", "hello", 0);
        let output = Command::new(&path)
            .stdin(std::process::Stdio::piped())
            .output()
            .unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }
}
