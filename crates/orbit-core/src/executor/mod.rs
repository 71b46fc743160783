//! Agent Executor: runs a single agent kind for one task or one raw prompt.

pub mod manager;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::classifier::{self, Category};

/// Which output-extraction strategy a given agent kind uses. Fixed at
/// compile time per kind; never chosen by runtime dispatch on a trait
/// object per kind (see the REDESIGN notes on extractor polymorphism).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extractor {
    /// A single JSON envelope: `{"type": "result", "result": "..."}`.
    SingleEnvelope,
    /// A stream of JSON records; concatenate `type = "item.completed"`
    /// records whose `item.type` is `"agent_message"`.
    ItemStream,
    /// A stream of JSON messages; concatenate those with `role = "assistant"`.
    MessageStream,
}

impl Extractor {
    pub fn extract(&self, raw: &str) -> String {
        let extracted = match self {
            Extractor::SingleEnvelope => extract_single_envelope(raw),
            Extractor::ItemStream => extract_item_stream(raw),
            Extractor::MessageStream => extract_message_stream(raw),
        };
        match extracted {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                tracing::warn!(extractor = ?self, "output extraction failed, falling back to raw concatenation");
                raw.to_string()
            }
        }
    }
}

fn extract_single_envelope(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw.trim()).ok()?;
    if value.get("type")?.as_str()? == "result" {
        return value.get("result")?.as_str().map(str::to_string);
    }
    None
}

fn extract_item_stream(raw: &str) -> Option<String> {
    let mut out = String::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if value.get("type").and_then(|t| t.as_str()) != Some("item.completed") {
            continue;
        }
        let Some(item) = value.get("item") else { continue };
        if item.get("type").and_then(|t| t.as_str()) != Some("agent_message") {
            continue;
        }
        if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
            out.push_str(text);
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn extract_message_stream(raw: &str) -> Option<String> {
    let mut out = String::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if value.get("role").and_then(|r| r.as_str()) != Some("assistant") {
            continue;
        }
        if let Some(text) = value.get("content").and_then(|c| c.as_str()) {
            out.push_str(text);
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub exit_code: i32,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn classify(&self) -> Category {
        classifier::classify(&self.error.clone().unwrap_or_else(|| self.output.clone()), self.exit_code)
    }
}

/// Completion signal a Worker looks for in an agent's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSignal {
    Completed,
    Failed,
    Unknown,
}

pub fn detect_completion(output: &str) -> CompletionSignal {
    for line in output.lines() {
        let line = line.trim();
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
            match value.get("status").and_then(|s| s.as_str()) {
                Some("COMPLETED") => return CompletionSignal::Completed,
                Some("FAILED") => return CompletionSignal::Failed,
                _ => {}
            }
        }
    }
    let lower = output.to_lowercase();
    const KEYWORDS: &[&str] = &["completed", "successfully", "created file", "wrote file"];
    if KEYWORDS.iter().any(|k| lower.contains(k)) {
        CompletionSignal::Completed
    } else {
        CompletionSignal::Unknown
    }
}

/// One external agent binary: how to invoke it and how to read its output.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub kind: String,
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub extractor: Extractor,
    pub timeout: Duration,
    pub kill_grace: Duration,
}

impl AgentSpec {
    pub fn new(kind: impl Into<String>, binary: impl Into<PathBuf>, extractor: Extractor) -> Self {
        Self {
            kind: kind.into(),
            binary: binary.into(),
            args: Vec::new(),
            extractor,
            timeout: Duration::from_secs(300),
            kill_grace: Duration::from_secs(5),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout = d;
        self
    }

    pub fn binary_on_path(&self) -> bool {
        which(&self.binary).is_some()
    }
}

fn which(binary: &Path) -> Option<PathBuf> {
    if binary.is_absolute() {
        return binary.exists().then(|| binary.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Spawn the agent's subprocess with `prompt` on stdin, enforcing the
/// wall-clock timeout with SIGTERM-then-kill escalation.
pub async fn run(spec: &AgentSpec, prompt: &str, working_dir: &Path) -> ExecutionResult {
    let start = Instant::now();

    let mut child = match Command::new(&spec.binary)
        .args(&spec.args)
        .current_dir(working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return ExecutionResult {
                success: false,
                output: String::new(),
                error: Some(format!("failed to spawn {}: {e}", spec.kind)),
                exit_code: -1,
                duration: start.elapsed(),
            };
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(prompt.as_bytes()).await;
        // Dropping stdin here closes the handle so the child sees EOF.
    }

    let wait = async {
        let output = child.wait_with_output().await;
        output
    };

    match timeout(spec.timeout, wait).await {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let exit_code = output.status.code().unwrap_or(-1);
            let extracted = spec.extractor.extract(&stdout);
            ExecutionResult {
                success: output.status.success(),
                output: extracted,
                error: if stderr.trim().is_empty() { None } else { Some(stderr) },
                exit_code,
                duration: start.elapsed(),
            }
        }
        Ok(Err(e)) => ExecutionResult {
            success: false,
            output: String::new(),
            error: Some(format!("subprocess wait failed: {e}")),
            exit_code: -1,
            duration: start.elapsed(),
        },
        Err(_) => {
            tracing::warn!(kind = %spec.kind, timeout_secs = spec.timeout.as_secs(), "agent timed out, terminating");
            terminate(&mut child, spec.kill_grace).await;
            ExecutionResult {
                success: false,
                output: String::new(),
                error: Some("timed out".to_string()),
                exit_code: 124,
                duration: start.elapsed(),
            }
        }
    }
}

#[cfg(unix)]
async fn terminate(child: &mut tokio::process::Child, grace: Duration) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    if timeout(grace, child.wait()).await.is_err() {
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
async fn terminate(child: &mut tokio::process::Child, _grace: Duration) {
    let _ = child.start_kill();
}

/// Write the prompt and extracted/raw response to `<state_dir>/prompts/` for
/// operator debugging and reproducibility.
pub fn capture_debug(prompts_dir: &Path, kind: &str, ts: &str, prompt: &str, raw: &str, response: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(prompts_dir)?;
    std::fs::write(prompts_dir.join(format!("{kind}-{ts}-prompt.txt")), prompt)?;
    std::fs::write(prompts_dir.join(format!("{kind}-{ts}-raw.txt")), raw)?;
    std::fs::write(prompts_dir.join(format!("{kind}-{ts}-response.txt")), response)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_envelope_extracts_result_field() {
        let raw = r#"{"type":"result","result":"hello world"}"#;
        assert_eq!(Extractor::SingleEnvelope.extract(raw), "hello world");
    }

    #[test]
    fn item_stream_concatenates_agent_messages() {
        let raw = "{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"a\"}}\n\
                   {\"type\":\"item.completed\",\"item\":{\"type\":\"other\",\"text\":\"skip\"}}\n\
                   {\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"b\"}}";
        assert_eq!(Extractor::ItemStream.extract(raw), "ab");
    }

    #[test]
    fn message_stream_concatenates_assistant_role() {
        let raw = "{\"role\":\"user\",\"content\":\"skip\"}\n{\"role\":\"assistant\",\"content\":\"keep\"}";
        assert_eq!(Extractor::MessageStream.extract(raw), "keep");
    }

    #[test]
    fn falls_back_to_raw_on_parse_failure() {
        assert_eq!(Extractor::SingleEnvelope.extract("not json at all"), "not json at all");
    }

    #[test]
    fn detects_completed_status_json() {
        let out = "some log line\n{\"status\":\"COMPLETED\"}\nmore";
        assert_eq!(detect_completion(out), CompletionSignal::Completed);
    }

    #[test]
    fn detects_failed_status_json() {
        assert_eq!(detect_completion("{\"status\":\"FAILED\"}"), CompletionSignal::Failed);
    }

    #[test]
    fn falls_back_to_keyword_scan() {
        assert_eq!(detect_completion("I wrote file greet.rs successfully"), CompletionSignal::Completed);
    }

    #[test]
    fn unknown_when_no_signal_present() {
        assert_eq!(detect_completion("still thinking about it"), CompletionSignal::Unknown);
    }

    #[tokio::test]
    async fn run_invokes_fixture_script_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = orbit_test_utils::write_fake_agent_script(dir.path(), "fake", "{\"status\":\"COMPLETED\"}", 0);
        let spec = AgentSpec::new("fake", script, Extractor::SingleEnvelope);
        let result = run(&spec, "do the thing", dir.path()).await;
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn run_reports_timeout_on_slow_process() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow.sh");
        std::fs::write(&script, "#!/bin/sh\ncat >/dev/null\nsleep 5\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let spec = AgentSpec::new("slow", script, Extractor::SingleEnvelope).with_timeout(Duration::from_millis(100));
        let result = run(&spec, "prompt", dir.path()).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, 124);
    }
}
