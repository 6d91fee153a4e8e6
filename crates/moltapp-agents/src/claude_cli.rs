use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::AgentError;

/// Stderr beyond this many characters is cut from error messages.
const MAX_STDERR_CHARS: usize = 500;

/// How one agent reaches the `claude` CLI.
#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    /// Executable to run. Overridable so tests can stand in a fake binary.
    pub program: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Ask the CLI for one trading decision. Returns raw stdout.
///
/// The child process is killed when the timeout fires or the caller's
/// future is dropped.
pub async fn invoke_claude(
    agent_id: &str,
    system_prompt: &str,
    user_prompt: &str,
    config: &ClaudeCliConfig,
) -> Result<String, AgentError> {
    let started = Instant::now();
    debug!(agent = agent_id, model = %config.model, "Requesting decision from claude CLI");

    let mut command = Command::new(&config.program);
    command
        .args(["-p", user_prompt])
        .args(["--system-prompt", system_prompt])
        .args(["--model", &config.model])
        .args(["--output-format", "text"])
        .kill_on_drop(true);

    let output = tokio::time::timeout(config.timeout, command.output())
        .await
        .map_err(|_| AgentError::Timeout(config.timeout.as_secs()))?
        .map_err(|e| AgentError::Cli(format!("Failed to spawn {}: {e}", config.program)))?;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
        warn!(agent = agent_id, status = %output.status, elapsed_ms, %stderr, "claude CLI failed");
        return Err(AgentError::Cli(format!(
            "{} exited {}: {stderr}",
            config.program, output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if stdout.trim().is_empty() {
        return Err(AgentError::Cli("empty response".to_string()));
    }

    debug!(agent = agent_id, elapsed_ms, bytes = stdout.len(), "claude CLI responded");
    Ok(stdout)
}

/// Whether `program --version` runs successfully.
pub async fn check_cli_available(program: &str) -> bool {
    match Command::new(program).arg("--version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake(program: &str) -> ClaudeCliConfig {
        ClaudeCliConfig {
            program: program.to_string(),
            ..ClaudeCliConfig::default()
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_cli_error() {
        let err = invoke_claude("claude", "sys", "user", &fake("moltapp-no-such-binary"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cli(ref m) if m.starts_with("Failed to spawn")));
        assert!(!check_cli_available("moltapp-no-such-binary").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_a_cli_error() {
        let err = invoke_claude("claude", "sys", "user", &fake("false"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cli(ref m) if m.contains("exited")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_is_returned_verbatim() {
        // `echo` prints its arguments, so the prompt comes back.
        let out = invoke_claude("claude", "sys", "BUY AAPLx", &fake("echo"))
            .await
            .unwrap();
        assert!(out.contains("BUY AAPLx"));
        assert!(out.contains("--system-prompt sys"));
    }
}
