//! Command execution for claimed jobs.

use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::debug;

use crate::model::Job;

/// Result of running a job's command once.
#[derive(Debug, Clone)]
pub struct Execution {
    pub success: bool,
    /// `None` when the process was killed by a signal or never started.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl Execution {
    /// Short human-readable failure reason.
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        match self.exit_code {
            Some(code) if stderr.is_empty() => format!("exited with status {code}"),
            Some(code) => format!("exited with status {code}: {stderr}"),
            None if stderr.is_empty() => "terminated without exit status".to_string(),
            None => stderr.to_string(),
        }
    }
}

/// Runs job commands through a shell, capturing output.
///
/// There is no timeout: a command that never exits holds its worker forever.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: String,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl CommandExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Run `job.command` as attempt number `attempt`.
    ///
    /// Never fails: a command that cannot be spawned is reported as an
    /// unsuccessful execution so the retry policy handles it like any other
    /// failure.
    pub async fn execute(&self, job: &Job, attempt: u32) -> Execution {
        let start = Instant::now();

        debug!(job_id = %job.id, shell = %self.shell, command = %job.command, "spawning command");

        let result = Command::new(&self.shell)
            .arg("-c")
            .arg(&job.command)
            .env("QUEUECTL_JOB_ID", job.id.as_str())
            .env("QUEUECTL_ATTEMPT", attempt.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => Execution {
                success: output.status.success(),
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                duration_ms,
            },
            Err(e) => Execution {
                success: false,
                exit_code: None,
                stdout: String::new(),
                stderr: format!("failed to spawn {}: {e}", self.shell),
                duration_ms,
            },
        }
    }
}
