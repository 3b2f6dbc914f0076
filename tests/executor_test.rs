//! Integration tests for command execution.

use queuectl::model::*;
use queuectl::worker::CommandExecutor;

fn job(command: &str) -> Job {
    let now = timestamp_now();
    Job {
        id: JobId::from("exec-test"),
        command: command.to_string(),
        state: State::Processing,
        attempts: 0,
        max_retries: 3,
        created_at: now,
        updated_at: now,
        run_at: now,
    }
}

#[tokio::test]
async fn captures_stdout_on_success() {
    let execution = CommandExecutor::default()
        .execute(&job("echo hello"), 1)
        .await;

    assert!(execution.success);
    assert_eq!(execution.exit_code, Some(0));
    assert_eq!(execution.stdout.trim(), "hello");
    assert!(execution.stderr.is_empty());
}

#[tokio::test]
async fn nonzero_exit_is_a_failure() {
    let execution = CommandExecutor::default()
        .execute(&job("echo boom >&2; exit 3"), 1)
        .await;

    assert!(!execution.success);
    assert_eq!(execution.exit_code, Some(3));
    assert_eq!(execution.stderr.trim(), "boom");
    assert_eq!(execution.failure_reason(), "exited with status 3: boom");
}

#[tokio::test]
async fn unknown_command_fails_through_the_shell() {
    let execution = CommandExecutor::default()
        .execute(&job("queuectl-definitely-not-a-command"), 1)
        .await;

    assert!(!execution.success);
    assert_eq!(execution.exit_code, Some(127));
}

#[tokio::test]
async fn missing_shell_is_reported_not_raised() {
    let execution = CommandExecutor::new("/nonexistent/queuectl-shell")
        .execute(&job("true"), 1)
        .await;

    assert!(!execution.success);
    assert_eq!(execution.exit_code, None);
    assert!(execution.failure_reason().contains("failed to spawn"));
}

#[tokio::test]
async fn attempt_number_is_exported() {
    let execution = CommandExecutor::default()
        .execute(&job(r#"printf '%s/%s' "$QUEUECTL_JOB_ID" "$QUEUECTL_ATTEMPT""#), 2)
        .await;

    assert!(execution.success);
    assert_eq!(execution.stdout, "exec-test/2");
}
