//! Bounded external command execution.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use clawdis_ipc::Response;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Runs one external process per call: no retry, no reuse.
#[derive(Debug, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        ProcessExecutor
    }

    /// Spawn `command` and wait for completion or timeout.
    ///
    /// The working directory and environment are applied verbatim; a given
    /// environment replaces the ambient one rather than merging into it.
    /// On timeout the child is killed fire-and-forget and the call returns
    /// without waiting for the reaped exit.
    pub async fn run(
        &self,
        command: &[String],
        cwd: Option<&str>,
        env: Option<&BTreeMap<String, String>>,
        timeout_seconds: Option<f64>,
    ) -> Response {
        let Some(program) = command.first() else {
            return Response::failure("empty command");
        };

        let mut cmd = Command::new(program);
        cmd.args(&command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = env {
            cmd.env_clear().envs(env);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => return Response::failure(format!("failed to start: {err}")),
        };

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        let out_task = tokio::spawn(read_to_end(stdout));
        let err_task = tokio::spawn(read_to_end(stderr));

        let status = match timeout_seconds.filter(|secs| *secs > 0.0) {
            Some(secs) => {
                let limit = Duration::from_secs_f64(secs);
                match tokio::time::timeout(limit, child.wait()).await {
                    Ok(waited) => waited,
                    Err(_) => {
                        warn!(command = %program, timeout_secs = secs, "command timed out");
                        terminate(child);
                        out_task.abort();
                        err_task.abort();
                        return Response::failure("timeout");
                    }
                }
            }
            None => child.wait().await,
        };

        let status = match status {
            Ok(status) => status,
            Err(err) => return Response::failure(format!("wait failed: {err}")),
        };

        let stdout = out_task.await.unwrap_or_default();
        let stderr = err_task.await.unwrap_or_default();
        // Stdout wins when present; stderr is the fallback, never both.
        let combined = if stdout.is_empty() { stderr } else { stdout };
        let payload = if combined.is_empty() {
            None
        } else {
            Some(combined)
        };

        let code = status.code().unwrap_or(-1);
        debug!(command = %program, code, "command finished");
        Response {
            ok: code == 0,
            message: if code == 0 {
                None
            } else {
                Some(format!("exit {code}"))
            },
            payload,
        }
    }
}

async fn read_to_end(mut source: impl AsyncReadExt + Unpin) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = source.read_to_end(&mut buf).await;
    buf
}

/// Kill the child and reap it in the background so the caller can return
/// immediately.
fn terminate(mut child: Child) {
    if let Err(err) = child.start_kill() {
        warn!("failed to kill timed-out process: {err}");
        return;
    }
    tokio::spawn(async move {
        let _ = child.wait().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn empty_command_fails_without_spawning() {
        let executor = ProcessExecutor::new();
        let response = executor.run(&[], Some("/nonexistent"), None, Some(5.0)).await;
        assert!(!response.ok);
        assert_eq!(response.message.as_deref(), Some("empty command"));
        assert!(response.payload.is_none());
    }

    #[tokio::test]
    async fn clean_exit_has_no_message() {
        let executor = ProcessExecutor::new();
        let response = executor
            .run(&["true".to_string()], None, None, None)
            .await;
        assert!(response.ok);
        assert_eq!(response.message, None);
        assert!(response.payload.is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let executor = ProcessExecutor::new();
        let response = executor
            .run(&["false".to_string()], None, None, None)
            .await;
        assert!(!response.ok);
        assert_eq!(response.message.as_deref(), Some("exit 1"));
    }

    #[tokio::test]
    async fn unknown_program_fails_to_start() {
        let executor = ProcessExecutor::new();
        let response = executor
            .run(&["definitely-not-a-real-binary-4021".to_string()], None, None, None)
            .await;
        assert!(!response.ok);
        assert!(response
            .message
            .as_deref()
            .unwrap_or_default()
            .starts_with("failed to start: "));
    }

    #[tokio::test]
    async fn stdout_is_preferred_over_stderr() {
        let executor = ProcessExecutor::new();
        let response = executor
            .run(
                &[
                    "sh".to_string(),
                    "-c".to_string(),
                    "echo out; echo err >&2".to_string(),
                ],
                None,
                None,
                None,
            )
            .await;
        assert!(response.ok);
        assert_eq!(response.payload.as_deref(), Some(&b"out\n"[..]));
    }

    #[tokio::test]
    async fn stderr_is_the_fallback_payload() {
        let executor = ProcessExecutor::new();
        let response = executor
            .run(
                &[
                    "sh".to_string(),
                    "-c".to_string(),
                    "echo oops >&2; exit 3".to_string(),
                ],
                None,
                None,
                None,
            )
            .await;
        assert!(!response.ok);
        assert_eq!(response.message.as_deref(), Some("exit 3"));
        assert_eq!(response.payload.as_deref(), Some(&b"oops\n"[..]));
    }

    #[tokio::test]
    async fn environment_replaces_rather_than_merges() {
        let executor = ProcessExecutor::new();
        let env: BTreeMap<_, _> = [
            ("CLAWDIS_MARKER".to_string(), "present".to_string()),
            ("PATH".to_string(), "/usr/bin:/bin".to_string()),
        ]
        .into();
        let response = executor
            .run(
                &["sh".to_string(), "-c".to_string(), "env".to_string()],
                None,
                Some(&env),
                None,
            )
            .await;
        assert!(response.ok);
        let output = String::from_utf8(response.payload.unwrap()).unwrap();
        assert!(output.contains("CLAWDIS_MARKER=present"));
        assert!(!output.contains("HOME="));
    }

    #[tokio::test]
    async fn working_directory_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ProcessExecutor::new();
        let response = executor
            .run(
                &["pwd".to_string()],
                Some(dir.path().to_str().unwrap()),
                None,
                None,
            )
            .await;
        assert!(response.ok);
        let output = String::from_utf8(response.payload.unwrap()).unwrap();
        let reported = std::fs::canonicalize(output.trim()).unwrap();
        let expected = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(reported, expected);
    }

    fn process_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn timeout_kills_the_child_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("echo $$ > {}; sleep 30", pid_file.display());

        let executor = ProcessExecutor::new();
        let started = Instant::now();
        let response = executor
            .run(
                &["sh".to_string(), "-c".to_string(), script],
                None,
                None,
                Some(0.3),
            )
            .await;
        let elapsed = started.elapsed();

        assert!(!response.ok);
        assert_eq!(response.message.as_deref(), Some("timeout"));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(5), "timeout path hung: {elapsed:?}");

        // The shell is killed, not left behind.
        let pid: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        for _ in 0..50 {
            if !process_alive(pid) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!process_alive(pid), "timed-out child {pid} is still running");
    }

    #[tokio::test]
    async fn fast_commands_do_not_wait_out_the_timeout() {
        let executor = ProcessExecutor::new();
        let started = Instant::now();
        let response = executor
            .run(&["true".to_string()], None, None, Some(10.0))
            .await;
        assert!(response.ok);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
