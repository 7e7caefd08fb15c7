use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

const MAX_OUTPUT_DEFAULT: usize = 1024 * 1024; // 1MB

/// Captured output of a finished (or timed-out) subprocess.
///
/// stdout and stderr are always kept separate; a timeout never surfaces as an
/// error, it sets `timed_out` with exit code -1 so callers can map it to a
/// typed status instead of unwinding.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    fn timeout(secs: u64) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("command timed out after {}s", secs),
            exit_code: -1,
            timed_out: true,
        }
    }
}

fn truncate_output(raw: &[u8], max: usize) -> String {
    if raw.len() <= max {
        String::from_utf8_lossy(raw).to_string()
    } else {
        let t = String::from_utf8_lossy(&raw[..max]).to_string();
        format!("{}\n\n... [truncated at {} bytes, total {}]", t, max, raw.len())
    }
}

/// Run an argv-style command with a hard timeout.
///
/// Returns `Err` only when the process cannot be spawned (missing binary,
/// bad cwd). A non-zero exit or a timeout is a normal `CommandOutput`.
pub async fn run_argv(
    argv: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
    env: &[(String, String)],
) -> Result<CommandOutput> {
    let (program, args) = argv.split_first().context("empty argv")?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        // New process group so the whole tree dies with the child.
        .process_group(0)
        .kill_on_drop(true);

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (k, v) in env {
        cmd.env(k, v);
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {}", program))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            stdout: truncate_output(&output.stdout, MAX_OUTPUT_DEFAULT),
            stderr: truncate_output(&output.stderr, MAX_OUTPUT_DEFAULT),
            exit_code: output.status.code().unwrap_or(-1),
            timed_out: false,
        }),
        Ok(Err(e)) => Err(anyhow::anyhow!("process error: {}", e)),
        Err(_) => {
            warn!(
                program = %program,
                timeout_secs = %timeout.as_secs(),
                "Command timed out"
            );
            Ok(CommandOutput::timeout(timeout.as_secs()))
        }
    }
}

/// Run a shell string via `sh -c`.
pub async fn run_shell(
    shell_cmd: &str,
    cwd: Option<&Path>,
    timeout: Duration,
    env: &[(String, String)],
) -> Result<CommandOutput> {
    run_argv(&["sh", "-c", shell_cmd], cwd, timeout, env).await
}

/// Ask the OS for a free TCP port. Deployments bind host ports from here so
/// concurrent evaluations cannot collide on a fixed port range.
pub fn allocate_host_port() -> Result<u16> {
    let listener =
        std::net::TcpListener::bind(("127.0.0.1", 0)).context("failed to probe for a free port")?;
    let port = listener.local_addr().context("no local addr")?.port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_argv_captures_streams_separately() {
        let tmp = tempfile::tempdir().unwrap();
        let out = run_shell(
            "echo out; echo err >&2",
            Some(tmp.path()),
            Duration::from_secs(5),
            &[],
        )
        .await
        .unwrap();
        assert_eq!(out.exit_code, 0);
        assert!(out.stdout.contains("out"));
        assert!(out.stderr.contains("err"));
        assert!(!out.stdout.contains("err"));
    }

    #[tokio::test]
    async fn test_run_argv_timeout_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let out = run_argv(
            &["sleep", "10"],
            Some(tmp.path()),
            Duration::from_millis(100),
            &[],
        )
        .await
        .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.exit_code, -1);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_run_argv_nonzero_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let out = run_argv(&["false"], Some(tmp.path()), Duration::from_secs(5), &[])
            .await
            .unwrap();
        assert_ne!(out.exit_code, 0);
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn test_run_argv_missing_binary_is_error() {
        let result = run_argv(
            &["definitely_not_a_real_binary_xyz"],
            None,
            Duration::from_secs(5),
            &[],
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_shell_env_passthrough() {
        let out = run_shell(
            "echo $REQ2RUN_TEST_VAR",
            None,
            Duration::from_secs(5),
            &[("REQ2RUN_TEST_VAR".to_string(), "marker-42".to_string())],
        )
        .await
        .unwrap();
        assert!(out.stdout.contains("marker-42"));
    }

    #[test]
    fn test_truncate_output() {
        let small = vec![b'A'; 100];
        assert_eq!(truncate_output(&small, 1024).len(), 100);

        let big = vec![b'B'; 2048];
        let t = truncate_output(&big, 1024);
        assert!(t.contains("truncated"));
        assert!(t.len() < 2048);
    }

    #[test]
    fn test_allocate_host_port() {
        let port = allocate_host_port().unwrap();
        assert!(port > 0);
    }
}
