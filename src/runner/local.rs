use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use super::dockerfile::{detect_language, install_command_for, start_command_for};
use super::types::{
    BuildResult, BuildStatus, CleanupRegistry, DeploymentConfig, DeploymentResult,
    DeploymentStatus, ExecutionResult, Resource,
};
use super::{wait_for_health, Runner};
use crate::sandbox;

/// Runs submissions as plain host processes. The "image" is the prepared
/// source tree itself; deploy spawns the start command with PORT set.
pub struct LocalRunner {
    workspace: PathBuf,
    registry: CleanupRegistry,
    children: Vec<(String, Child)>,
    source_dir: Option<PathBuf>,
}

impl LocalRunner {
    pub fn new(workspace: PathBuf) -> Self {
        Self {
            workspace,
            registry: CleanupRegistry::new(),
            children: Vec::new(),
            source_dir: None,
        }
    }

    fn log_path(&self, instance_id: &str) -> PathBuf {
        self.workspace.join(format!("{}.log", instance_id))
    }
}

#[async_trait]
impl Runner for LocalRunner {
    async fn build(
        &mut self,
        submission_path: &Path,
        _dockerfile_path: Option<&Path>,
        timeout: Duration,
    ) -> BuildResult {
        let start = Instant::now();

        if !submission_path.is_dir() {
            return BuildResult::error(
                format!("submission path {} not found", submission_path.display()),
                start.elapsed().as_millis() as u64,
            );
        }

        // Dependency install is the whole build for a process deployment.
        let install = detect_language(submission_path).and_then(install_command_for);
        if let Some(cmd) = install {
            info!(command = %cmd, "Installing submission dependencies");
            let output = match sandbox::run_shell(cmd, Some(submission_path), timeout, &[]).await {
                Ok(o) => o,
                Err(e) => {
                    return BuildResult::error(
                        format!("{:#}", e),
                        start.elapsed().as_millis() as u64,
                    )
                }
            };
            let duration_ms = start.elapsed().as_millis() as u64;
            if output.timed_out {
                return BuildResult::timeout(duration_ms);
            }
            if output.exit_code != 0 {
                return BuildResult::failed(
                    format!("install exited {}", output.exit_code),
                    output.stderr,
                    duration_ms,
                );
            }
        }

        self.source_dir = Some(submission_path.to_path_buf());
        BuildResult {
            status: BuildStatus::Success,
            image_id: Some(submission_path.to_string_lossy().to_string()),
            logs: String::new(),
            error: None,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn deploy(&mut self, config: &DeploymentConfig) -> DeploymentResult {
        let source_dir = PathBuf::from(&config.image);
        if !source_dir.is_dir() {
            return DeploymentResult::failed(format!(
                "artifact directory {} not found",
                source_dir.display()
            ));
        }

        let start_command = config
            .start_command
            .clone()
            .or_else(|| detect_language(&source_dir).map(|l| start_command_for(l).to_string()));
        let Some(start_command) = start_command else {
            return DeploymentResult::failed("no start command and language not detected");
        };

        let host_port = match config.host_port.map(Ok).unwrap_or_else(sandbox::allocate_host_port)
        {
            Ok(p) => p,
            Err(e) => return DeploymentResult::failed(format!("{:#}", e)),
        };

        let instance_id = format!("local-{}", uuid::Uuid::new_v4().simple());
        let log_file = match std::fs::File::create(self.log_path(&instance_id)) {
            Ok(f) => f,
            Err(e) => return DeploymentResult::failed(format!("cannot create log file: {}", e)),
        };
        let log_file_err = match log_file.try_clone() {
            Ok(f) => f,
            Err(e) => return DeploymentResult::failed(format!("cannot clone log handle: {}", e)),
        };

        info!(
            instance_id = %instance_id,
            command = %start_command,
            port = %host_port,
            "Spawning local process"
        );

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&start_command)
            .current_dir(&source_dir)
            .env("PORT", host_port.to_string())
            .stdout(std::process::Stdio::from(log_file))
            .stderr(std::process::Stdio::from(log_file_err))
            .process_group(0)
            .kill_on_drop(true);
        for (key, value) in &config.environment {
            cmd.env(key, value);
        }

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return DeploymentResult::failed(format!("failed to spawn: {}", e)),
        };

        if let Some(pid) = child.id() {
            self.registry.register(Resource::Process(pid));
        }
        self.children.push((instance_id.clone(), child));

        let service_url = format!("http://127.0.0.1:{}", host_port);

        if let Some(health) = &config.health_check {
            let url = format!("{}{}", service_url, health.path);
            if !wait_for_health(&url, health.timeout, health.interval).await {
                return DeploymentResult {
                    status: DeploymentStatus::Failed,
                    container_id: Some(instance_id),
                    service_url: Some(service_url),
                    error: Some(format!(
                        "health check {} did not return 200 within {}s",
                        url,
                        health.timeout.as_secs()
                    )),
                };
            }
        }

        DeploymentResult {
            status: DeploymentStatus::Ready,
            container_id: Some(instance_id),
            service_url: Some(service_url),
            error: None,
        }
    }

    async fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
        _container_id: Option<&str>,
    ) -> ExecutionResult {
        // CLI test commands run against the prepared source tree.
        let cwd = self.source_dir.clone().unwrap_or_else(|| self.workspace.clone());
        match sandbox::run_shell(command, Some(&cwd), timeout, &[]).await {
            Ok(output) => output.into(),
            Err(e) => ExecutionResult::spawn_error(format!("{:#}", e)),
        }
    }

    async fn get_logs(&self, container_id: &str, tail: usize) -> Vec<String> {
        match tokio::fs::read_to_string(self.log_path(container_id)).await {
            Ok(content) => {
                let lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
                let skip = lines.len().saturating_sub(tail);
                lines.into_iter().skip(skip).collect()
            }
            Err(_) => Vec::new(),
        }
    }

    async fn cleanup(&mut self) {
        // Newest process first, mirroring the registry's LIFO contract.
        for (instance_id, mut child) in self.children.drain(..).rev() {
            if let Err(e) = child.start_kill() {
                warn!(instance_id = %instance_id, error = %e, "Failed to kill process");
                continue;
            }
            let _ = child.wait().await;
            info!(instance_id = %instance_id, "Stopped local process");
        }

        for resource in self.registry.drain_lifo() {
            match resource {
                // Killed above via the child handle.
                Resource::Process(pid) => {
                    tracing::debug!(pid = %pid, "Process teardown handled");
                }
                Resource::WorkDir(path) => {
                    if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                        warn!(path = %path.display(), error = %e, "Failed to remove work dir");
                    }
                }
                other => {
                    warn!(resource = ?other, "Unexpected resource kind for local runner");
                }
            }
        }
    }
}
