use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::dockerfile::{detect_language, dockerfile_for};
use super::types::{
    BuildResult, BuildStatus, CleanupRegistry, DeploymentConfig, DeploymentResult,
    DeploymentStatus, ExecutionResult, Resource,
};
use super::{wait_for_health, Runner};
use crate::sandbox;

const DOCKER_OP_TIMEOUT: Duration = Duration::from_secs(60);
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs submissions as Docker containers via the docker CLI.
pub struct DockerRunner {
    workspace: PathBuf,
    registry: CleanupRegistry,
    last_container: Option<String>,
}

impl DockerRunner {
    pub fn new(workspace: PathBuf) -> Self {
        Self {
            workspace,
            registry: CleanupRegistry::new(),
            last_container: None,
        }
    }
}

/// Pick the Dockerfile to build with: caller-supplied, one already in the
/// tree, or a synthesized per-language template written to the workspace.
/// Shared with the Kubernetes backend, which also builds via the docker CLI.
pub(crate) async fn resolve_dockerfile(
    workspace: &Path,
    submission_path: &Path,
    dockerfile_path: Option<&Path>,
) -> Result<PathBuf, String> {
    if let Some(path) = dockerfile_path {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(format!("dockerfile {} not found", path.display()));
    }

    let in_tree = submission_path.join("Dockerfile");
    if in_tree.is_file() {
        return Ok(in_tree);
    }

    let language = detect_language(submission_path)
        .ok_or_else(|| "no Dockerfile and no recognizable build manifest".to_string())?;
    info!(language = %language.as_str(), "Synthesizing Dockerfile");

    let generated = workspace.join("Dockerfile.generated");
    tokio::fs::write(&generated, dockerfile_for(language))
        .await
        .map_err(|e| format!("failed to write generated Dockerfile: {}", e))?;
    Ok(generated)
}

/// Build the submission into an image tag via `docker build`. The caller
/// registers the returned tag for cleanup.
pub(crate) async fn build_image(
    workspace: &Path,
    submission_path: &Path,
    dockerfile_path: Option<&Path>,
    timeout: Duration,
) -> BuildResult {
    let start = Instant::now();

    if !submission_path.is_dir() {
        return BuildResult::error(
            format!("submission path {} not found", submission_path.display()),
            start.elapsed().as_millis() as u64,
        );
    }

    let dockerfile = match resolve_dockerfile(workspace, submission_path, dockerfile_path).await {
        Ok(path) => path,
        Err(e) => return BuildResult::failed(e, "", start.elapsed().as_millis() as u64),
    };

    let tag = format!("req2run/{}", uuid::Uuid::new_v4().simple());
    let context = submission_path.to_string_lossy().to_string();
    let dockerfile_arg = dockerfile.to_string_lossy().to_string();

    info!(tag = %tag, context = %context, "Building image");
    let output = match sandbox::run_argv(
        &["docker", "build", "-t", &tag, "-f", &dockerfile_arg, &context],
        None,
        timeout,
        &[],
    )
    .await
    {
        Ok(o) => o,
        Err(e) => {
            return BuildResult::error(format!("{:#}", e), start.elapsed().as_millis() as u64)
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    if output.timed_out {
        return BuildResult::timeout(duration_ms);
    }
    if output.exit_code != 0 {
        return BuildResult::failed(
            format!("docker build exited {}", output.exit_code),
            output.stderr,
            duration_ms,
        );
    }

    BuildResult {
        status: BuildStatus::Success,
        image_id: Some(tag),
        logs: output.stdout,
        error: None,
        duration_ms,
    }
}

#[async_trait]
impl Runner for DockerRunner {
    async fn build(
        &mut self,
        submission_path: &Path,
        dockerfile_path: Option<&Path>,
        timeout: Duration,
    ) -> BuildResult {
        let result = build_image(&self.workspace, submission_path, dockerfile_path, timeout).await;
        if let Some(tag) = &result.image_id {
            self.registry.register(Resource::Image(tag.clone()));
        }
        result
    }

    async fn deploy(&mut self, config: &DeploymentConfig) -> DeploymentResult {
        let host_port = match config.host_port.map(Ok).unwrap_or_else(sandbox::allocate_host_port)
        {
            Ok(p) => p,
            Err(e) => return DeploymentResult::failed(format!("{:#}", e)),
        };

        let mut args: Vec<String> = vec![
            "docker".into(),
            "run".into(),
            "-d".into(),
            "--name".into(),
            config.name.clone(),
            "-p".into(),
            format!("{}:{}", host_port, config.container_port),
        ];
        for (key, value) in &config.environment {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        args.push("-e".into());
        args.push(format!("PORT={}", config.container_port));
        for volume in &config.volumes {
            args.push("-v".into());
            args.push(volume.clone());
        }
        if let Some(mem) = config.memory_limit_mb {
            args.push("--memory".into());
            args.push(format!("{}m", mem));
        }
        if let Some(cpus) = config.cpu_limit {
            args.push("--cpus".into());
            args.push(format!("{}", cpus));
        }
        args.push(config.image.clone());

        let argv: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        info!(name = %config.name, host_port = %host_port, "Starting container");
        let output = match sandbox::run_argv(&argv, None, DOCKER_OP_TIMEOUT, &[]).await {
            Ok(o) => o,
            Err(e) => return DeploymentResult::failed(format!("{:#}", e)),
        };

        if !output.success() {
            return DeploymentResult::failed(format!(
                "docker run exited {}: {}",
                output.exit_code, output.stderr
            ));
        }

        let container_id = output.stdout.trim().to_string();
        // Registered before the health check so a failed probe still tears
        // the container down.
        self.registry
            .register(Resource::Container(container_id.clone()));
        self.last_container = Some(container_id.clone());

        let service_url = format!("http://127.0.0.1:{}", host_port);

        if let Some(health) = &config.health_check {
            let url = format!("{}{}", service_url, health.path);
            if !wait_for_health(&url, health.timeout, health.interval).await {
                return DeploymentResult {
                    status: DeploymentStatus::Failed,
                    container_id: Some(container_id),
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
            container_id: Some(container_id),
            service_url: Some(service_url),
            error: None,
        }
    }

    async fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
        container_id: Option<&str>,
    ) -> ExecutionResult {
        let target = container_id
            .map(|s| s.to_string())
            .or_else(|| self.last_container.clone());
        let Some(target) = target else {
            return ExecutionResult::spawn_error("no running container to execute in");
        };

        match sandbox::run_argv(
            &["docker", "exec", &target, "sh", "-c", command],
            None,
            timeout,
            &[],
        )
        .await
        {
            Ok(output) => output.into(),
            Err(e) => ExecutionResult::spawn_error(format!("{:#}", e)),
        }
    }

    async fn get_logs(&self, container_id: &str, tail: usize) -> Vec<String> {
        let tail_arg = tail.to_string();
        match sandbox::run_argv(
            &["docker", "logs", "--tail", &tail_arg, container_id],
            None,
            DOCKER_OP_TIMEOUT,
            &[],
        )
        .await
        {
            Ok(output) => output
                .stdout
                .lines()
                .chain(output.stderr.lines())
                .map(|l| l.to_string())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn cleanup(&mut self) {
        for resource in self.registry.drain_lifo() {
            let result = match &resource {
                Resource::Container(id) => {
                    sandbox::run_argv(&["docker", "rm", "-f", id], None, TEARDOWN_TIMEOUT, &[])
                        .await
                }
                Resource::Image(tag) => {
                    sandbox::run_argv(&["docker", "rmi", "-f", tag], None, TEARDOWN_TIMEOUT, &[])
                        .await
                }
                Resource::WorkDir(path) => {
                    if let Err(e) = tokio::fs::remove_dir_all(path).await {
                        warn!(path = %path.display(), error = %e, "Failed to remove work dir");
                    }
                    continue;
                }
                other => {
                    warn!(resource = ?other, "Unexpected resource kind for docker runner");
                    continue;
                }
            };

            match result {
                Ok(out) if !out.success() => {
                    warn!(resource = ?resource, stderr = %out.stderr, "Teardown command failed");
                }
                Err(e) => {
                    warn!(resource = ?resource, error = %e, "Teardown command did not run");
                }
                _ => {}
            }
        }
        self.last_container = None;
    }
}
