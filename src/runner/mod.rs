pub mod docker;
pub mod dockerfile;
pub mod kubernetes;
pub mod local;
pub mod types;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub use types::{
    BuildResult, BuildStatus, CleanupRegistry, DeploymentConfig, DeploymentResult,
    DeploymentStatus, ExecutionResult, HealthCheck, Resource,
};

/// Execution backend selected by an environment string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Docker,
    Kubernetes,
    Local,
}

impl Backend {
    pub fn from_str_loose(s: &str) -> Option<Backend> {
        match s.to_lowercase().as_str() {
            "docker" => Some(Backend::Docker),
            "kubernetes" | "k8s" => Some(Backend::Kubernetes),
            "local" | "process" => Some(Backend::Local),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Docker => "docker",
            Backend::Kubernetes => "kubernetes",
            Backend::Local => "local",
        }
    }
}

/// The backend contract. Every method maps backend faults to typed result
/// fields; nothing here returns an error the Evaluator would have to catch.
///
/// A Runner instance is owned by exactly one evaluation run. It registers
/// everything it creates and tears all of it down in `cleanup`, newest first,
/// tolerating individual teardown failures. `cleanup` is idempotent.
#[async_trait]
pub trait Runner: Send {
    /// Build the submission into a runnable artifact. When no Dockerfile is
    /// supplied and none exists in the tree, container backends auto-detect
    /// the language and synthesize one.
    async fn build(
        &mut self,
        submission_path: &Path,
        dockerfile_path: Option<&Path>,
        timeout: Duration,
    ) -> BuildResult;

    /// Start the built artifact. Registers the instance for cleanup before
    /// any health check runs, so a failed health check still tears down.
    async fn deploy(&mut self, config: &DeploymentConfig) -> DeploymentResult;

    /// Run a one-shot command against the running instance.
    async fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
        container_id: Option<&str>,
    ) -> ExecutionResult;

    /// Best-effort log retrieval; empty on any failure.
    async fn get_logs(&self, container_id: &str, tail: usize) -> Vec<String>;

    /// Tear down every resource this runner created, LIFO. Idempotent.
    async fn cleanup(&mut self);
}

/// Build a runner for the chosen backend. Each run gets its own instance
/// with its own cleanup registry; nothing is shared between runs.
pub fn create_runner(backend: Backend, workspace: PathBuf) -> Box<dyn Runner> {
    info!(backend = %backend.as_str(), "Creating runner");
    match backend {
        Backend::Docker => Box::new(docker::DockerRunner::new(workspace)),
        Backend::Kubernetes => Box::new(kubernetes::KubernetesRunner::new(workspace)),
        Backend::Local => Box::new(local::LocalRunner::new(workspace)),
    }
}

/// Poll an HTTP endpoint until it returns 200 or the timeout elapses.
pub(crate) async fn wait_for_health(url: &str, timeout: Duration, interval: Duration) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(c) => c,
        Err(_) => return false,
    };

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match client.get(url).send().await {
            Ok(resp) if resp.status().as_u16() == 200 => {
                debug!(url = %url, "Health check passed");
                return true;
            }
            Ok(resp) => {
                debug!(url = %url, status = %resp.status(), "Health check not ready");
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Health check connection failed");
            }
        }
        if tokio::time::Instant::now() + interval > deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_str() {
        assert_eq!(Backend::from_str_loose("docker"), Some(Backend::Docker));
        assert_eq!(Backend::from_str_loose("K8S"), Some(Backend::Kubernetes));
        assert_eq!(
            Backend::from_str_loose("kubernetes"),
            Some(Backend::Kubernetes)
        );
        assert_eq!(Backend::from_str_loose("local"), Some(Backend::Local));
        assert_eq!(Backend::from_str_loose("vmware"), None);
    }

    #[test]
    fn test_create_runner_all_backends() {
        let tmp = tempfile::tempdir().unwrap();
        for backend in [Backend::Docker, Backend::Kubernetes, Backend::Local] {
            let _runner = create_runner(backend, tmp.path().to_path_buf());
        }
    }

    #[tokio::test]
    async fn test_wait_for_health_unreachable() {
        // Nothing listens on this port; must return false within the timeout.
        let ok = wait_for_health(
            "http://127.0.0.1:1/health",
            Duration::from_millis(300),
            Duration::from_millis(100),
        )
        .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_cleanup_idempotent_on_fresh_runner() {
        // A runner that never built or deployed anything cleans up safely,
        // twice.
        let tmp = tempfile::tempdir().unwrap();
        let mut runner = create_runner(Backend::Local, tmp.path().to_path_buf());
        runner.cleanup().await;
        runner.cleanup().await;
    }
}
