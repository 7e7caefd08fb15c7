use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Success,
    Failed,
    Timeout,
    Error,
}

/// Outcome of turning a source tree into a runnable artifact. `image_id` is
/// opaque outside the backend that produced it: a Docker image tag, a local
/// filesystem path, or a registry reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub status: BuildStatus,
    pub image_id: Option<String>,
    pub logs: String,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl BuildResult {
    pub fn failed(error: impl Into<String>, logs: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: BuildStatus::Failed,
            image_id: None,
            logs: logs.into(),
            error: Some(error.into()),
            duration_ms,
        }
    }

    pub fn error(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: BuildStatus::Error,
            image_id: None,
            logs: String::new(),
            error: Some(error.into()),
            duration_ms,
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self {
            status: BuildStatus::Timeout,
            image_id: None,
            logs: String::new(),
            error: Some("build timed out".to_string()),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Ready,
    Failed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub status: DeploymentStatus,
    pub container_id: Option<String>,
    pub service_url: Option<String>,
    pub error: Option<String>,
}

impl DeploymentResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: DeploymentStatus::Failed,
            container_id: None,
            service_url: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == DeploymentStatus::Ready
    }
}

/// Result of a one-shot command against a running instance. Streams are never
/// merged; a timeout yields exit code -1 with `timed_out` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn spawn_error(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: -1,
            timed_out: false,
        }
    }
}

impl From<crate::sandbox::CommandOutput> for ExecutionResult {
    fn from(out: crate::sandbox::CommandOutput) -> Self {
        Self {
            stdout: out.stdout,
            stderr: out.stderr,
            exit_code: out.exit_code,
            timed_out: out.timed_out,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub path: String,
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(2),
        }
    }
}

/// Everything a backend needs to start a built artifact.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub image: String,
    pub name: String,
    pub container_port: u16,
    /// None means the backend allocates an ephemeral host port.
    pub host_port: Option<u16>,
    pub environment: HashMap<String, String>,
    pub volumes: Vec<String>,
    pub memory_limit_mb: Option<u64>,
    pub cpu_limit: Option<f64>,
    pub health_check: Option<HealthCheck>,
    /// Start command override, used by the local-process backend.
    pub start_command: Option<String>,
}

impl DeploymentConfig {
    pub fn new(image: impl Into<String>, name: impl Into<String>, container_port: u16) -> Self {
        Self {
            image: image.into(),
            name: name.into(),
            container_port,
            host_port: None,
            environment: HashMap::new(),
            volumes: Vec::new(),
            memory_limit_mb: None,
            cpu_limit: None,
            health_check: Some(HealthCheck::default()),
            start_command: None,
        }
    }
}

/// A backend-native resource pending teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Image(String),
    Container(String),
    Process(u32),
    Deployment { name: String, namespace: String },
    Service { name: String, namespace: String },
    WorkDir(PathBuf),
}

/// Stack of teardown tokens. Resources are registered in creation order and
/// drained LIFO; draining empties the stack, so a second cleanup is a no-op.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    resources: Vec<Resource>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: Resource) {
        debug!(resource = ?resource, "Registered resource for cleanup");
        self.resources.push(resource);
    }

    /// Remove and return all resources, newest first.
    pub fn drain_lifo(&mut self) -> Vec<Resource> {
        let mut drained: Vec<Resource> = self.resources.drain(..).collect();
        drained.reverse();
        drained
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }
}
