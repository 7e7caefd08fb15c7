use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::docker::build_image;
use super::types::{
    BuildResult, CleanupRegistry, DeploymentConfig, DeploymentResult, DeploymentStatus,
    ExecutionResult, Resource,
};
use super::{wait_for_health, Runner};
use crate::sandbox;

const KUBECTL_TIMEOUT: Duration = Duration::from_secs(60);
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const NODE_PORT_BASE: u16 = 30000;
const NODE_PORT_RANGE: u16 = 2768;

/// Runs submissions on a Kubernetes cluster via kubectl. Images are built
/// with the local docker daemon (single-node clusters share it); deployments
/// are exposed through a NodePort service.
pub struct KubernetesRunner {
    workspace: PathBuf,
    namespace: String,
    registry: CleanupRegistry,
    last_deployment: Option<String>,
}

impl KubernetesRunner {
    pub fn new(workspace: PathBuf) -> Self {
        Self {
            workspace,
            namespace: std::env::var("K8S_NAMESPACE").unwrap_or_else(|_| "req2run".to_string()),
            registry: CleanupRegistry::new(),
            last_deployment: None,
        }
    }

    /// Kubernetes resource names: lowercase alphanumerics and dashes.
    fn sanitize_name(name: &str) -> String {
        let mut out: String = name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        out.truncate(53);
        out.trim_matches('-').to_string()
    }

    fn pick_node_port() -> u16 {
        let raw = uuid::Uuid::new_v4().as_u128() as u16;
        NODE_PORT_BASE + (raw % NODE_PORT_RANGE)
    }

    fn render_manifest(
        &self,
        name: &str,
        config: &DeploymentConfig,
        node_port: u16,
    ) -> anyhow::Result<String> {
        let env: Vec<serde_json::Value> = config
            .environment
            .iter()
            .map(|(k, v)| json!({"name": k, "value": v}))
            .chain(std::iter::once(
                json!({"name": "PORT", "value": config.container_port.to_string()}),
            ))
            .collect();

        let mut container = json!({
            "name": name,
            "image": config.image,
            "imagePullPolicy": "IfNotPresent",
            "ports": [{"containerPort": config.container_port}],
            "env": env,
        });
        if config.memory_limit_mb.is_some() || config.cpu_limit.is_some() {
            let mut limits = serde_json::Map::new();
            if let Some(mem) = config.memory_limit_mb {
                limits.insert("memory".into(), json!(format!("{}Mi", mem)));
            }
            if let Some(cpu) = config.cpu_limit {
                limits.insert("cpu".into(), json!(format!("{}", cpu)));
            }
            container["resources"] = json!({"limits": limits});
        }

        let deployment = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": self.namespace},
            "spec": {
                "replicas": 1,
                "selector": {"matchLabels": {"app": name}},
                "template": {
                    "metadata": {"labels": {"app": name}},
                    "spec": {"containers": [container]},
                },
            },
        });
        let service = json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": name, "namespace": self.namespace},
            "spec": {
                "type": "NodePort",
                "selector": {"app": name},
                "ports": [{
                    "port": config.container_port,
                    "targetPort": config.container_port,
                    "nodePort": node_port,
                }],
            },
        });

        Ok(format!(
            "{}---\n{}",
            serde_yaml::to_string(&deployment)?,
            serde_yaml::to_string(&service)?
        ))
    }
}

#[async_trait]
impl Runner for KubernetesRunner {
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
        let name = Self::sanitize_name(&config.name);
        if name.is_empty() {
            return DeploymentResult::failed("deployment name sanitized to empty string");
        }
        let node_port = Self::pick_node_port();

        let manifest = match self.render_manifest(&name, config, node_port) {
            Ok(m) => m,
            Err(e) => return DeploymentResult::failed(format!("manifest render: {:#}", e)),
        };
        let manifest_path = self.workspace.join(format!("{}.manifest.yaml", name));
        if let Err(e) = tokio::fs::write(&manifest_path, &manifest).await {
            return DeploymentResult::failed(format!("manifest write: {}", e));
        }

        let manifest_arg = manifest_path.to_string_lossy().to_string();
        info!(name = %name, namespace = %self.namespace, node_port = %node_port, "Applying manifest");
        let output = match sandbox::run_argv(
            &["kubectl", "apply", "-f", &manifest_arg],
            None,
            KUBECTL_TIMEOUT,
            &[],
        )
        .await
        {
            Ok(o) => o,
            Err(e) => return DeploymentResult::failed(format!("{:#}", e)),
        };
        if !output.success() {
            return DeploymentResult::failed(format!(
                "kubectl apply exited {}: {}",
                output.exit_code, output.stderr
            ));
        }

        // Both objects registered before any readiness wait.
        self.registry.register(Resource::Deployment {
            name: name.clone(),
            namespace: self.namespace.clone(),
        });
        self.registry.register(Resource::Service {
            name: name.clone(),
            namespace: self.namespace.clone(),
        });
        self.last_deployment = Some(name.clone());

        let node_host = std::env::var("K8S_NODE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let service_url = format!("http://{}:{}", node_host, node_port);

        if let Some(health) = &config.health_check {
            let rollout_arg = format!("deployment/{}", name);
            let timeout_arg = format!("--timeout={}s", health.timeout.as_secs());
            let _ = sandbox::run_argv(
                &[
                    "kubectl",
                    "rollout",
                    "status",
                    &rollout_arg,
                    "-n",
                    &self.namespace,
                    &timeout_arg,
                ],
                None,
                health.timeout + Duration::from_secs(10),
                &[],
            )
            .await;

            let url = format!("{}{}", service_url, health.path);
            if !wait_for_health(&url, health.timeout, health.interval).await {
                return DeploymentResult {
                    status: DeploymentStatus::Failed,
                    container_id: Some(name),
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
            container_id: Some(name),
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
            .or_else(|| self.last_deployment.clone());
        let Some(target) = target else {
            return ExecutionResult::spawn_error("no deployment to execute in");
        };

        let deploy_arg = format!("deploy/{}", target);
        match sandbox::run_argv(
            &[
                "kubectl", "exec", "-n", &self.namespace, &deploy_arg, "--", "sh", "-c", command,
            ],
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
        let deploy_arg = format!("deployment/{}", container_id);
        let tail_arg = format!("--tail={}", tail);
        match sandbox::run_argv(
            &["kubectl", "logs", "-n", &self.namespace, &tail_arg, &deploy_arg],
            None,
            KUBECTL_TIMEOUT,
            &[],
        )
        .await
        {
            Ok(output) => output.stdout.lines().map(|l| l.to_string()).collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn cleanup(&mut self) {
        for resource in self.registry.drain_lifo() {
            let result = match &resource {
                Resource::Service { name, namespace } => {
                    sandbox::run_argv(
                        &[
                            "kubectl",
                            "delete",
                            "service",
                            name,
                            "-n",
                            namespace,
                            "--ignore-not-found",
                        ],
                        None,
                        TEARDOWN_TIMEOUT,
                        &[],
                    )
                    .await
                }
                Resource::Deployment { name, namespace } => {
                    sandbox::run_argv(
                        &[
                            "kubectl",
                            "delete",
                            "deployment",
                            name,
                            "-n",
                            namespace,
                            "--ignore-not-found",
                        ],
                        None,
                        TEARDOWN_TIMEOUT,
                        &[],
                    )
                    .await
                }
                Resource::Image(tag) => {
                    sandbox::run_argv(&["docker", "rmi", "-f", tag], None, TEARDOWN_TIMEOUT, &[])
                        .await
                }
                other => {
                    warn!(resource = ?other, "Unexpected resource kind for kubernetes runner");
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
        self.last_deployment = None;
    }
}
