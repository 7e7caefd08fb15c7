use std::path::PathBuf;

use crate::analysis::{PerfTool, SecurityTool};
use crate::runner::Backend;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SESSION_TTL: u64 = 3600;
const DEFAULT_MAX_CONCURRENT: usize = 4;
const DEFAULT_BUILD_TIMEOUT: u64 = 600;
const DEFAULT_CLI_TEST_TIMEOUT: u64 = 60;
const DEFAULT_PERF_DURATION: u64 = 30;
const DEFAULT_WORKSPACE_BASE: &str = "/tmp/req2run";
const DEFAULT_PROBLEMS_DIR: &str = "problems";
const DEFAULT_OUTPUT_DIR: &str = "results";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub auth_token: Option<String>,
    pub backend: Backend,
    pub problems_dir: PathBuf,
    pub output_dir: PathBuf,
    pub workspace_base: PathBuf,
    pub session_ttl_secs: u64,
    pub max_concurrent_evals: usize,
    pub build_timeout_secs: u64,
    pub cli_test_timeout_secs: u64,
    pub perf_duration_secs: u64,
    pub perf_tool: PerfTool,
    pub security_tool: SecurityTool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            auth_token: std::env::var("AUTH_TOKEN").ok(),
            backend: std::env::var("RUNNER_BACKEND")
                .ok()
                .and_then(|v| Backend::from_str_loose(&v))
                .unwrap_or(Backend::Docker),
            problems_dir: env_path("PROBLEMS_DIR", DEFAULT_PROBLEMS_DIR),
            output_dir: env_path("OUTPUT_DIR", DEFAULT_OUTPUT_DIR),
            workspace_base: env_path("WORKSPACE_BASE", DEFAULT_WORKSPACE_BASE),
            session_ttl_secs: env_parse("SESSION_TTL_SECS", DEFAULT_SESSION_TTL),
            max_concurrent_evals: env_parse("MAX_CONCURRENT_EVALS", DEFAULT_MAX_CONCURRENT),
            build_timeout_secs: env_parse("BUILD_TIMEOUT_SECS", DEFAULT_BUILD_TIMEOUT),
            cli_test_timeout_secs: env_parse("CLI_TEST_TIMEOUT_SECS", DEFAULT_CLI_TEST_TIMEOUT),
            perf_duration_secs: env_parse("PERF_DURATION_SECS", DEFAULT_PERF_DURATION),
            perf_tool: std::env::var("PERF_TOOL")
                .ok()
                .and_then(|v| PerfTool::from_str_loose(&v))
                .unwrap_or(PerfTool::Ab),
            security_tool: std::env::var("SECURITY_TOOL")
                .ok()
                .and_then(|v| SecurityTool::from_str_loose(&v))
                .unwrap_or(SecurityTool::Trivy),
        }
    }

    pub fn print_banner(&self) {
        tracing::info!("╔══════════════════════════════════════════════════╗");
        tracing::info!("║             req2run v{}                      ║", env!("CARGO_PKG_VERSION"));
        tracing::info!("╠══════════════════════════════════════════════════╣");
        tracing::info!("║  Port:              {:<28}║", self.port);
        tracing::info!("║  Auth:              {:<28}║", if self.auth_token.is_some() { "enabled" } else { "disabled" });
        tracing::info!("║  Backend:           {:<28}║", self.backend.as_str());
        tracing::info!("║  Max concurrent:    {:<28}║", self.max_concurrent_evals);
        tracing::info!("║  Session TTL:       {:<25}s ║", self.session_ttl_secs);
        tracing::info!("║  Build timeout:     {:<25}s ║", self.build_timeout_secs);
        tracing::info!("║  Problems dir:      {:<28}║", self.problems_dir.display());
        tracing::info!("║  Output dir:        {:<28}║", self.output_dir.display());
        tracing::info!("║  Workspace:         {:<28}║", self.workspace_base.display());
        tracing::info!("╚══════════════════════════════════════════════════╝");
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(std::env::var(key).unwrap_or_else(|_| default.to_string()))
}
