//! External-tool measurement families: load testing, vulnerability scanning,
//! static quality analysis. Each `run_*` normalizes one tool's native output
//! into a typed record; which tool ran is invisible past this boundary.
//!
//! These return `Result` so the evaluator can apply its documented default
//! scores at the phase boundary; nothing in here substitutes defaults itself.

pub mod performance;
pub mod quality;
pub mod security;

use anyhow::Result;
use std::path::Path;

pub use performance::{PerfTestConfig, PerfTool, PerformanceMetrics};
pub use quality::QualityMetrics;
pub use security::{SecurityMetrics, SecurityTool};

/// Stateless facade over the three measurement families.
#[derive(Debug, Clone)]
pub struct MetricsCalculator {
    pub perf_tool: PerfTool,
    pub security_tool: SecurityTool,
}

impl Default for MetricsCalculator {
    fn default() -> Self {
        Self {
            perf_tool: PerfTool::Ab,
            security_tool: SecurityTool::Trivy,
        }
    }
}

impl MetricsCalculator {
    pub fn new(perf_tool: PerfTool, security_tool: SecurityTool) -> Self {
        Self {
            perf_tool,
            security_tool,
        }
    }

    pub async fn run_performance_test(
        &self,
        service_url: &str,
        endpoints: &[String],
        mut config: PerfTestConfig,
        workspace: &Path,
    ) -> Result<PerformanceMetrics> {
        config.tool = self.perf_tool;
        performance::run_performance_test(service_url, endpoints, &config, workspace).await
    }

    pub async fn run_security_scan(&self, submission_path: &Path) -> Result<SecurityMetrics> {
        security::run_security_scan(submission_path, self.security_tool).await
    }

    pub async fn run_code_analysis(&self, submission_path: &Path) -> Result<QualityMetrics> {
        quality::run_code_analysis(submission_path).await
    }
}
