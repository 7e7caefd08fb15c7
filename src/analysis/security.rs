use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::sandbox;

const SCAN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    fn from_str_loose(s: &str) -> Severity {
        match s.to_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" | "MODERATE" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub severity: Severity,
    pub identifier: String,
    pub description: String,
}

/// Normalized vulnerability counts across scanners.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityMetrics {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub findings: Vec<SecurityFinding>,
}

impl SecurityMetrics {
    pub fn record(&mut self, finding: SecurityFinding) {
        match finding.severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
        self.findings.push(finding);
    }

    /// Worst-case-dominant score: the most severe finding present sets the
    /// score outright, it is not averaged away.
    pub fn calculate_score(&self) -> f64 {
        if self.critical > 0 {
            0.0
        } else if self.high > 0 {
            0.3
        } else if self.medium > 0 {
            0.6
        } else if self.low > 0 {
            0.8
        } else {
            1.0
        }
    }

    pub fn total_findings(&self) -> u32 {
        self.critical + self.high + self.medium + self.low
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityTool {
    Bandit,
    Trivy,
    Safety,
}

impl SecurityTool {
    pub fn from_str_loose(s: &str) -> Option<SecurityTool> {
        match s.to_lowercase().as_str() {
            "bandit" => Some(SecurityTool::Bandit),
            "trivy" => Some(SecurityTool::Trivy),
            "safety" => Some(SecurityTool::Safety),
            _ => None,
        }
    }
}

/// Scan a submission tree with the configured tool and normalize findings.
pub async fn run_security_scan(
    submission_path: &Path,
    tool: SecurityTool,
) -> Result<SecurityMetrics> {
    info!(path = %submission_path.display(), tool = ?tool, "Running security scan");
    let path_arg = submission_path.to_string_lossy().to_string();

    match tool {
        SecurityTool::Bandit => {
            // bandit exits non-zero when it finds issues; stdout still holds
            // the JSON report.
            let output = sandbox::run_argv(
                &["bandit", "-r", &path_arg, "-f", "json", "-q"],
                None,
                SCAN_TIMEOUT,
                &[],
            )
            .await
            .context("bandit invocation failed")?;
            if output.timed_out {
                anyhow::bail!("bandit timed out");
            }
            parse_bandit_json(&output.stdout)
        }
        SecurityTool::Trivy => {
            let output = sandbox::run_argv(
                &["trivy", "fs", "--format", "json", "--quiet", &path_arg],
                None,
                SCAN_TIMEOUT,
                &[],
            )
            .await
            .context("trivy invocation failed")?;
            if output.timed_out {
                anyhow::bail!("trivy timed out");
            }
            if output.exit_code != 0 {
                anyhow::bail!("trivy exited {}: {}", output.exit_code, output.stderr);
            }
            parse_trivy_json(&output.stdout)
        }
        SecurityTool::Safety => {
            let requirements = submission_path.join("requirements.txt");
            if !requirements.is_file() {
                anyhow::bail!("no requirements.txt for safety to check");
            }
            let req_arg = requirements.to_string_lossy().to_string();
            let output = sandbox::run_argv(
                &["safety", "check", "--json", "-r", &req_arg],
                None,
                SCAN_TIMEOUT,
                &[],
            )
            .await
            .context("safety invocation failed")?;
            if output.timed_out {
                anyhow::bail!("safety timed out");
            }
            parse_safety_json(&output.stdout)
        }
    }
}

/// Bandit JSON report: `results[].issue_severity` is LOW/MEDIUM/HIGH.
pub fn parse_bandit_json(raw: &str) -> Result<SecurityMetrics> {
    let value: serde_json::Value = serde_json::from_str(raw).context("invalid bandit JSON")?;
    let mut metrics = SecurityMetrics::default();

    let results = value
        .get("results")
        .and_then(|v| v.as_array())
        .context("bandit JSON missing results array")?;
    for issue in results {
        let severity = issue
            .get("issue_severity")
            .and_then(|v| v.as_str())
            .unwrap_or("LOW");
        metrics.record(SecurityFinding {
            severity: Severity::from_str_loose(severity),
            identifier: issue
                .get("test_id")
                .and_then(|v| v.as_str())
                .unwrap_or("bandit")
                .to_string(),
            description: issue
                .get("issue_text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        });
    }
    Ok(metrics)
}

/// Trivy filesystem report: `Results[].Vulnerabilities[].Severity`.
pub fn parse_trivy_json(raw: &str) -> Result<SecurityMetrics> {
    let value: serde_json::Value = serde_json::from_str(raw).context("invalid trivy JSON")?;
    let mut metrics = SecurityMetrics::default();

    let results = value.get("Results").and_then(|v| v.as_array());
    for result in results.into_iter().flatten() {
        let vulns = result.get("Vulnerabilities").and_then(|v| v.as_array());
        for vuln in vulns.into_iter().flatten() {
            let severity = vuln
                .get("Severity")
                .and_then(|v| v.as_str())
                .unwrap_or("LOW");
            metrics.record(SecurityFinding {
                severity: Severity::from_str_loose(severity),
                identifier: vuln
                    .get("VulnerabilityID")
                    .and_then(|v| v.as_str())
                    .unwrap_or("trivy")
                    .to_string(),
                description: vuln
                    .get("Title")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }
    Ok(metrics)
}

/// Safety dependency report. Newer versions emit
/// `{"vulnerabilities": [...]}`; older ones a bare array of rows. Severity
/// is frequently absent and defaults to medium.
pub fn parse_safety_json(raw: &str) -> Result<SecurityMetrics> {
    let value: serde_json::Value = serde_json::from_str(raw).context("invalid safety JSON")?;
    let mut metrics = SecurityMetrics::default();

    let entries: Vec<&serde_json::Value> = if let Some(list) = value.as_array() {
        list.iter().collect()
    } else if let Some(list) = value.get("vulnerabilities").and_then(|v| v.as_array()) {
        list.iter().collect()
    } else {
        anyhow::bail!("unrecognized safety JSON shape");
    };

    for entry in entries {
        let severity = entry
            .get("severity")
            .and_then(|v| v.as_str())
            .map(Severity::from_str_loose)
            .unwrap_or(Severity::Medium);
        let identifier = entry
            .get("vulnerability_id")
            .or_else(|| entry.get("cve"))
            .and_then(|v| v.as_str())
            .unwrap_or("safety")
            .to_string();
        let description = entry
            .get("advisory")
            .and_then(|v| v.as_str())
            .or_else(|| entry.get(3).and_then(|v| v.as_str()))
            .unwrap_or_default()
            .to_string();
        metrics.record(SecurityFinding {
            severity,
            identifier,
            description,
        });
    }
    Ok(metrics)
}
