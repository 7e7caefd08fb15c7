use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::sandbox;

/// Load-test summary, identical regardless of which tool produced it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub throughput_rps: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfTool {
    Locust,
    Ab,
    Wrk,
}

impl PerfTool {
    pub fn from_str_loose(s: &str) -> Option<PerfTool> {
        match s.to_lowercase().as_str() {
            "locust" => Some(PerfTool::Locust),
            "ab" | "apachebench" => Some(PerfTool::Ab),
            "wrk" => Some(PerfTool::Wrk),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PerfTestConfig {
    pub users: u32,
    pub duration_secs: u64,
    pub tool: PerfTool,
}

impl Default for PerfTestConfig {
    fn default() -> Self {
        Self {
            users: 10,
            duration_secs: 30,
            tool: PerfTool::Ab,
        }
    }
}

/// Run the configured load tool against a deployed service and normalize its
/// output. The endpoints list comes from the problem's HTTP test cases.
pub async fn run_performance_test(
    service_url: &str,
    endpoints: &[String],
    config: &PerfTestConfig,
    workspace: &Path,
) -> Result<PerformanceMetrics> {
    info!(
        service_url = %service_url,
        tool = ?config.tool,
        users = %config.users,
        "Running performance test"
    );
    match config.tool {
        PerfTool::Locust => run_locust(service_url, endpoints, config, workspace).await,
        PerfTool::Ab => run_ab(service_url, endpoints, config).await,
        PerfTool::Wrk => run_wrk(service_url, endpoints, config).await,
    }
}

fn primary_endpoint(endpoints: &[String]) -> &str {
    endpoints.first().map(|s| s.as_str()).unwrap_or("/")
}

fn tool_timeout(config: &PerfTestConfig) -> Duration {
    Duration::from_secs(config.duration_secs + 60)
}

async fn run_locust(
    service_url: &str,
    endpoints: &[String],
    config: &PerfTestConfig,
    workspace: &Path,
) -> Result<PerformanceMetrics> {
    let locustfile = workspace.join("locustfile.py");
    tokio::fs::write(&locustfile, generate_locustfile(endpoints))
        .await
        .context("failed to write locustfile")?;

    let csv_prefix = workspace.join("perf");
    let locustfile_arg = locustfile.to_string_lossy().to_string();
    let csv_arg = csv_prefix.to_string_lossy().to_string();
    let users_arg = config.users.to_string();
    let run_time_arg = format!("{}s", config.duration_secs);

    let output = sandbox::run_argv(
        &[
            "locust",
            "-f",
            &locustfile_arg,
            "--headless",
            "-u",
            &users_arg,
            "-r",
            &users_arg,
            "--host",
            service_url,
            "--run-time",
            &run_time_arg,
            "--csv",
            &csv_arg,
        ],
        Some(workspace),
        tool_timeout(config),
        &[],
    )
    .await
    .context("locust invocation failed")?;
    if output.timed_out {
        anyhow::bail!("locust timed out");
    }

    let stats_path = workspace.join("perf_stats.csv");
    let csv = tokio::fs::read_to_string(&stats_path)
        .await
        .context("locust stats CSV missing")?;
    parse_locust_csv(&csv)
}

async fn run_ab(
    service_url: &str,
    endpoints: &[String],
    config: &PerfTestConfig,
) -> Result<PerformanceMetrics> {
    let url = format!("{}{}", service_url, primary_endpoint(endpoints));
    let requests = (config.users as u64 * config.duration_secs * 2).max(100);
    let requests_arg = requests.to_string();
    let users_arg = config.users.to_string();

    let output = sandbox::run_argv(
        &["ab", "-n", &requests_arg, "-c", &users_arg, &url],
        None,
        tool_timeout(config),
        &[],
    )
    .await
    .context("ab invocation failed")?;
    if output.timed_out {
        anyhow::bail!("ab timed out");
    }
    if output.exit_code != 0 {
        anyhow::bail!("ab exited {}: {}", output.exit_code, output.stderr);
    }
    parse_ab_output(&output.stdout)
}

async fn run_wrk(
    service_url: &str,
    endpoints: &[String],
    config: &PerfTestConfig,
) -> Result<PerformanceMetrics> {
    let url = format!("{}{}", service_url, primary_endpoint(endpoints));
    let users_arg = config.users.to_string();
    let duration_arg = format!("{}s", config.duration_secs);

    let output = sandbox::run_argv(
        &[
            "wrk",
            "-t2",
            "-c",
            &users_arg,
            "-d",
            &duration_arg,
            "--latency",
            &url,
        ],
        None,
        tool_timeout(config),
        &[],
    )
    .await
    .context("wrk invocation failed")?;
    if output.timed_out {
        anyhow::bail!("wrk timed out");
    }
    if output.exit_code != 0 {
        anyhow::bail!("wrk exited {}: {}", output.exit_code, output.stderr);
    }
    parse_wrk_output(&output.stdout)
}

/// Locust task file hitting each listed endpoint with equal weight.
pub fn generate_locustfile(endpoints: &[String]) -> String {
    let mut tasks = String::new();
    let endpoints: Vec<&str> = if endpoints.is_empty() {
        vec!["/"]
    } else {
        endpoints.iter().map(|s| s.as_str()).collect()
    };
    for (i, endpoint) in endpoints.iter().enumerate() {
        tasks.push_str(&format!(
            "    @task\n    def endpoint_{}(self):\n        self.client.get(\"{}\")\n\n",
            i, endpoint
        ));
    }
    format!(
        "from locust import HttpUser, task, between\n\n\n\
         class SubmissionUser(HttpUser):\n    wait_time = between(0.1, 0.5)\n\n{}",
        tasks
    )
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parse the aggregated row of a locust `--csv` stats file.
pub fn parse_locust_csv(csv: &str) -> Result<PerformanceMetrics> {
    let mut lines = csv.lines();
    let header = lines.next().context("empty locust CSV")?;
    let columns = split_csv_line(header);
    let index_of = |name: &str| columns.iter().position(|c| c == name);

    let count_idx = index_of("Request Count").context("missing Request Count column")?;
    let failure_idx = index_of("Failure Count").context("missing Failure Count column")?;
    let rps_idx = index_of("Requests/s").context("missing Requests/s column")?;
    let p50_idx = index_of("50%").context("missing 50% column")?;
    let p95_idx = index_of("95%").context("missing 95% column")?;
    let p99_idx = index_of("99%").context("missing 99% column")?;

    for line in lines {
        let fields = split_csv_line(line);
        if fields.get(1).map(|s| s.as_str()) != Some("Aggregated") {
            continue;
        }
        let get_f64 = |idx: usize| -> f64 {
            fields
                .get(idx)
                .and_then(|s| s.trim().parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        let total = get_f64(count_idx) as u64;
        let failed = get_f64(failure_idx) as u64;
        return Ok(PerformanceMetrics {
            p50_latency_ms: get_f64(p50_idx),
            p95_latency_ms: get_f64(p95_idx),
            p99_latency_ms: get_f64(p99_idx),
            throughput_rps: get_f64(rps_idx),
            total_requests: total,
            failed_requests: failed,
            error_rate: if total > 0 {
                failed as f64 / total as f64
            } else {
                0.0
            },
        });
    }
    anyhow::bail!("no Aggregated row in locust CSV")
}

/// Pull the first number following `label` on the line containing it.
fn number_after_label(text: &str, label: &str) -> Option<f64> {
    let line = text.lines().find(|l| l.contains(label))?;
    let rest = &line[line.find(label)? + label.len()..];
    let token = rest.split_whitespace().next()?;
    token.parse::<f64>().ok()
}

/// `  95%     28` style percentile row from ab's distribution table.
fn ab_percentile(text: &str, percentile: &str) -> Option<f64> {
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix(percentile) {
            let token = rest.trim().split_whitespace().next()?;
            return token.parse::<f64>().ok();
        }
    }
    None
}

/// Parse Apache Bench's textual summary.
pub fn parse_ab_output(text: &str) -> Result<PerformanceMetrics> {
    let total = number_after_label(text, "Complete requests:")
        .context("missing Complete requests line")? as u64;
    let failed = number_after_label(text, "Failed requests:").unwrap_or(0.0) as u64;
    let rps = number_after_label(text, "Requests per second:").unwrap_or(0.0);

    Ok(PerformanceMetrics {
        p50_latency_ms: ab_percentile(text, "50%").unwrap_or(0.0),
        p95_latency_ms: ab_percentile(text, "95%").unwrap_or(0.0),
        p99_latency_ms: ab_percentile(text, "99%").unwrap_or(0.0),
        throughput_rps: rps,
        total_requests: total,
        failed_requests: failed,
        error_rate: if total > 0 {
            failed as f64 / total as f64
        } else {
            0.0
        },
    })
}

/// Parse a "12.34ms" / "567.00us" / "1.20s" duration token into milliseconds.
fn wrk_duration_ms(token: &str) -> Option<f64> {
    let token = token.trim();
    if let Some(num) = token.strip_suffix("ms") {
        num.parse::<f64>().ok()
    } else if let Some(num) = token.strip_suffix("us") {
        num.parse::<f64>().ok().map(|v| v / 1000.0)
    } else if let Some(num) = token.strip_suffix('s') {
        num.parse::<f64>().ok().map(|v| v * 1000.0)
    } else {
        None
    }
}

fn wrk_latency_percentile(text: &str, percentile: &str) -> Option<f64> {
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix(percentile) {
            return wrk_duration_ms(rest.trim().split_whitespace().next()?);
        }
    }
    None
}

/// Parse wrk's textual summary (requires `--latency`).
pub fn parse_wrk_output(text: &str) -> Result<PerformanceMetrics> {
    let total = text
        .lines()
        .find_map(|l| {
            let trimmed = l.trim();
            let (count, rest) = trimmed.split_once(' ')?;
            rest.starts_with("requests in").then(|| count.parse::<u64>().ok())?
        })
        .context("missing requests-in summary line")?;

    let failed = number_after_label(text, "Non-2xx or 3xx responses:").unwrap_or(0.0) as u64;

    Ok(PerformanceMetrics {
        p50_latency_ms: wrk_latency_percentile(text, "50%").unwrap_or(0.0),
        p95_latency_ms: wrk_latency_percentile(text, "95%")
            .or_else(|| wrk_latency_percentile(text, "90%"))
            .unwrap_or(0.0),
        p99_latency_ms: wrk_latency_percentile(text, "99%").unwrap_or(0.0),
        throughput_rps: number_after_label(text, "Requests/sec:").unwrap_or(0.0),
        total_requests: total,
        failed_requests: failed,
        error_rate: if total > 0 {
            failed as f64 / total as f64
        } else {
            0.0
        },
    })
}

/// Extract a "< Nms" latency target from free-form constraint text.
pub fn parse_latency_target_ms(constraint: &str) -> Option<f64> {
    let idx = constraint.find('<')?;
    let rest = constraint[idx + 1..].trim_start();
    let end = rest
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    let number: f64 = rest[..end].parse().ok()?;
    rest[end..].trim_start().starts_with("ms").then_some(number)
}

/// Extract an "Nreq/min" throughput target, normalized to requests/second.
pub fn parse_throughput_target_rps(constraint: &str) -> Option<f64> {
    let compact: String = constraint
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    let idx = compact.find("req/min")?;
    let digits_end = idx;
    let digits_start = compact[..digits_end]
        .rfind(|c: char| !c.is_ascii_digit() && c != '.')
        .map(|i| i + 1)
        .unwrap_or(0);
    let number: f64 = compact[digits_start..digits_end].parse().ok()?;
    Some(number / 60.0)
}
