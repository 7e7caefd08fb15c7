use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::runner::dockerfile::{detect_language, Language};
use crate::sandbox;

const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(300);

/// Static-quality summary. Axes a tool run did not produce stay `None` and
/// are omitted from the overall mean rather than treated as zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Average cyclomatic complexity.
    pub complexity: Option<f64>,
    /// Test coverage in [0, 1].
    pub coverage: Option<f64>,
    /// Duplicated-code ratio in [0, 1].
    pub duplication: Option<f64>,
    pub lines_of_code: u64,
    /// Linter score in [0, 1].
    pub lint_score: Option<f64>,
}

impl QualityMetrics {
    /// Complexity maps to a score of 1.0 at or below 5, falling linearly to
    /// 0.0 at 30.
    fn complexity_score(&self) -> Option<f64> {
        self.complexity
            .map(|c| (1.0 - (c - 5.0) / 25.0).clamp(0.0, 1.0))
    }

    /// Unweighted mean of whichever axes are available.
    pub fn overall_score(&self) -> f64 {
        let axes: Vec<f64> = [
            self.complexity_score(),
            self.coverage,
            self.duplication.map(|d| 1.0 - d),
            self.lint_score,
        ]
        .into_iter()
        .flatten()
        .collect();

        if axes.is_empty() {
            return 0.0;
        }
        axes.iter().sum::<f64>() / axes.len() as f64
    }
}

/// Analyze a submission tree with the language's native tooling.
pub async fn run_code_analysis(submission_path: &Path) -> Result<QualityMetrics> {
    let language =
        detect_language(submission_path).context("cannot detect submission language")?;
    info!(
        path = %submission_path.display(),
        language = %language.as_str(),
        "Running code analysis"
    );

    let mut metrics = match language {
        Language::Python => analyze_python(submission_path).await?,
        Language::Node => analyze_javascript(submission_path).await?,
        Language::Go => analyze_go(submission_path).await?,
        // No linter wired up; lines-of-code only.
        Language::Rust | Language::Java => QualityMetrics::default(),
    };
    metrics.lines_of_code = count_lines_of_code(submission_path);
    Ok(metrics)
}

async fn analyze_python(path: &Path) -> Result<QualityMetrics> {
    let mut metrics = QualityMetrics::default();
    let path_arg = path.to_string_lossy().to_string();

    // pylint exits non-zero on any finding; the rating line is still printed.
    let pylint = sandbox::run_argv(
        &["pylint", "--recursive=y", &path_arg],
        None,
        ANALYSIS_TIMEOUT,
        &[],
    )
    .await
    .context("pylint invocation failed")?;
    metrics.lint_score = parse_pylint_output(&pylint.stdout);

    // Coverage data only exists if the submission ran its own tests; absence
    // just leaves the axis empty.
    let coverage = sandbox::run_argv(
        &["coverage", "json", "-o", "-"],
        Some(path),
        ANALYSIS_TIMEOUT,
        &[],
    )
    .await;
    if let Ok(out) = coverage {
        if out.success() {
            metrics.coverage = parse_coverage_json(&out.stdout);
        }
    }

    Ok(metrics)
}

async fn analyze_javascript(path: &Path) -> Result<QualityMetrics> {
    let mut metrics = QualityMetrics::default();

    let eslint = sandbox::run_argv(
        &["npx", "eslint", "--format", "json", "."],
        Some(path),
        ANALYSIS_TIMEOUT,
        &[],
    )
    .await
    .context("eslint invocation failed")?;
    metrics.lint_score = parse_eslint_json(&eslint.stdout);
    Ok(metrics)
}

async fn analyze_go(path: &Path) -> Result<QualityMetrics> {
    let mut metrics = QualityMetrics::default();

    let vet = sandbox::run_argv(&["go", "vet", "./..."], Some(path), ANALYSIS_TIMEOUT, &[])
        .await
        .context("go vet invocation failed")?;
    metrics.lint_score = Some(go_vet_score(&vet));
    Ok(metrics)
}

/// "Your code has been rated at 7.50/10" → 0.75.
pub fn parse_pylint_output(stdout: &str) -> Option<f64> {
    let marker = "rated at ";
    let line = stdout.lines().find(|l| l.contains(marker))?;
    let rest = &line[line.find(marker)? + marker.len()..];
    let score_text = rest.split('/').next()?.trim();
    let score: f64 = score_text.parse().ok()?;
    Some((score / 10.0).clamp(0.0, 1.0))
}

/// coverage.py JSON report: `totals.percent_covered` in [0, 100].
pub fn parse_coverage_json(raw: &str) -> Option<f64> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let percent = value.get("totals")?.get("percent_covered")?.as_f64()?;
    Some((percent / 100.0).clamp(0.0, 1.0))
}

/// ESLint JSON format: one entry per file with errorCount/warningCount.
/// Score falls with weighted issues per file, zeroing at 10 per file.
pub fn parse_eslint_json(raw: &str) -> Option<f64> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let files = value.as_array()?;
    if files.is_empty() {
        return Some(1.0);
    }

    let mut weighted = 0.0;
    for file in files {
        let errors = file.get("errorCount").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let warnings = file
            .get("warningCount")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        weighted += errors + warnings * 0.25;
    }
    let per_file = weighted / files.len() as f64;
    Some((1.0 - per_file / 10.0).clamp(0.0, 1.0))
}

/// go vet prints one diagnostic per line on stderr; clean runs exit zero.
pub fn go_vet_score(output: &sandbox::CommandOutput) -> f64 {
    if output.success() {
        return 1.0;
    }
    let diagnostics = output
        .stderr
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .count();
    (1.0 - diagnostics as f64 / 20.0).clamp(0.0, 1.0)
}

const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "go", "rs", "java", "rb", "c", "cc", "cpp", "h",
];
const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "venv",
    ".venv",
    "__pycache__",
    "dist",
    "build",
];

/// Count source lines under a tree, skipping dependency and build output
/// directories.
pub fn count_lines_of_code(root: &Path) -> u64 {
    let mut total = 0u64;
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if !SKIP_DIRS.contains(&name) {
                    stack.push(path);
                }
            } else if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                if SOURCE_EXTENSIONS.contains(&ext) {
                    if let Ok(content) = std::fs::read_to_string(&path) {
                        total += content.lines().count() as u64;
                    }
                }
            }
        }
    }
    total
}
