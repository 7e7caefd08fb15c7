use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::problem::{EvaluationCriteria, TestCase};

/// Passing threshold on the weighted total score.
pub const PASS_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Passed,
    Failed,
    Error,
}

/// The five named phase scores feeding criteria aggregation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub functional_coverage: f64,
    pub test_pass_rate: f64,
    pub performance: f64,
    pub security: f64,
    pub quality: f64,
}

/// Terminal output of one evaluation run. Immutable once the evaluator
/// returns it; the mutated test cases and criteria move in here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub problem_id: String,
    pub submission_id: String,
    pub timestamp: DateTime<Utc>,
    pub total_score: f64,
    pub status: ResultStatus,
    pub execution_time_ms: u64,
    pub scores: ScoreBreakdown,
    pub test_results: Vec<TestCase>,
    pub criteria_results: Vec<EvaluationCriteria>,
    pub logs: Vec<String>,
    pub artifacts: HashMap<String, String>,
}

impl EvaluationResult {
    /// Write `{submission_id}_result.json` and `{submission_id}_logs.txt`
    /// into `output_dir`, returning the JSON path.
    pub fn save(&self, output_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create {}", output_dir.display()))?;

        let json_path = output_dir.join(format!("{}_result.json", self.submission_id));
        let json = serde_json::to_string_pretty(self).context("failed to serialize result")?;
        std::fs::write(&json_path, json)
            .with_context(|| format!("failed to write {}", json_path.display()))?;

        let logs_path = output_dir.join(format!("{}_logs.txt", self.submission_id));
        std::fs::write(&logs_path, self.logs.join("\n"))
            .with_context(|| format!("failed to write {}", logs_path.display()))?;

        info!(
            submission_id = %self.submission_id,
            path = %json_path.display(),
            "Saved evaluation result"
        );
        Ok(json_path)
    }

    pub fn load(path: &Path) -> Result<EvaluationResult> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content).context("invalid result JSON")
    }
}

/// Append-only log accumulated through every evaluation phase, mirrored to
/// tracing and serialized into the result.
#[derive(Debug, Default)]
pub struct RunLog {
    entries: Vec<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{}", message);
        self.entries
            .push(format!("[{}] {}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"), message));
    }

    pub fn into_entries(self) -> Vec<String> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
