use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::types::{Difficulty, MetricCategory, Problem};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

impl Problem {
    /// Load a problem definition from a YAML file.
    ///
    /// Criteria categories are tagged here so aggregation never has to
    /// re-parse free-text metric names. A weight sum that does not reach 1.0
    /// is logged but accepted; `validate()` reports it explicitly.
    pub fn from_yaml(path: &Path) -> Result<Problem> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read problem file {}", path.display()))?;
        let mut problem: Problem = serde_yaml::from_str(&content)
            .with_context(|| format!("invalid problem YAML in {}", path.display()))?;

        for criteria in &mut problem.evaluation_criteria {
            if criteria.category.is_none() {
                criteria.category = Some(MetricCategory::from_metric_name(&criteria.metric));
            }
        }

        let weight_sum: f64 = problem.evaluation_criteria.iter().map(|c| c.weight).sum();
        if !problem.evaluation_criteria.is_empty()
            && (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE
        {
            warn!(
                problem_id = %problem.problem_id,
                weight_sum = %weight_sum,
                "Evaluation criteria weights do not sum to 1.0"
            );
        }

        info!(
            problem_id = %problem.problem_id,
            difficulty = ?problem.difficulty,
            test_cases = %problem.test_cases.len(),
            criteria = %problem.evaluation_criteria.len(),
            "Loaded problem definition"
        );
        Ok(problem)
    }

    /// Find a problem by id under a problems directory, searching the root
    /// and each difficulty subdirectory for `{problem_id}.yaml` / `.yml`.
    pub fn load(problem_id: &str, problems_dir: &Path) -> Result<Problem> {
        let path = find_problem_file(problem_id, problems_dir).with_context(|| {
            format!(
                "problem {} not found under {}",
                problem_id,
                problems_dir.display()
            )
        })?;
        Self::from_yaml(&path)
    }

    /// Non-fatal consistency findings a problem author should fix.
    pub fn validate(&self) -> Vec<String> {
        let mut findings = Vec::new();

        if !self.evaluation_criteria.is_empty() {
            let weight_sum: f64 = self.evaluation_criteria.iter().map(|c| c.weight).sum();
            if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
                findings.push(format!(
                    "evaluation criteria weights sum to {:.4}, expected 1.0",
                    weight_sum
                ));
            }
        } else {
            findings.push("no evaluation criteria defined".to_string());
        }

        if self.test_cases.is_empty() {
            findings.push("no test cases defined".to_string());
        }

        let mut seen = HashSet::new();
        for req in &self.requirements {
            if !seen.insert(req.id.as_str()) {
                findings.push(format!("duplicate requirement id {}", req.id));
            }
        }

        let known: HashSet<&str> = self.requirements.iter().map(|r| r.id.as_str()).collect();
        for case in &self.test_cases {
            for req_id in &case.requirements {
                if !known.contains(req_id.as_str()) {
                    findings.push(format!(
                        "test case {} references unknown requirement {}",
                        case.id, req_id
                    ));
                }
            }
        }

        for criteria in &self.evaluation_criteria {
            if criteria.category() == MetricCategory::Unknown {
                findings.push(format!(
                    "criteria metric \"{}\" matches no known category",
                    criteria.metric
                ));
            }
        }

        findings
    }
}

fn find_problem_file(problem_id: &str, problems_dir: &Path) -> Option<PathBuf> {
    let mut candidates = vec![problems_dir.to_path_buf()];
    for difficulty in Difficulty::all() {
        candidates.push(problems_dir.join(difficulty.dir_name()));
    }

    for dir in candidates {
        for ext in ["yaml", "yml"] {
            let path = dir.join(format!("{}.{}", problem_id, ext));
            if path.is_file() {
                return Some(path);
            }
        }
    }
    None
}
