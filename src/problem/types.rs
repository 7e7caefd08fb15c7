use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Basic,
    Intermediate,
    Advanced,
    Expert,
}

impl Difficulty {
    /// Subdirectory name used when searching a problems tree.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Difficulty::Basic => "basic",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
            Difficulty::Expert => "expert",
        }
    }

    pub fn all() -> [Difficulty; 4] {
        [
            Difficulty::Basic,
            Difficulty::Intermediate,
            Difficulty::Advanced,
            Difficulty::Expert,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Must,
    Should,
    #[serde(alias = "nice-to-have")]
    NiceToHave,
}

/// A single functional requirement. `validated` is flipped by the evaluator
/// once the test cases covering it have passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub description: String,
    pub priority: Priority,
    #[serde(default)]
    pub validated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonFunctionalRequirement {
    #[serde(rename = "type")]
    pub kind: String,
    pub constraint: String,
    #[serde(default)]
    pub measurement: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
    Error,
}

impl Default for TestStatus {
    fn default() -> Self {
        TestStatus::Pending
    }
}

/// Shape of a test case input. HTTP-shaped cases carry method + endpoint,
/// CLI-shaped cases carry a command string. A case with neither is a no-op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestInput {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub command: Option<String>,
}

impl TestInput {
    pub fn is_http(&self) -> bool {
        self.method.is_some() && self.endpoint.is_some()
    }

    pub fn is_cli(&self) -> bool {
        self.command.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpectedOutput {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub body_contains: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout_contains: Option<String>,
    #[serde(default)]
    pub stderr_contains: Option<String>,
}

/// One functional check. Created in `pending`, mutated exactly once per
/// evaluation run, never reused across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input: TestInput,
    #[serde(default)]
    pub expected_output: ExpectedOutput,
    /// Requirement ids this case validates. A requirement referenced by no
    /// case is only validated when the whole suite is green.
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub status: TestStatus,
    #[serde(default)]
    pub actual_output: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
}

/// Which phase score an evaluation criterion draws from. Tagged once at
/// problem-load time instead of re-parsing free-text metric names during
/// aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    Functional,
    Test,
    Performance,
    Security,
    Quality,
    Unknown,
}

impl MetricCategory {
    /// Keyword match over the free-form metric name. "test" must lose to
    /// "functional" only when both appear ("functional test coverage" counts
    /// as functional coverage).
    pub fn from_metric_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("functional") || lower.contains("coverage") {
            MetricCategory::Functional
        } else if lower.contains("test") {
            MetricCategory::Test
        } else if lower.contains("performance") || lower.contains("latency") {
            MetricCategory::Performance
        } else if lower.contains("security") || lower.contains("vulnerab") {
            MetricCategory::Security
        } else if lower.contains("quality") || lower.contains("maintain") {
            MetricCategory::Quality
        } else {
            MetricCategory::Unknown
        }
    }
}

/// One weighted scoring axis. metric/weight/threshold are immutable after
/// load; score/passed are written once per evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationCriteria {
    pub metric: String,
    pub weight: f64,
    pub threshold: f64,
    #[serde(default)]
    pub category: Option<MetricCategory>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub passed: Option<bool>,
}

impl EvaluationCriteria {
    pub fn category(&self) -> MetricCategory {
        self.category
            .unwrap_or_else(|| MetricCategory::from_metric_name(&self.metric))
    }
}

fn default_port() -> u16 {
    3000
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// Deployment knobs consumed by the Runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequirements {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    #[serde(default)]
    pub cpu_limit: Option<f64>,
    #[serde(default = "default_health_path")]
    pub health_check_path: String,
    #[serde(default)]
    pub startup_timeout_secs: Option<u64>,
    /// Explicit start command for the local-process backend.
    #[serde(default)]
    pub start_command: Option<String>,
}

impl Default for DeploymentRequirements {
    fn default() -> Self {
        Self {
            port: default_port(),
            environment: HashMap::new(),
            volumes: Vec::new(),
            memory_limit_mb: None,
            cpu_limit: None,
            health_check_path: default_health_path(),
            startup_timeout_secs: None,
            start_command: None,
        }
    }
}

/// Immutable problem specification loaded once from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub problem_id: String,
    pub category: String,
    pub difficulty: Difficulty,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub non_functional_requirements: Vec<NonFunctionalRequirement>,
    #[serde(default)]
    pub input_specification: Option<String>,
    #[serde(default)]
    pub output_specification: Option<String>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub deployment_requirements: DeploymentRequirements,
    #[serde(default)]
    pub evaluation_criteria: Vec<EvaluationCriteria>,
}
