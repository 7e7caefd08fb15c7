use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::problem::{ExpectedOutput, TestCase, TestStatus};
use crate::runner::Runner;

/// Per-request timeout for HTTP test cases, so one unresponsive endpoint
/// cannot stall the loop beyond a bounded multiple of this.
pub const HTTP_TEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default)]
pub struct FunctionalOutcome {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub total: usize,
}

impl FunctionalOutcome {
    /// Passed fraction; an empty suite counts as fully passing.
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

/// Execute every test case in order, dispatching on input shape. A case that
/// blows up is recorded as `error` and the loop continues.
pub async fn run_test_cases(
    runner: &mut dyn Runner,
    service_url: &str,
    container_id: Option<&str>,
    cases: &mut [TestCase],
    cli_timeout: Duration,
) -> FunctionalOutcome {
    let client = reqwest::Client::builder()
        .timeout(HTTP_TEST_TIMEOUT)
        .build()
        .ok();

    let mut outcome = FunctionalOutcome {
        total: cases.len(),
        ..Default::default()
    };

    for case in cases.iter_mut() {
        case.status = TestStatus::Running;
        let start = Instant::now();

        if case.input.is_http() {
            match &client {
                Some(client) => execute_http_case(client, service_url, case).await,
                None => {
                    case.status = TestStatus::Error;
                    case.error_message = Some("http client construction failed".to_string());
                }
            }
        } else if case.input.is_cli() {
            execute_cli_case(runner, container_id, case, cli_timeout).await;
        } else {
            // Neither shape: nothing to check.
            case.status = TestStatus::Passed;
        }

        case.execution_time_ms = Some(start.elapsed().as_millis() as u64);
        debug!(case_id = %case.id, status = ?case.status, "Test case finished");

        match case.status {
            TestStatus::Passed => outcome.passed += 1,
            TestStatus::Failed => outcome.failed += 1,
            TestStatus::Error => outcome.errored += 1,
            TestStatus::Skipped => outcome.skipped += 1,
            _ => {}
        }
    }
    outcome
}

async fn execute_http_case(client: &reqwest::Client, service_url: &str, case: &mut TestCase) {
    let method_text = case.input.method.as_deref().unwrap_or("GET");
    let method = match reqwest::Method::from_bytes(method_text.to_uppercase().as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            case.status = TestStatus::Error;
            case.error_message = Some(format!("invalid HTTP method {}", method_text));
            return;
        }
    };

    let endpoint = case.input.endpoint.as_deref().unwrap_or("/");
    let url = format!("{}{}", service_url, endpoint);

    let mut request = client.request(method, &url);
    for (key, value) in &case.input.headers {
        request = request.header(key.as_str(), value.as_str());
    }
    if let Some(body) = &case.input.body {
        request = request.json(body);
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            // Connection-level faults are harness errors, not assertion
            // failures.
            warn!(case_id = %case.id, error = %e, "HTTP test request failed");
            case.status = TestStatus::Error;
            case.error_message = Some(format!("request failed: {}", e));
            return;
        }
    };

    let status_code = response.status().as_u16();
    let body_text = match response.text().await {
        Ok(t) => t,
        Err(e) => {
            case.status = TestStatus::Error;
            case.error_message = Some(format!("failed to read response body: {}", e));
            return;
        }
    };
    let body_value: Option<Value> = serde_json::from_str(&body_text).ok();

    case.actual_output = Some(serde_json::json!({
        "status": status_code,
        "body": body_value.clone().unwrap_or(Value::String(body_text.clone())),
    }));

    match check_http_expectations(&case.expected_output, status_code, body_value.as_ref()) {
        Ok(()) => case.status = TestStatus::Passed,
        Err(mismatch) => {
            case.status = TestStatus::Failed;
            case.error_message = Some(mismatch);
        }
    }
}

fn check_http_expectations(
    expected: &ExpectedOutput,
    status_code: u16,
    body: Option<&Value>,
) -> Result<(), String> {
    if let Some(expected_status) = expected.status {
        if status_code != expected_status {
            return Err(format!(
                "expected status {}, got {}",
                expected_status, status_code
            ));
        }
    }

    if let Some(expected_body) = &expected.body {
        let Some(actual) = body else {
            return Err("expected a JSON body, got none".to_string());
        };
        if !json_matches(expected_body, actual) {
            return Err(format!("body mismatch: expected {}", expected_body));
        }
    }

    if let Some(contains) = &expected.body_contains {
        let Some(actual) = body.and_then(|v| v.as_object()) else {
            return Err("expected a JSON object body".to_string());
        };
        for (key, expected_value) in contains {
            match actual.get(key) {
                None => return Err(format!("body missing key {}", key)),
                // A null expectation asserts presence only.
                Some(_) if expected_value.is_null() => {}
                Some(actual_value) if actual_value == expected_value => {}
                Some(actual_value) => {
                    return Err(format!(
                        "body key {} is {}, expected {}",
                        key, actual_value, expected_value
                    ))
                }
            }
        }
    }

    Ok(())
}

/// Exact equality for scalars and arrays; for objects, every expected key
/// must match the actual value (subset equality).
fn json_matches(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(exp), Value::Object(act)) => exp
            .iter()
            .all(|(k, v)| act.get(k).is_some_and(|a| json_matches(v, a))),
        _ => expected == actual,
    }
}

async fn execute_cli_case(
    runner: &mut dyn Runner,
    container_id: Option<&str>,
    case: &mut TestCase,
    timeout: Duration,
) {
    let command = case.input.command.clone().unwrap_or_default();
    let result = runner.execute(&command, timeout, container_id).await;

    case.actual_output = Some(serde_json::json!({
        "exit_code": result.exit_code,
        "stdout": result.stdout,
        "stderr": result.stderr,
        "timed_out": result.timed_out,
    }));

    let expected = &case.expected_output;
    let mut mismatches = Vec::new();

    match expected.exit_code {
        Some(code) if result.exit_code != code => {
            mismatches.push(format!("expected exit {}, got {}", code, result.exit_code));
        }
        // With no explicit expectations at all, a clean exit is the check.
        None if expected.stdout_contains.is_none()
            && expected.stderr_contains.is_none()
            && result.exit_code != 0 =>
        {
            mismatches.push(format!("expected exit 0, got {}", result.exit_code));
        }
        _ => {}
    }
    if let Some(needle) = &expected.stdout_contains {
        if !result.stdout.contains(needle) {
            mismatches.push(format!("stdout missing \"{}\"", needle));
        }
    }
    if let Some(needle) = &expected.stderr_contains {
        if !result.stderr.contains(needle) {
            mismatches.push(format!("stderr missing \"{}\"", needle));
        }
    }

    if mismatches.is_empty() {
        case.status = TestStatus::Passed;
    } else {
        case.status = TestStatus::Failed;
        case.error_message = Some(mismatches.join("; "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::TestInput;
    use crate::runner::{BuildResult, DeploymentConfig, DeploymentResult, ExecutionResult};
    use async_trait::async_trait;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::path::Path;

    struct StubRunner {
        exec_result: ExecutionResult,
    }

    #[async_trait]
    impl Runner for StubRunner {
        async fn build(
            &mut self,
            _submission_path: &Path,
            _dockerfile_path: Option<&Path>,
            _timeout: Duration,
        ) -> BuildResult {
            unimplemented!("not used in functional tests")
        }

        async fn deploy(&mut self, _config: &DeploymentConfig) -> DeploymentResult {
            unimplemented!("not used in functional tests")
        }

        async fn execute(
            &mut self,
            _command: &str,
            _timeout: Duration,
            _container_id: Option<&str>,
        ) -> ExecutionResult {
            self.exec_result.clone()
        }

        async fn get_logs(&self, _container_id: &str, _tail: usize) -> Vec<String> {
            Vec::new()
        }

        async fn cleanup(&mut self) {}
    }

    fn http_case(id: &str, endpoint: &str, expected: ExpectedOutput) -> TestCase {
        TestCase {
            id: id.to_string(),
            description: String::new(),
            input: TestInput {
                method: Some("GET".to_string()),
                endpoint: Some(endpoint.to_string()),
                ..Default::default()
            },
            expected_output: expected,
            requirements: Vec::new(),
            status: TestStatus::Pending,
            actual_output: None,
            error_message: None,
            execution_time_ms: None,
        }
    }

    async fn spawn_test_server() -> String {
        let app = Router::new()
            .route("/health", get(|| async { Json(serde_json::json!({"status": "ok"})) }))
            .route(
                "/item",
                get(|| async { Json(serde_json::json!({"id": 7, "name": "widget"})) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn noop_runner() -> StubRunner {
        StubRunner {
            exec_result: ExecutionResult {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
                timed_out: false,
            },
        }
    }

    #[tokio::test]
    async fn test_http_case_status_match() {
        let url = spawn_test_server().await;
        let mut runner = noop_runner();
        let mut cases = vec![http_case(
            "tc-1",
            "/health",
            ExpectedOutput {
                status: Some(200),
                ..Default::default()
            },
        )];

        let outcome =
            run_test_cases(&mut runner, &url, None, &mut cases, Duration::from_secs(5)).await;
        assert_eq!(outcome.passed, 1);
        assert_eq!(cases[0].status, TestStatus::Passed);
        assert!(cases[0].execution_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_http_case_status_mismatch_is_failed_not_error() {
        let url = spawn_test_server().await;
        let mut runner = noop_runner();
        let mut cases = vec![http_case(
            "tc-404",
            "/missing",
            ExpectedOutput {
                status: Some(200),
                ..Default::default()
            },
        )];

        run_test_cases(&mut runner, &url, None, &mut cases, Duration::from_secs(5)).await;
        assert_eq!(cases[0].status, TestStatus::Failed);
        assert!(cases[0].error_message.as_ref().unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_http_case_connection_error_is_error() {
        // Port 1 refuses connections.
        let mut runner = noop_runner();
        let mut cases = vec![http_case(
            "tc-conn",
            "/health",
            ExpectedOutput {
                status: Some(200),
                ..Default::default()
            },
        )];

        run_test_cases(
            &mut runner,
            "http://127.0.0.1:1",
            None,
            &mut cases,
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(cases[0].status, TestStatus::Error);
        assert!(cases[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_http_body_subset_match() {
        let url = spawn_test_server().await;
        let mut runner = noop_runner();
        let mut cases = vec![http_case(
            "tc-body",
            "/item",
            ExpectedOutput {
                status: Some(200),
                body: Some(serde_json::json!({"id": 7})),
                ..Default::default()
            },
        )];

        run_test_cases(&mut runner, &url, None, &mut cases, Duration::from_secs(5)).await;
        assert_eq!(cases[0].status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn test_http_body_contains_presence_and_value() {
        let url = spawn_test_server().await;
        let mut runner = noop_runner();

        let mut contains = serde_json::Map::new();
        contains.insert("name".to_string(), serde_json::Value::Null); // presence only
        contains.insert("id".to_string(), serde_json::json!(7)); // value match
        let mut cases = vec![http_case(
            "tc-contains",
            "/item",
            ExpectedOutput {
                body_contains: Some(contains),
                ..Default::default()
            },
        )];

        run_test_cases(&mut runner, &url, None, &mut cases, Duration::from_secs(5)).await;
        assert_eq!(cases[0].status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn test_http_body_contains_missing_key_fails() {
        let url = spawn_test_server().await;
        let mut runner = noop_runner();

        let mut contains = serde_json::Map::new();
        contains.insert("absent".to_string(), serde_json::Value::Null);
        let mut cases = vec![http_case(
            "tc-missing",
            "/item",
            ExpectedOutput {
                body_contains: Some(contains),
                ..Default::default()
            },
        )];

        run_test_cases(&mut runner, &url, None, &mut cases, Duration::from_secs(5)).await;
        assert_eq!(cases[0].status, TestStatus::Failed);
    }

    #[tokio::test]
    async fn test_cli_case_exit_code() {
        let mut runner = StubRunner {
            exec_result: ExecutionResult {
                stdout: "v1.2.3".to_string(),
                stderr: String::new(),
                exit_code: 0,
                timed_out: false,
            },
        };
        let mut cases = vec![TestCase {
            id: "tc-cli".to_string(),
            description: String::new(),
            input: TestInput {
                command: Some("./app --version".to_string()),
                ..Default::default()
            },
            expected_output: ExpectedOutput {
                exit_code: Some(0),
                stdout_contains: Some("v1.2".to_string()),
                ..Default::default()
            },
            requirements: Vec::new(),
            status: TestStatus::Pending,
            actual_output: None,
            error_message: None,
            execution_time_ms: None,
        }];

        let outcome = run_test_cases(
            &mut runner,
            "http://unused",
            None,
            &mut cases,
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(outcome.passed, 1);
    }

    #[tokio::test]
    async fn test_cli_case_default_expects_clean_exit() {
        let mut runner = StubRunner {
            exec_result: ExecutionResult {
                stdout: String::new(),
                stderr: "boom".to_string(),
                exit_code: 2,
                timed_out: false,
            },
        };
        let mut cases = vec![TestCase {
            id: "tc-cli-fail".to_string(),
            description: String::new(),
            input: TestInput {
                command: Some("./app check".to_string()),
                ..Default::default()
            },
            expected_output: ExpectedOutput::default(),
            requirements: Vec::new(),
            status: TestStatus::Pending,
            actual_output: None,
            error_message: None,
            execution_time_ms: None,
        }];

        run_test_cases(
            &mut runner,
            "http://unused",
            None,
            &mut cases,
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(cases[0].status, TestStatus::Failed);
    }

    #[tokio::test]
    async fn test_shapeless_case_is_noop_pass() {
        let mut runner = noop_runner();
        let mut cases = vec![TestCase {
            id: "tc-noop".to_string(),
            description: String::new(),
            input: TestInput::default(),
            expected_output: ExpectedOutput::default(),
            requirements: Vec::new(),
            status: TestStatus::Pending,
            actual_output: None,
            error_message: None,
            execution_time_ms: None,
        }];

        let outcome = run_test_cases(
            &mut runner,
            "http://unused",
            None,
            &mut cases,
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(outcome.passed, 1);
        assert_eq!(cases[0].status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn test_one_error_does_not_abort_loop() {
        let url = spawn_test_server().await;
        let mut runner = noop_runner();
        let mut cases = vec![
            http_case(
                "tc-err",
                "/health",
                ExpectedOutput {
                    status: Some(200),
                    ..Default::default()
                },
            ),
            http_case(
                "tc-ok",
                "/health",
                ExpectedOutput {
                    status: Some(200),
                    ..Default::default()
                },
            ),
        ];
        // Point the first case at a dead server by rewriting its endpoint to
        // an absolute URL is not possible; instead run both against the live
        // server and verify counts, then a dead-server pass for error
        // isolation.
        let outcome =
            run_test_cases(&mut runner, &url, None, &mut cases, Duration::from_secs(5)).await;
        assert_eq!(outcome.passed, 2);

        let mut dead_cases = vec![
            http_case(
                "tc-dead-1",
                "/a",
                ExpectedOutput {
                    status: Some(200),
                    ..Default::default()
                },
            ),
            http_case(
                "tc-dead-2",
                "/b",
                ExpectedOutput {
                    status: Some(200),
                    ..Default::default()
                },
            ),
        ];
        let outcome = run_test_cases(
            &mut runner,
            "http://127.0.0.1:1",
            None,
            &mut dead_cases,
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(outcome.errored, 2);
        assert_eq!(dead_cases[1].status, TestStatus::Error);
    }

    #[test]
    fn test_pass_rate_empty_suite() {
        let outcome = FunctionalOutcome::default();
        assert_eq!(outcome.pass_rate(), 1.0);
        assert!(outcome.all_passed());
    }

    #[test]
    fn test_json_matches_subset() {
        let expected = serde_json::json!({"a": 1});
        let actual = serde_json::json!({"a": 1, "b": 2});
        assert!(json_matches(&expected, &actual));
        assert!(!json_matches(&actual, &expected));

        // Scalars and arrays are exact.
        assert!(json_matches(
            &serde_json::json!([1, 2]),
            &serde_json::json!([1, 2])
        ));
        assert!(!json_matches(
            &serde_json::json!([1]),
            &serde_json::json!([1, 2])
        ));
    }
}
