use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::auth;
use crate::cleanup;
use crate::config::Config;
use crate::evaluation::{EvaluationResult, Evaluator, ResultStatus, ScoreBreakdown};
use crate::analysis::MetricsCalculator;
use crate::metrics::Metrics;
use crate::problem::Problem;
use crate::runner::Backend;
use crate::session::{EvaluateRequest, Session, SessionManager, SessionState};
use crate::submission;

pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub metrics: Arc<Metrics>,
    pub semaphore: Arc<Semaphore>,
    pub started_at: chrono::DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid token")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("at capacity ({0}/{0}), try again later")]
    AtCapacity(usize),
    #[error("{0} not found")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::AtCapacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, self.to_string()).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/evaluate", post(evaluate))
        .route("/evaluate/{id}", get(get_eval))
        .route("/evaluations", get(list_evals))
        .route("/problems/{id}", get(get_problem))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: i64,
    backend: String,
    active_evals: u64,
    total_evals: u64,
    passed: u64,
    failed: u64,
    errored: u64,
    capacity: usize,
    available_slots: usize,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
        backend: state.config.backend.as_str().to_string(),
        active_evals: state.metrics.evals_active.load(Ordering::Relaxed),
        total_evals: state.metrics.evals_total.load(Ordering::Relaxed),
        passed: state.metrics.evals_passed.load(Ordering::Relaxed),
        failed: state.metrics.evals_failed.load(Ordering::Relaxed),
        errored: state.metrics.evals_errored.load(Ordering::Relaxed),
        capacity: state.config.max_concurrent_evals,
        available_slots: state.semaphore.available_permits(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let body = state.metrics.render_prometheus();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

async fn evaluate(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<EvaluateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(ref expected) = state.config.auth_token {
        let auth_header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if !auth::check_token(auth_header, expected) {
            return Err(ApiError::Unauthorized);
        }
    }

    if payload.problem_id.is_empty() {
        return Err(ApiError::BadRequest("problem_id is required".to_string()));
    }
    if let Some(backend) = &payload.backend {
        if Backend::from_str_loose(backend).is_none() {
            return Err(ApiError::BadRequest(format!("unknown backend {}", backend)));
        }
    }

    let permit = state.semaphore.clone().try_acquire_owned();
    let Ok(permit) = permit else {
        return Err(ApiError::AtCapacity(state.config.max_concurrent_evals));
    };

    let session = state.sessions.create(payload);
    let id = session.id.clone();

    let state_for_task = state.clone();
    tokio::spawn(async move {
        run_evaluation(state_for_task, session).await;
        drop(permit);
    });

    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "eval_id": id }))))
}

/// Drive one evaluation end to end: stage the submission, load the problem,
/// evaluate, persist, and record counters. Every fault is folded into an
/// error-status result so the session always carries one.
async fn run_evaluation(state: Arc<AppState>, session: Arc<Session>) {
    *session.state.lock().await = SessionState::Running;
    state.metrics.start_eval();
    let started = std::time::Instant::now();

    let run_dir = state.config.workspace_base.join(&session.id);
    let result = match prepare_and_evaluate(&state, &session, &run_dir).await {
        Ok(result) => result,
        Err(e) => {
            error!(session_id = %session.id, error = %format!("{:#}", e), "Evaluation setup failed");
            error_result(
                &session.request.problem_id,
                session.request.submission_id.clone(),
                format!("{:#}", e),
            )
        }
    };

    if let Err(e) = result.save(&state.config.output_dir) {
        error!(session_id = %session.id, error = %format!("{:#}", e), "Failed to persist result");
    }

    state
        .metrics
        .finish_eval(result.status, started.elapsed().as_millis() as u64);
    *session.state.lock().await = match result.status {
        ResultStatus::Passed | ResultStatus::Failed => SessionState::Completed,
        ResultStatus::Error => SessionState::Failed,
    };
    info!(
        session_id = %session.id,
        status = ?result.status,
        total_score = %result.total_score,
        "Evaluation finished"
    );
    *session.result.lock().await = Some(result);

    cleanup::remove_run_dir(&run_dir).await;
}

async fn prepare_and_evaluate(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    run_dir: &std::path::Path,
) -> anyhow::Result<EvaluationResult> {
    tokio::fs::create_dir_all(run_dir).await?;

    let staged =
        submission::stage_submission(&session.request.submission, &run_dir.join("submission"))
            .await?;
    let problem = Problem::load(&session.request.problem_id, &state.config.problems_dir)?;

    let backend = session
        .request
        .backend
        .as_deref()
        .and_then(Backend::from_str_loose)
        .unwrap_or(state.config.backend);

    let evaluator = Evaluator::new(backend)
        .with_calculator(MetricsCalculator::new(
            state.config.perf_tool,
            state.config.security_tool,
        ))
        .with_build_timeout(std::time::Duration::from_secs(
            state.config.build_timeout_secs,
        ))
        .with_cli_test_timeout(std::time::Duration::from_secs(
            state.config.cli_test_timeout_secs,
        ))
        .with_perf_duration_secs(state.config.perf_duration_secs);

    let mut result = evaluator
        .evaluate(
            problem,
            &staged.root,
            session.request.submission_id.clone(),
            run_dir,
        )
        .await;

    if let Some(digest) = staged.digest {
        result
            .artifacts
            .insert("submission_sha256".to_string(), digest);
    }
    Ok(result)
}

fn error_result(
    problem_id: &str,
    submission_id: Option<String>,
    message: String,
) -> EvaluationResult {
    let timestamp = Utc::now();
    EvaluationResult {
        problem_id: problem_id.to_string(),
        submission_id: submission_id
            .unwrap_or_else(|| format!("{}-{}", problem_id, timestamp.format("%Y%m%d%H%M%S"))),
        timestamp,
        total_score: 0.0,
        status: ResultStatus::Error,
        execution_time_ms: 0,
        scores: ScoreBreakdown::default(),
        test_results: Vec::new(),
        criteria_results: Vec::new(),
        logs: vec![format!(
            "[{}] Evaluation error: {}",
            timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            message
        )],
        artifacts: HashMap::new(),
    }
}

async fn get_eval(
    State(state): State<Arc<AppState>>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("evaluation {}", id)))?;
    let session_state = *session.state.lock().await;
    let result = session.result.lock().await;

    Ok(Json(serde_json::json!({
        "eval_id": session.id,
        "problem_id": session.request.problem_id,
        "state": session_state,
        "result": &*result,
    })))
}

async fn list_evals(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!(state.sessions.list()))
}

/// Problem lookup with authoring findings so problem authors can lint a
/// definition before running evaluations against it.
async fn get_problem(
    State(state): State<Arc<AppState>>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let problem = Problem::load(&id, &state.config.problems_dir)
        .map_err(|_| ApiError::NotFound(format!("problem {}", id)))?;
    let findings = problem.validate();

    Ok(Json(serde_json::json!({
        "problem_id": problem.problem_id,
        "title": problem.title,
        "category": problem.category,
        "difficulty": problem.difficulty,
        "test_cases": problem.test_cases.len(),
        "criteria": problem.evaluation_criteria.len(),
        "validation_findings": findings,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_result_shape() {
        let result = error_result("WEB-001", None, "problem not found".to_string());
        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.total_score, 0.0);
        assert!(result.submission_id.starts_with("WEB-001-"));
        assert_eq!(result.logs.len(), 1);
        assert!(result.logs[0].contains("problem not found"));
    }

    #[test]
    fn test_error_result_keeps_caller_submission_id() {
        let result = error_result("WEB-001", Some("sub-9".to_string()), "boom".to_string());
        assert_eq!(result.submission_id, "sub-9");
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::Unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::AtCapacity(4).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::NotFound("problem X".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
