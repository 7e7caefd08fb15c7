use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::evaluation::EvaluationResult;
use crate::submission::SubmissionSource;

/// A request to evaluate one submission against one problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub problem_id: String,
    pub submission: SubmissionSource,
    #[serde(default)]
    pub submission_id: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One in-flight or finished evaluation tracked by the service.
pub struct Session {
    pub id: String,
    pub request: EvaluateRequest,
    pub state: Arc<Mutex<SessionState>>,
    pub result: Arc<Mutex<Option<EvaluationResult>>>,
    pub created_at: DateTime<Utc>,
}

pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    ttl_secs: u64,
}

impl SessionManager {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl_secs,
        }
    }

    pub fn create(&self, request: EvaluateRequest) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session {
            id: id.clone(),
            request,
            state: Arc::new(Mutex::new(SessionState::Pending)),
            result: Arc::new(Mutex::new(None)),
            created_at: Utc::now(),
        });
        self.sessions.insert(id, session.clone());
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        self.sessions
            .iter()
            .map(|entry| {
                let s = entry.value();
                SessionSummary {
                    id: s.id.clone(),
                    problem_id: s.request.problem_id.clone(),
                    created_at: s.created_at,
                }
            })
            .collect()
    }

    /// Drop sessions older than the TTL. Runs of those sessions have long
    /// finished; their results live on disk.
    pub async fn reaper_loop(&self) {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let now = Utc::now();
            let mut expired = Vec::new();

            for entry in self.sessions.iter() {
                let age = (now - entry.value().created_at).num_seconds() as u64;
                if age > self.ttl_secs {
                    expired.push(entry.key().clone());
                }
            }

            for id in expired {
                if self.sessions.remove(&id).is_some() {
                    info!("Reaped expired session {}", id);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub problem_id: String,
    pub created_at: DateTime<Utc>,
}
