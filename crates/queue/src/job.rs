use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a tracked job. Transitions are monotonic:
/// `Queued -> Running -> {Succeeded | Failed}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One admitted unit of work tracked by the interaction queue.
///
/// Records are mutated only by the queue's own execution wrapper and are
/// garbage-collected by eviction after reaching a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub kind: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Caller-supplied observability bag. Never interpreted by the queue.
    pub meta: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn new(kind: &str, meta: serde_json::Value) -> Self {
        Self {
            id: Self::new_id(kind),
            kind: kind.to_string(),
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            meta,
            result: None,
            error: None,
        }
    }

    /// Job id format: `{kind}-{epochMillis}-{random6}`.
    pub fn new_id(kind: &str) -> String {
        let millis = Utc::now().timestamp_millis();
        let rand6: String = uuid::Uuid::new_v4().simple().to_string()[..6].to_string();
        format!("{}-{}-{}", kind, millis, rand6)
    }
}
