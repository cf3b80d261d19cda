use serde::{Deserialize, Deserializer};
use serde_json::Value;

use billing_logging::billing_warn;

/// Coarse lifecycle of a server-side job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Done,
    Failed,
}

impl TaskState {
    /// Maps the backend's status vocabulary. Unknown words count as pending.
    pub fn from_status(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "done" | "success" | "succeeded" | "completed" | "finished" => TaskState::Done,
            "failure" | "failed" | "error" | "revoked" => TaskState::Failed,
            "pending" | "processing" | "queued" | "started" | "running" | "progress" => {
                TaskState::Pending
            }
            other => {
                billing_warn!("Unknown task status {:?}; treating as pending", other);
                TaskState::Pending
            }
        }
    }
}

/// One answer of the task status endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskStatus {
    #[serde(alias = "state")]
    pub status: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default, deserialize_with = "error_text")]
    pub error: Option<String>,
    /// Percent complete, when the job reports it.
    #[serde(default)]
    pub progress: Option<f64>,
}

impl TaskStatus {
    pub fn state(&self) -> TaskState {
        TaskState::from_status(&self.status)
    }
}

fn error_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) if text.trim().is_empty() => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

/// What a finished task hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task_id: String,
    pub result: Option<Value>,
    pub download_url: Option<String>,
}
