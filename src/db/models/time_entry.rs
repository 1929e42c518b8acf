use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One persisted save of a tracking session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: String,
    pub task_id: String,
    pub elapsed_secs: u64,
    pub notes: String,
    pub recorded_at: DateTime<Utc>,
}

impl TimeEntry {
    pub fn new(
        task_id: impl Into<String>,
        elapsed_secs: u64,
        notes: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            elapsed_secs,
            notes: notes.into(),
            recorded_at,
        }
    }
}

/// Totals across every entry recorded for one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskTotal {
    pub task_id: String,
    pub entry_count: u64,
    pub total_secs: u64,
}
