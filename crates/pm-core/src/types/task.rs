use crate::types::enums::{Priority, TaskStatus};
use crate::types::ids::{TaskId, UserId, WorklogId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub estimate_hours: Option<f64>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Worklog {
    pub id: WorklogId,
    pub task_id: TaskId,
    pub user_id: UserId,
    pub content: String,
    pub spent_minutes: u32,
    pub created_at: DateTime<Utc>,
}

/// A task together with its worklogs, oldest first. This is what gets evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskContext {
    pub task: Task,
    pub worklogs: Vec<Worklog>,
}

impl TaskContext {
    pub fn total_minutes(&self) -> u64 {
        self.worklogs
            .iter()
            .map(|log| u64::from(log.spent_minutes))
            .sum()
    }
}
