use crate::util::{
    decode_enum, decode_id, encode_enum, from_date, from_rfc3339, now, to_date, to_rfc3339,
};
use pm_core::error::TaskError;
use pm_core::tasks::TaskRepository;
use pm_core::types::enums::{Priority, TaskStatus};
use pm_core::types::ids::{TaskId, UserId, WorklogId};
use pm_core::types::io::{CreateTaskInput, CreateWorklogInput};
use pm_core::types::task::{Task, Worklog};
use rusqlite::{Connection, OptionalExtension, params};

const TASK_COLUMNS: &str = "id, title, description, status, priority, start_date, due_date, estimate_hours, created_by, created_at, updated_at";
const WORKLOG_COLUMNS: &str = "id, task_id, user_id, content, spent_minutes, created_at";

pub struct TaskRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> TaskRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn internal(err: impl std::fmt::Display) -> TaskError {
    TaskError::Internal {
        message: err.to_string(),
    }
}

impl TaskRepository for TaskRepo<'_> {
    fn create(&self, input: CreateTaskInput, created_by: &UserId) -> Result<Task, TaskError> {
        let now = now();
        let task = Task {
            id: TaskId::generate(),
            title: input.title.trim().to_string(),
            description: input.description,
            status: input.status.unwrap_or(TaskStatus::Todo),
            priority: input.priority.unwrap_or(Priority::Medium),
            start_date: input.start_date,
            due_date: input.due_date,
            estimate_hours: input.estimate_hours,
            created_by: created_by.clone(),
            created_at: now,
            updated_at: now,
        };

        let sql = format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        );
        self.conn
            .execute(
                &sql,
                params![
                    task.id.as_str(),
                    task.title,
                    task.description,
                    encode_enum(&task.status).map_err(internal)?,
                    encode_enum(&task.priority).map_err(internal)?,
                    task.start_date.as_ref().map(to_date),
                    task.due_date.as_ref().map(to_date),
                    task.estimate_hours,
                    task.created_by.as_str(),
                    to_rfc3339(&task.created_at),
                    to_rfc3339(&task.updated_at),
                ],
            )
            .map_err(internal)?;
        self.add_assignee(&task.id, created_by)?;

        Ok(task)
    }

    fn get(&self, id: &TaskId) -> Result<Option<Task>, TaskError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql).map_err(internal)?;
        let mut rows = stmt.query([id.as_str()]).map_err(internal)?;
        let Some(row) = rows.next().map_err(internal)? else {
            return Ok(None);
        };
        map_task_row(row).map(Some)
    }

    fn add_assignee(&self, id: &TaskId, user_id: &UserId) -> Result<(), TaskError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO task_assignees (task_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), user_id.as_str(), to_rfc3339(&now())],
            )
            .map_err(internal)?;
        Ok(())
    }

    fn has_access(&self, id: &TaskId, actor: &UserId) -> Result<bool, TaskError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM task_assignees WHERE task_id = ?1 AND user_id = ?2",
                params![id.as_str(), actor.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(internal)?;
        Ok(found.is_some())
    }

    fn add_worklog(
        &self,
        id: &TaskId,
        user_id: &UserId,
        input: CreateWorklogInput,
    ) -> Result<Worklog, TaskError> {
        let worklog = Worklog {
            id: WorklogId::generate(),
            task_id: id.clone(),
            user_id: user_id.clone(),
            content: input.content.trim().to_string(),
            spent_minutes: input.spent_minutes,
            created_at: now(),
        };
        let sql = format!("INSERT INTO worklogs ({WORKLOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)");
        self.conn
            .execute(
                &sql,
                params![
                    worklog.id.as_str(),
                    worklog.task_id.as_str(),
                    worklog.user_id.as_str(),
                    worklog.content,
                    worklog.spent_minutes,
                    to_rfc3339(&worklog.created_at),
                ],
            )
            .map_err(internal)?;
        Ok(worklog)
    }

    fn worklogs(&self, id: &TaskId) -> Result<Vec<Worklog>, TaskError> {
        let sql = format!(
            "SELECT {WORKLOG_COLUMNS} FROM worklogs WHERE task_id = ?1 ORDER BY created_at ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(internal)?;
        let mut rows = stmt.query([id.as_str()]).map_err(internal)?;
        let mut worklogs = Vec::new();
        while let Some(row) = rows.next().map_err(internal)? {
            worklogs.push(map_worklog_row(row)?);
        }
        Ok(worklogs)
    }
}

fn map_task_row(row: &rusqlite::Row<'_>) -> Result<Task, TaskError> {
    let id: String = row.get(0).map_err(internal)?;
    let status: String = row.get(3).map_err(internal)?;
    let priority: String = row.get(4).map_err(internal)?;
    let start_date: Option<String> = row.get(5).map_err(internal)?;
    let due_date: Option<String> = row.get(6).map_err(internal)?;
    let created_by: String = row.get(8).map_err(internal)?;
    let created_at: String = row.get(9).map_err(internal)?;
    let updated_at: String = row.get(10).map_err(internal)?;

    Ok(Task {
        id: decode_id(&id).map_err(internal)?,
        title: row.get(1).map_err(internal)?,
        description: row.get(2).map_err(internal)?,
        status: decode_enum(&status).map_err(internal)?,
        priority: decode_enum(&priority).map_err(internal)?,
        start_date: start_date
            .as_deref()
            .map(from_date)
            .transpose()
            .map_err(internal)?,
        due_date: due_date
            .as_deref()
            .map(from_date)
            .transpose()
            .map_err(internal)?,
        estimate_hours: row.get(7).map_err(internal)?,
        created_by: decode_id(&created_by).map_err(internal)?,
        created_at: from_rfc3339(&created_at).map_err(internal)?,
        updated_at: from_rfc3339(&updated_at).map_err(internal)?,
    })
}

fn map_worklog_row(row: &rusqlite::Row<'_>) -> Result<Worklog, TaskError> {
    let id: String = row.get(0).map_err(internal)?;
    let task_id: String = row.get(1).map_err(internal)?;
    let user_id: String = row.get(2).map_err(internal)?;
    let created_at: String = row.get(5).map_err(internal)?;

    Ok(Worklog {
        id: decode_id(&id).map_err(internal)?,
        task_id: decode_id(&task_id).map_err(internal)?,
        user_id: decode_id(&user_id).map_err(internal)?,
        content: row.get(3).map_err(internal)?,
        spent_minutes: row.get(4).map_err(internal)?,
        created_at: from_rfc3339(&created_at).map_err(internal)?,
    })
}
