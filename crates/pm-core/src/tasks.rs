use crate::error::TaskError;
use crate::types::{CreateTaskInput, CreateWorklogInput, Task, TaskContext, TaskId, UserId, Worklog};

pub trait TaskRepository {
    /// Creates the task and makes `created_by` its first assignee.
    fn create(&self, input: CreateTaskInput, created_by: &UserId) -> Result<Task, TaskError>;
    fn get(&self, id: &TaskId) -> Result<Option<Task>, TaskError>;
    fn add_assignee(&self, id: &TaskId, user_id: &UserId) -> Result<(), TaskError>;
    fn has_access(&self, id: &TaskId, actor: &UserId) -> Result<bool, TaskError>;
    fn add_worklog(
        &self,
        id: &TaskId,
        user_id: &UserId,
        input: CreateWorklogInput,
    ) -> Result<Worklog, TaskError>;
    /// Oldest first.
    fn worklogs(&self, id: &TaskId) -> Result<Vec<Worklog>, TaskError>;

    fn context(&self, id: &TaskId) -> Result<Option<TaskContext>, TaskError> {
        let Some(task) = self.get(id)? else {
            return Ok(None);
        };
        let worklogs = self.worklogs(id)?;
        Ok(Some(TaskContext { task, worklogs }))
    }
}
