//! Server-side task storage.

use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use std::collections::HashSet;
use tasksync_protocol::{plan_batch, PlannedOp, SyncStatus, Task, TaskPatch};
use tracing::debug;

/// In-memory task table, in insertion order.
///
/// Display names are unique per user. Stored tasks are always `synced` and
/// never tombstoned.
#[derive(Debug, Default)]
pub struct TaskRepository {
    tasks: RwLock<Vec<Task>>,
}

impl TaskRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks of `user_id`.
    pub fn list(&self, user_id: &str) -> Vec<Task> {
        self.tasks
            .read()
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Looks up a task.
    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.read().iter().find(|t| t.id == id).cloned()
    }

    /// Total number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    /// Returns true if no task is stored.
    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Stores a new task.
    pub fn create(&self, task: Task) -> ServerResult<Task> {
        let mut tasks = self.tasks.write();
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(ServerError::InvalidRequest(format!(
                "task {} already exists",
                task.id
            )));
        }
        validate(&tasks, &task)?;
        let stored = normalize(task);
        tasks.push(stored.clone());
        debug!(task_id = %stored.id, "task created");
        Ok(stored)
    }

    /// Replaces an existing task.
    pub fn update(&self, task: Task) -> ServerResult<Task> {
        let mut tasks = self.tasks.write();
        let index = position(&tasks, &task.id)?;
        validate(&tasks, &task)?;
        let stored = normalize(task);
        tasks[index] = stored.clone();
        Ok(stored)
    }

    /// Applies a partial update.
    pub fn patch(&self, id: &str, patch: &TaskPatch) -> ServerResult<Task> {
        let mut tasks = self.tasks.write();
        let index = position(&tasks, id)?;
        let mut patched = tasks[index].clone();
        patched.apply_patch(patch);
        validate(&tasks, &patched)?;
        tasks[index] = patched.clone();
        Ok(patched)
    }

    /// Removes a task.
    pub fn delete(&self, id: &str) -> ServerResult<()> {
        let mut tasks = self.tasks.write();
        let index = position(&tasks, id)?;
        tasks.remove(index);
        debug!(task_id = id, "task deleted");
        Ok(())
    }

    /// Applies a staged batch for `user_id` in reconciliation order and
    /// returns the resulting list.
    ///
    /// Stops at the first failing task and reports its id. Operations
    /// applied before it are kept.
    pub fn apply_batch(&self, user_id: &str, batch: &[Task]) -> Result<Vec<Task>, (String, ServerError)> {
        let existing: HashSet<String> = self.list(user_id).into_iter().map(|t| t.id).collect();
        for op in plan_batch(batch, &existing) {
            let id = op.task().id.clone();
            let result = match op {
                PlannedOp::Delete(t) => self.delete(&t.id),
                PlannedOp::Update(t) => self.update(t.clone()).map(drop),
                PlannedOp::Create(t) => self.create(t.clone()).map(drop),
                PlannedOp::Discard(_) => Ok(()),
            };
            result.map_err(|e| (id, e))?;
        }
        Ok(self.list(user_id))
    }
}

fn position(tasks: &[Task], id: &str) -> ServerResult<usize> {
    tasks
        .iter()
        .position(|t| t.id == id)
        .ok_or_else(|| ServerError::NotFound(format!("task {id}")))
}

fn validate(tasks: &[Task], task: &Task) -> ServerResult<()> {
    if task.display_name.trim().is_empty() {
        return Err(ServerError::InvalidRequest("displayName is required".into()));
    }
    let duplicate = tasks.iter().any(|t| {
        t.user_id == task.user_id && t.id != task.id && t.display_name == task.display_name
    });
    if duplicate {
        return Err(ServerError::DuplicateName(task.display_name.clone()));
    }
    Ok(())
}

fn normalize(task: Task) -> Task {
    Task {
        deleted: false,
        sync_status: SyncStatus::Synced,
        ..task
    }
}
