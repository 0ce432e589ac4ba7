//! The synchronized record type.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local synchronization state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Changed locally, not yet confirmed by the server.
    #[default]
    Unsynced,
    /// Matches a confirmed server write.
    Synced,
    /// The last attempt to push this task failed; retried on the next pass.
    Error,
}

/// A task record.
///
/// `deleted` marks a tombstone: the task is pending removal on the server and
/// is purged locally only once the server acknowledges the delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Human readable name, unique per user.
    pub display_name: String,
    /// Ordering priority (lower sorts first).
    pub priority: u8,
    /// Completion flag.
    #[serde(default)]
    pub done: bool,
    /// Tombstone flag.
    #[serde(default)]
    pub deleted: bool,
    /// Local synchronization state. Servers always report `synced`.
    #[serde(default)]
    pub sync_status: SyncStatus,
}

impl Task {
    /// Creates a new unsynced task with a random id.
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            display_name: display_name.into(),
            priority,
            done: false,
            deleted: false,
            sync_status: SyncStatus::Unsynced,
        }
    }

    /// Sets the id, returning the modified task.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the sync status, returning the modified task.
    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.sync_status = status;
        self
    }

    /// Marks this task as a tombstone awaiting server removal.
    pub fn tombstone(mut self) -> Self {
        self.deleted = true;
        self.sync_status = SyncStatus::Unsynced;
        self
    }

    /// Returns true if this task still has to be pushed to the server.
    pub fn is_pending(&self) -> bool {
        self.deleted || self.sync_status != SyncStatus::Synced
    }

    /// Applies a partial update in place.
    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(done) = patch.done {
            self.done = done;
        }
        if let Some(ref name) = patch.display_name {
            self.display_name = name.clone();
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
    }
}

/// Partial update body for `PATCH /task/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    /// New completion flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// New priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

impl TaskPatch {
    /// A patch that only toggles completion.
    pub fn done(done: bool) -> Self {
        Self {
            done: Some(done),
            ..Self::default()
        }
    }

    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.done.is_none() && self.display_name.is_none() && self.priority.is_none()
    }
}
