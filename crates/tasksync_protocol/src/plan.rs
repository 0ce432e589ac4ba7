//! Batch planning for reconciliation.
//!
//! Both the client-side reconciler and the server's bulk-sync endpoint turn a
//! staged task list into the same ordered sequence of operations, so the two
//! paths agree on which request each task produces.

use crate::task::{SyncStatus, Task};
use std::collections::HashSet;

/// One step of a reconciliation batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedOp<'a> {
    /// Tombstone whose id exists on the server: delete by id.
    Delete(&'a Task),
    /// Live task whose id exists on the server: full update.
    Update(&'a Task),
    /// Live task unknown to the server: create.
    Create(&'a Task),
    /// Tombstone the server never saw: drop locally without a request.
    Discard(&'a Task),
}

impl<'a> PlannedOp<'a> {
    /// The task this step applies to.
    pub fn task(&self) -> &'a Task {
        match self {
            PlannedOp::Delete(t)
            | PlannedOp::Update(t)
            | PlannedOp::Create(t)
            | PlannedOp::Discard(t) => t,
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PlannedOp::Delete(_) => "delete",
            PlannedOp::Update(_) => "update",
            PlannedOp::Create(_) => "create",
            PlannedOp::Discard(_) => "discard",
        }
    }

    /// Returns true if this step issues a request.
    pub fn is_remote(&self) -> bool {
        !matches!(self, PlannedOp::Discard(_))
    }
}

/// Orders a staged batch into operations.
///
/// Tombstones come first, in array order, followed by creates and updates in
/// array order. Tasks already `Synced` and not deleted produce nothing.
/// `existing` is the set of ids present on the server when the run started.
pub fn plan_batch<'a>(local: &'a [Task], existing: &HashSet<String>) -> Vec<PlannedOp<'a>> {
    let deletes = local.iter().filter(|t| t.deleted).map(|t| {
        if existing.contains(&t.id) {
            PlannedOp::Delete(t)
        } else {
            PlannedOp::Discard(t)
        }
    });
    let upserts = local
        .iter()
        .filter(|t| !t.deleted && t.sync_status != SyncStatus::Synced)
        .map(|t| {
            if existing.contains(&t.id) {
                PlannedOp::Update(t)
            } else {
                PlannedOp::Create(t)
            }
        });
    deletes.chain(upserts).collect()
}
