//! Push-then-pull reconciliation of staged changes.

use crate::error::{SyncError, SyncResult};
use crate::notify::{Notification, Notifier, SyncProgress};
use crate::transport::TaskTransport;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tasksync_protocol::{plan_batch, ErrorBody, PlannedOp, Task};
use tracing::{debug, info, warn};

/// How staged changes are pushed to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileStrategy {
    /// One request per staged task, then a fetch.
    #[default]
    PerTask,
    /// One `POST /task/sync/{userId}` carrying the whole batch.
    Bulk,
}

/// Pushes staged local changes and returns the server's canonical list.
///
/// Runs are strictly sequential and fail fast: the first failing operation
/// stops the run and nothing already applied is rolled back. At most one run
/// is in flight per reconciler.
pub struct Reconciler {
    transport: Arc<dyn TaskTransport>,
    strategy: ReconcileStrategy,
    notifier: Option<Arc<dyn Notifier>>,
    in_flight: AtomicBool,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Reconciler {
    /// Creates a reconciler using the per-task strategy.
    pub fn new(transport: Arc<dyn TaskTransport>) -> Self {
        Self {
            transport,
            strategy: ReconcileStrategy::default(),
            notifier: None,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Sets the strategy.
    pub fn with_strategy(mut self, strategy: ReconcileStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Reports progress to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Returns true while a run is in flight.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Reconciles `local` for `user_id` and returns the canonical server list.
    ///
    /// # Errors
    ///
    /// - [`SyncError::ReconcileInProgress`] if another run is in flight; no
    ///   request is issued.
    /// - [`SyncError::Reconciliation`] naming the first task whose operation
    ///   failed; later tasks are not attempted and no final fetch happens.
    /// - Any transport error of the initial or final fetch.
    pub async fn reconcile(&self, user_id: &str, local: &[Task]) -> SyncResult<Vec<Task>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("reconciliation already running");
            return Err(SyncError::ReconcileInProgress);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let result = match self.strategy {
            ReconcileStrategy::PerTask => self.per_task(user_id, local).await,
            ReconcileStrategy::Bulk => self.bulk(user_id, local).await,
        };

        match &result {
            Ok(tasks) => {
                info!(user_id, tasks = tasks.len(), "reconciliation complete");
                self.progress(SyncProgress::Synced { tasks: tasks.len() });
            }
            Err(e) => {
                warn!(user_id, error = %e, "reconciliation failed");
                let task_id = match e {
                    SyncError::Reconciliation { task_id, .. } => Some(task_id.clone()),
                    _ => None,
                };
                self.progress(SyncProgress::Failed { task_id });
            }
        }
        result
    }

    async fn per_task(&self, user_id: &str, local: &[Task]) -> SyncResult<Vec<Task>> {
        let existing: HashSet<String> = self
            .transport
            .fetch_tasks(user_id)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();

        let plan = plan_batch(local, &existing);
        self.progress(SyncProgress::Syncing {
            pending: plan.iter().filter(|op| op.is_remote()).count(),
        });

        for op in plan {
            let task = op.task();
            debug!(task_id = %task.id, op = op.kind(), "reconciling task");
            let result = match op {
                PlannedOp::Delete(t) => self.transport.delete_task(&t.id).await,
                PlannedOp::Update(t) => self.transport.update_task(t).await.map(drop),
                PlannedOp::Create(t) => self.transport.create_task(t).await.map(drop),
                PlannedOp::Discard(_) => Ok(()),
            };
            result.map_err(|source| SyncError::Reconciliation {
                task_id: task.id.clone(),
                source: Box::new(source),
            })?;
        }

        self.transport.fetch_tasks(user_id).await
    }

    async fn bulk(&self, user_id: &str, local: &[Task]) -> SyncResult<Vec<Task>> {
        let pending: Vec<Task> = local.iter().filter(|t| t.is_pending()).cloned().collect();
        self.progress(SyncProgress::Syncing {
            pending: pending.len(),
        });

        self.transport
            .sync_tasks(user_id, &pending)
            .await
            .map_err(|e| {
                let failed_task = e
                    .response()
                    .and_then(|r| r.decode_json::<ErrorBody>().ok())
                    .and_then(|body| body.task_id);
                match failed_task {
                    Some(task_id) => SyncError::Reconciliation {
                        task_id,
                        source: Box::new(e),
                    },
                    None => e,
                }
            })
    }

    fn progress(&self, progress: SyncProgress) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(Notification::SyncProgress(progress));
        }
    }
}
