//! The local task list.
//!
//! While the engine is online, mutations go to the server first and are kept
//! as `Synced`. Otherwise, or when the server cannot be reached, they are
//! staged locally as `Unsynced` and pushed by the next reconciliation.

use crate::credentials::SessionCredentials;
use crate::error::{SyncError, SyncResult};
use crate::reconciler::Reconciler;
use crate::state::{ConnectivityState, StoreMode};
use crate::transport::TaskTransport;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tasksync_protocol::{SyncStatus, Task, TaskPatch};
use tasksync_storage::{Medium, PersistentStore};
use tracing::{debug, info};

/// Storage key of the task list.
pub const TASKS_KEY: &str = "tasks";
/// Storage key of the sync metadata.
pub const SYNC_KEY: &str = "sync";

/// Bookkeeping stored under [`SYNC_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    /// User the list belongs to.
    pub user_id: Option<String>,
    /// Milliseconds since the epoch of the last successful reconciliation.
    pub last_synced_at: Option<u64>,
    /// Tasks still waiting to be pushed.
    pub pending: usize,
}

/// The task state container.
pub struct TaskStore {
    tasks: RwLock<Vec<Task>>,
    persistence: Arc<PersistentStore>,
    transport: Arc<dyn TaskTransport>,
    reconciler: Reconciler,
    credentials: Arc<SessionCredentials>,
    state: Arc<ConnectivityState>,
}

impl TaskStore {
    /// Creates a store and loads any list held by the active medium.
    pub fn open(
        persistence: Arc<PersistentStore>,
        transport: Arc<dyn TaskTransport>,
        reconciler: Reconciler,
        credentials: Arc<SessionCredentials>,
        state: Arc<ConnectivityState>,
    ) -> SyncResult<Self> {
        let tasks = persistence.read_json::<Vec<Task>>(TASKS_KEY)?.unwrap_or_default();
        if !tasks.is_empty() {
            debug!(tasks = tasks.len(), medium = %persistence.active(), "loaded task list");
        }
        Ok(Self {
            tasks: RwLock::new(tasks),
            persistence,
            transport,
            reconciler,
            credentials,
            state,
        })
    }

    /// Visible tasks, tombstones excluded.
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.read().iter().filter(|t| !t.deleted).cloned().collect()
    }

    /// Every task held locally, tombstones included.
    pub fn all_tasks(&self) -> Vec<Task> {
        self.tasks.read().clone()
    }

    /// Looks up a task.
    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.read().iter().find(|t| t.id == id).cloned()
    }

    /// Number of tasks waiting to be pushed.
    pub fn pending_count(&self) -> usize {
        self.tasks.read().iter().filter(|t| t.is_pending()).count()
    }

    /// Sync bookkeeping of the active medium.
    pub fn metadata(&self) -> SyncResult<SyncMetadata> {
        Ok(self.persistence.read_json(SYNC_KEY)?.unwrap_or_default())
    }

    /// The persistence layer.
    pub fn persistence(&self) -> &Arc<PersistentStore> {
        &self.persistence
    }

    fn is_online(&self) -> bool {
        self.state.mode() == StoreMode::Online
    }

    fn user_id(&self) -> SyncResult<String> {
        self.credentials.user_id().ok_or(SyncError::NotAuthenticated)
    }

    /// Creates a task.
    pub async fn add(&self, display_name: impl Into<String>, priority: u8) -> SyncResult<Task> {
        let task = Task::new(self.user_id()?, display_name, priority);
        if self.is_online() {
            match self.transport.create_task(&task).await {
                Ok(saved) => return self.commit(saved.with_status(SyncStatus::Synced)),
                Err(e) if e.is_network() => debug!(task_id = %task.id, "create staged locally"),
                Err(e) => return Err(e),
            }
        }
        self.commit(task)
    }

    /// Replaces a task's fields.
    pub async fn update(&self, task: Task) -> SyncResult<Task> {
        let current = self.get(&task.id).ok_or_else(|| SyncError::TaskNotFound(task.id.clone()))?;
        if self.is_online() {
            match self.transport.update_task(&task).await {
                Ok(saved) => return self.commit(saved.with_status(SyncStatus::Synced)),
                Err(e) if e.is_network() => debug!(task_id = %task.id, "update staged locally"),
                Err(e) => return Err(e),
            }
        }
        let staged = Task {
            deleted: current.deleted,
            sync_status: SyncStatus::Unsynced,
            ..task
        };
        self.commit(staged)
    }

    /// Marks a task done or not done.
    pub async fn set_done(&self, id: &str, done: bool) -> SyncResult<Task> {
        let mut task = self.get(id).ok_or_else(|| SyncError::TaskNotFound(id.to_string()))?;
        let patch = TaskPatch::done(done);
        if self.is_online() {
            match self.transport.patch_task(id, &patch).await {
                Ok(saved) => return self.commit(saved.with_status(SyncStatus::Synced)),
                Err(e) if e.is_network() => debug!(task_id = id, "patch staged locally"),
                Err(e) => return Err(e),
            }
        }
        task.apply_patch(&patch);
        task.sync_status = SyncStatus::Unsynced;
        self.commit(task)
    }

    /// Deletes a task. Staged deletes leave a tombstone until the server
    /// acknowledges them.
    pub async fn remove(&self, id: &str) -> SyncResult<()> {
        let task = self.get(id).ok_or_else(|| SyncError::TaskNotFound(id.to_string()))?;
        if self.is_online() {
            match self.transport.delete_task(id).await {
                Ok(()) => {
                    self.tasks.write().retain(|t| t.id != id);
                    return self.persist();
                }
                Err(e) if e.is_network() => debug!(task_id = id, "delete staged locally"),
                Err(e) => return Err(e),
            }
        }
        self.commit(task.tombstone()).map(drop)
    }

    /// Pushes staged changes and replaces the local list with the server's.
    ///
    /// On a reconciliation failure the failing task is marked `Error` and the
    /// rest of the list is left as it was.
    pub async fn reconcile(&self) -> SyncResult<usize> {
        let user_id = self.user_id()?;
        let local = self.all_tasks();
        match self.reconciler.reconcile(&user_id, &local).await {
            Ok(canonical) => {
                let count = canonical.len();
                self.replace_all(canonical)?;
                self.write_metadata(Some(now_millis()))?;
                info!(user_id = %user_id, tasks = count, "local state replaced");
                Ok(count)
            }
            Err(e) => {
                if let SyncError::Reconciliation { task_id, .. } = &e {
                    if let Some(task) = self.tasks.write().iter_mut().find(|t| t.id == *task_id) {
                        task.sync_status = SyncStatus::Error;
                    }
                    self.persist()?;
                }
                Err(e)
            }
        }
    }

    /// Fetches the server list, keeping staged local changes on top of it.
    pub async fn refresh(&self) -> SyncResult<Vec<Task>> {
        let user_id = self.user_id()?;
        let remote = self.transport.fetch_tasks(&user_id).await?;
        let merged = {
            let local = self.tasks.read();
            let mut merged: Vec<Task> = remote
                .into_iter()
                .map(|server_task| {
                    local
                        .iter()
                        .find(|t| t.id == server_task.id && t.is_pending())
                        .cloned()
                        .unwrap_or_else(|| server_task.with_status(SyncStatus::Synced))
                })
                .collect();
            for pending in local.iter().filter(|t| t.is_pending()) {
                if !merged.iter().any(|t| t.id == pending.id) {
                    merged.push(pending.clone());
                }
            }
            merged
        };
        *self.tasks.write() = merged;
        self.persist()?;
        Ok(self.tasks())
    }

    /// Makes `medium` active and writes the current list to it.
    pub fn switch_medium(&self, medium: Medium) -> SyncResult<()> {
        self.persistence.swap_to(medium);
        self.persist()
    }

    /// Clears the sync bookkeeping held by the session medium.
    pub fn clear_session_sync(&self) -> SyncResult<()> {
        Ok(self.persistence.clear_in(Medium::Session, SYNC_KEY)?)
    }

    fn commit(&self, task: Task) -> SyncResult<Task> {
        {
            let mut tasks = self.tasks.write();
            match tasks.iter_mut().find(|t| t.id == task.id) {
                Some(existing) => *existing = task.clone(),
                None => tasks.push(task.clone()),
            }
        }
        self.persist()?;
        Ok(task)
    }

    fn replace_all(&self, canonical: Vec<Task>) -> SyncResult<()> {
        *self.tasks.write() = canonical
            .into_iter()
            .map(|t| t.with_status(SyncStatus::Synced))
            .collect();
        self.persist()
    }

    fn persist(&self) -> SyncResult<()> {
        let snapshot = self.all_tasks();
        self.persistence.write_json(TASKS_KEY, &snapshot)?;
        let last = self.metadata()?.last_synced_at;
        self.write_metadata(last)
    }

    fn write_metadata(&self, last_synced_at: Option<u64>) -> SyncResult<()> {
        let metadata = SyncMetadata {
            user_id: self.credentials.user_id(),
            last_synced_at,
            pending: self.pending_count(),
        };
        Ok(self.persistence.write_json(SYNC_KEY, &metadata)?)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SideEffectBus;
    use crate::mode::{ModeController, ReconnectSchedule};
    use crate::notify::TracingNotifier;
    use crate::transport::{MockFailure, MockTransport, TransportCall};
    use tasksync_storage::InMemoryBackend;

    struct Fixture {
        store: Arc<TaskStore>,
        mock: Arc<MockTransport>,
        state: Arc<ConnectivityState>,
        controller: ModeController,
    }

    impl Fixture {
        async fn go_online(&self) {
            self.controller.go_online().await.unwrap();
            assert!(self.store.is_online());
        }
    }

    fn fixture(server: Vec<Task>) -> Fixture {
        let mock = Arc::new(MockTransport::with_tasks(server));
        let state = Arc::new(ConnectivityState::new(Arc::new(SideEffectBus::new())));
        let credentials = Arc::new(SessionCredentials::new());
        credentials.set_session("u1", "tok");
        let persistence = Arc::new(PersistentStore::new(
            InMemoryBackend::new(),
            InMemoryBackend::new(),
        ));
        let store = Arc::new(
            TaskStore::open(
                persistence,
                mock.clone(),
                Reconciler::new(mock.clone()),
                credentials.clone(),
                Arc::clone(&state),
            )
            .unwrap(),
        );
        let controller = ModeController::new(
            Arc::clone(&state),
            Arc::clone(&store),
            mock.clone(),
            credentials,
            Arc::new(TracingNotifier),
            ReconnectSchedule::default(),
        );
        Fixture {
            store,
            mock,
            state,
            controller,
        }
    }

    #[tokio::test]
    async fn offline_mutations_are_staged() {
        let f = fixture(vec![]);
        let task = f.store.add("write docs", 2).await.unwrap();
        assert_eq!(task.sync_status, SyncStatus::Unsynced);
        f.store.set_done(&task.id, true).await.unwrap();
        f.store.remove(&task.id).await.unwrap();

        assert!(f.mock.calls().is_empty());
        assert!(f.store.tasks().is_empty());
        let all = f.store.all_tasks();
        assert_eq!(all.len(), 1);
        assert!(all[0].deleted && all[0].done);
        assert_eq!(f.store.pending_count(), 1);
    }

    #[tokio::test]
    async fn online_mutations_go_to_server() {
        let f = fixture(vec![]);
        f.go_online().await;

        let task = f.store.add("a", 1).await.unwrap();
        assert_eq!(task.sync_status, SyncStatus::Synced);
        f.store.set_done(&task.id, true).await.unwrap();
        assert!(f.mock.tasks()[0].done);

        f.store.remove(&task.id).await.unwrap();
        assert!(f.store.all_tasks().is_empty());
        assert!(f.mock.tasks().is_empty());
    }

    #[tokio::test]
    async fn online_network_failure_stages_locally() {
        let f = fixture(vec![]);
        f.go_online().await;
        f.mock.set_reachable(false);

        let task = f.store.add("a", 1).await.unwrap();
        assert_eq!(task.sync_status, SyncStatus::Unsynced);
        assert_eq!(f.store.pending_count(), 1);
    }

    #[tokio::test]
    async fn online_validation_error_is_surfaced() {
        let f = fixture(vec![]);
        f.go_online().await;
        let task = f.store.add("a", 1).await.unwrap();
        f.mock
            .fail_on(TransportCall::Update(task.id.clone()), MockFailure::Status(422));

        let err = f.store.update(task.clone()).await.unwrap_err();
        assert_eq!(err.status(), Some(422));
        assert_eq!(f.state.connection_errors(), 0);
        assert_eq!(f.store.get(&task.id).unwrap().sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn reconcile_replaces_local_state() {
        let server_task = Task::new("u1", "server", 1).with_id("s1");
        let f = fixture(vec![server_task]);
        f.store.add("local", 3).await.unwrap();

        let count = f.store.reconcile().await.unwrap();
        assert_eq!(count, 2);
        assert!(f
            .store
            .all_tasks()
            .iter()
            .all(|t| t.sync_status == SyncStatus::Synced));
        let meta = f.store.metadata().unwrap();
        assert!(meta.last_synced_at.is_some());
        assert_eq!(meta.pending, 0);
        assert_eq!(meta.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn reconcile_failure_marks_task_error() {
        let f = fixture(vec![]);
        let task = f.store.add("local", 3).await.unwrap();
        f.mock
            .fail_on(TransportCall::Create(task.id.clone()), MockFailure::Status(422));

        let err = f.store.reconcile().await.unwrap_err();
        assert!(matches!(err, SyncError::Reconciliation { .. }));
        assert_eq!(f.store.get(&task.id).unwrap().sync_status, SyncStatus::Error);

        f.mock.clear_failures();
        f.store.reconcile().await.unwrap();
        assert_eq!(f.store.get(&task.id).unwrap().sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn refresh_keeps_pending_changes() {
        let f = fixture(vec![
            Task::new("u1", "one", 1).with_id("1"),
            Task::new("u1", "two", 1).with_id("2"),
        ]);
        f.store.refresh().await.unwrap();
        f.store.set_done("1", true).await.unwrap();
        let local_only = f.store.add("three", 1).await.unwrap();

        let visible = f.store.refresh().await.unwrap();
        assert_eq!(visible.len(), 3);
        assert!(f.store.get("1").unwrap().done);
        assert!(f.store.get(&local_only.id).is_some());
    }

    #[tokio::test]
    async fn unknown_task_is_reported() {
        let f = fixture(vec![]);
        assert!(matches!(
            f.store.set_done("nope", true).await,
            Err(SyncError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn switch_medium_carries_list() {
        let f = fixture(vec![]);
        f.store.add("a", 1).await.unwrap();
        f.store.switch_medium(Medium::Session).unwrap();
        let on_session: Vec<Task> = f.store.persistence().read_json(TASKS_KEY).unwrap().unwrap();
        assert_eq!(on_session.len(), 1);

        f.store.clear_session_sync().unwrap();
        assert!(f
            .store
            .persistence()
            .read_from(Medium::Session, SYNC_KEY)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn reopen_loads_durable_list() {
        let f = fixture(vec![]);
        f.store.add("a", 1).await.unwrap();
        let persistence = Arc::clone(f.store.persistence());
        let reopened = TaskStore::open(
            persistence,
            f.mock.clone(),
            Reconciler::new(f.mock.clone()),
            Arc::new(SessionCredentials::new()),
            f.state.clone(),
        )
        .unwrap();
        assert_eq!(reopened.tasks().len(), 1);
    }
}
