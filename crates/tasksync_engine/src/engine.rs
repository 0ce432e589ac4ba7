//! The engine façade.

use crate::bus::SideEffectBus;
use crate::client::ResilientClient;
use crate::config::EngineConfig;
use crate::credentials::{LogoutHook, SessionCredentials};
use crate::error::SyncResult;
use crate::http::{HttpClient, ReqwestClient};
use crate::mode::{ModeController, ReconnectSchedule};
use crate::monitor::ConnectivityMonitor;
use crate::notify::{Notifier, TracingNotifier};
use crate::reconciler::Reconciler;
use crate::state::{ConnectivitySnapshot, ConnectivityState, StoreMode};
use crate::store::TaskStore;
use crate::transport::{HttpTaskTransport, TaskTransport};
use std::sync::Arc;
use tasksync_protocol::Task;
use tasksync_storage::{FileBackend, InMemoryBackend, KeyValueBackend, PersistentStore};
use tokio::sync::watch;
use tracing::info;

/// Assembles a [`SyncEngine`].
///
/// Everything not supplied is derived from the [`EngineConfig`]: a
/// `reqwest` client for the configured server, an in-memory session medium,
/// and a durable medium on disk when `data_dir` is set (in memory otherwise).
pub struct SyncEngineBuilder {
    config: EngineConfig,
    http: Option<Arc<dyn HttpClient>>,
    transport: Option<Arc<dyn TaskTransport>>,
    session: Option<Arc<dyn KeyValueBackend>>,
    durable: Option<Arc<dyn KeyValueBackend>>,
    notifier: Option<Arc<dyn Notifier>>,
    logout_hook: Option<LogoutHook>,
}

impl SyncEngineBuilder {
    /// Starts from `config`.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            http: None,
            transport: None,
            session: None,
            durable: None,
            notifier: None,
            logout_hook: None,
        }
    }

    /// Sends requests through `http` instead of `reqwest`.
    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Replaces the whole HTTP stack with `transport`.
    ///
    /// Retry and failure counting live in the HTTP stack, so they are
    /// bypassed.
    pub fn transport(mut self, transport: Arc<dyn TaskTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses `backend` as the session medium.
    pub fn session_backend(mut self, backend: impl KeyValueBackend + 'static) -> Self {
        self.session = Some(Arc::new(backend));
        self
    }

    /// Uses `backend` as the durable medium.
    pub fn durable_backend(mut self, backend: impl KeyValueBackend + 'static) -> Self {
        self.durable = Some(Arc::new(backend));
        self
    }

    /// Delivers notifications to `notifier`.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Runs `hook` whenever the server session ends.
    pub fn logout_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.logout_hook = Some(Arc::new(hook));
        self
    }

    /// Builds the engine. The engine starts `Offline`.
    pub fn build(self) -> SyncResult<SyncEngine> {
        let config = self.config;

        let state = Arc::new(ConnectivityState::new(Arc::new(SideEffectBus::new())));
        state.install_failure_counter(config.failure_threshold);

        let credentials = Arc::new(SessionCredentials::new());
        if let Some(hook) = self.logout_hook {
            credentials.set_logout_hook(move || hook());
        }
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier));

        let transport: Arc<dyn TaskTransport> = match self.transport {
            Some(transport) => transport,
            None => {
                let http: Arc<dyn HttpClient> = match self.http {
                    Some(http) => http,
                    None => Arc::new(ReqwestClient::new(
                        &config.server_url,
                        config.request_timeout,
                        &config.user_agent,
                    )?),
                };
                let client = ResilientClient::new(http, config.retry.clone(), credentials.clone())
                    .with_connectivity(Arc::clone(&state));
                Arc::new(HttpTaskTransport::new(Arc::new(client)))
            }
        };

        let session = self
            .session
            .unwrap_or_else(|| Arc::new(InMemoryBackend::new()));
        let durable: Arc<dyn KeyValueBackend> = match (self.durable, &config.data_dir) {
            (Some(backend), _) => backend,
            (None, Some(dir)) => Arc::new(FileBackend::open(dir)?),
            (None, None) => Arc::new(InMemoryBackend::new()),
        };
        let persistence = Arc::new(PersistentStore::from_arcs(session, durable));

        let reconciler = Reconciler::new(Arc::clone(&transport))
            .with_strategy(config.reconcile_strategy)
            .with_notifier(Arc::clone(&notifier));
        let store = Arc::new(TaskStore::open(
            persistence,
            Arc::clone(&transport),
            reconciler,
            Arc::clone(&credentials),
            Arc::clone(&state),
        )?);

        let monitor =
            ConnectivityMonitor::new(Arc::clone(&state), Arc::clone(&transport), config.ping_interval);
        let mode = ModeController::new(
            Arc::clone(&state),
            Arc::clone(&store),
            transport,
            Arc::clone(&credentials),
            notifier,
            ReconnectSchedule {
                interval: config.reconnect_interval,
                attempts: config.reconnect_attempts,
            },
        );

        info!(server = %config.server_url, "sync engine ready");
        Ok(SyncEngine {
            config,
            state,
            credentials,
            store,
            monitor,
            mode,
        })
    }
}

/// An offline-first task list synchronized with a remote record store.
pub struct SyncEngine {
    config: EngineConfig,
    state: Arc<ConnectivityState>,
    credentials: Arc<SessionCredentials>,
    store: Arc<TaskStore>,
    monitor: ConnectivityMonitor,
    mode: ModeController,
}

impl SyncEngine {
    /// Returns a builder starting from `config`.
    pub fn builder(config: EngineConfig) -> SyncEngineBuilder {
        SyncEngineBuilder::new(config)
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current store mode.
    pub fn mode(&self) -> StoreMode {
        self.mode.mode()
    }

    /// Current connectivity values.
    pub fn connectivity(&self) -> ConnectivitySnapshot {
        self.state.snapshot()
    }

    /// The connectivity state container.
    pub fn state(&self) -> &Arc<ConnectivityState> {
        &self.state
    }

    /// The side-effect bus connectivity changes are announced on.
    pub fn bus(&self) -> &Arc<SideEffectBus> {
        self.state.bus()
    }

    /// The current user's credentials.
    pub fn credentials(&self) -> &Arc<SessionCredentials> {
        &self.credentials
    }

    /// The task store.
    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// The mode controller.
    pub fn mode_controller(&self) -> &ModeController {
        &self.mode
    }

    /// Starts the periodic liveness ping.
    pub fn start(&self) -> SyncResult<()> {
        self.monitor.start()
    }

    /// Stops the ping and any reconnect loop.
    pub fn shutdown(&self) {
        self.monitor.shutdown();
        self.mode.shutdown();
        info!("sync engine stopped");
    }

    /// Logs in.
    pub async fn login(&self, username: &str, password: &str) -> SyncResult<()> {
        self.mode.login(username, password).await
    }

    /// Registers and logs in.
    pub async fn signin(&self, username: &str, password: &str) -> SyncResult<()> {
        self.mode.signin(username, password).await
    }

    /// Works offline as `user_id` without a server session.
    pub fn use_offline_user(&self, user_id: impl Into<String>) {
        self.credentials.set_user(user_id);
    }

    /// Goes offline and forgets the user.
    pub async fn logout(&self) -> SyncResult<()> {
        self.mode.logout().await
    }

    /// See [`ModeController::go_online`].
    pub async fn go_online(&self) -> SyncResult<()> {
        self.mode.go_online().await
    }

    /// See [`ModeController::go_offline`].
    pub async fn go_offline(&self) -> SyncResult<()> {
        self.mode.go_offline().await
    }

    /// Records a platform reachability notification.
    pub fn network_changed(&self, reachable: bool) {
        self.monitor.network_changed(reachable);
    }

    /// Follows reachability notifications published on `rx`.
    pub fn watch_network(&self, rx: watch::Receiver<bool>) -> SyncResult<()> {
        self.monitor.watch_network(rx)
    }

    /// Pings the server once.
    pub async fn ping(&self) -> bool {
        self.monitor.ping_once().await
    }

    /// Runs `callback` after every automatic reconnect.
    pub fn on_reconnect(&self, id: &str, callback: impl Fn() + Send + Sync + 'static) {
        self.mode.on_reconnect(id, callback);
    }

    /// Visible tasks.
    pub fn tasks(&self) -> Vec<Task> {
        self.store.tasks()
    }

    /// Tasks waiting to be pushed.
    pub fn pending_count(&self) -> usize {
        self.store.pending_count()
    }

    /// Creates a task.
    pub async fn add_task(&self, display_name: &str, priority: u8) -> SyncResult<Task> {
        self.store.add(display_name, priority).await
    }

    /// Replaces a task.
    pub async fn update_task(&self, task: Task) -> SyncResult<Task> {
        self.store.update(task).await
    }

    /// Marks a task done or not done.
    pub async fn set_done(&self, id: &str, done: bool) -> SyncResult<Task> {
        self.store.set_done(id, done).await
    }

    /// Deletes a task.
    pub async fn remove_task(&self, id: &str) -> SyncResult<()> {
        self.store.remove(id).await
    }

    /// Pushes staged changes now. Returns the number of tasks afterwards.
    pub async fn reconcile(&self) -> SyncResult<usize> {
        self.store.reconcile().await
    }

    /// Fetches the server list, keeping staged changes.
    pub async fn refresh(&self) -> SyncResult<Vec<Task>> {
        self.store.refresh().await
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.monitor.shutdown();
        self.mode.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Notification, RecordingNotifier};
    use crate::state::ConnectionState;
    use crate::transport::MockTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tasksync_protocol::SyncStatus;

    fn engine(mock: Arc<MockTransport>) -> (SyncEngine, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let config = EngineConfig::default().with_reconnect(Duration::from_secs(60), 3);
        let engine = SyncEngine::builder(config)
            .transport(mock)
            .notifier(notifier.clone())
            .build()
            .unwrap();
        (engine, notifier)
    }

    #[tokio::test]
    async fn offline_first_then_online() {
        let mock = Arc::new(MockTransport::new());
        let (engine, _) = engine(mock.clone());
        assert_eq!(engine.mode(), StoreMode::Offline);

        engine.use_offline_user("u1");
        let task = engine.add_task("buy milk", 2).await.unwrap();
        engine.set_done(&task.id, true).await.unwrap();
        assert!(mock.calls().is_empty());
        assert_eq!(engine.pending_count(), 1);

        engine.login("u1", "pw").await.unwrap();
        engine.go_online().await.unwrap();
        assert_eq!(engine.mode(), StoreMode::Online);
        assert_eq!(engine.pending_count(), 0);
        assert!(mock.tasks()[0].done);
        assert!(engine
            .tasks()
            .iter()
            .all(|t| t.sync_status == SyncStatus::Synced));
    }

    #[tokio::test]
    async fn network_loss_notifies_once() {
        let mock = Arc::new(MockTransport::new());
        let (engine, notifier) = engine(mock);
        engine.login("u1", "pw").await.unwrap();
        engine.go_online().await.unwrap();

        engine.network_changed(false);
        engine.network_changed(false);

        assert_eq!(engine.mode(), StoreMode::Error);
        assert_eq!(
            engine.connectivity().connection,
            ConnectionState::Disconnected
        );
        assert_eq!(
            notifier.count(|n| matches!(n, Notification::ConnectionLost { .. })),
            1
        );
        engine.shutdown();
    }

    #[tokio::test]
    async fn logout_hook_runs_on_go_offline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let engine = SyncEngine::builder(EngineConfig::default())
            .transport(Arc::new(MockTransport::new()))
            .logout_hook(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        engine.login("u1", "pw").await.unwrap();
        engine.go_online().await.unwrap();
        engine.go_offline().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.mode(), StoreMode::Offline);
    }

    #[tokio::test]
    async fn durable_tasks_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockTransport::new());
        let config = EngineConfig::default().with_data_dir(dir.path());
        {
            let engine = SyncEngine::builder(config.clone())
                .transport(mock.clone())
                .build()
                .unwrap();
            engine.use_offline_user("u1");
            engine.add_task("persisted", 1).await.unwrap();
        }

        let engine = SyncEngine::builder(config)
            .transport(mock)
            .build()
            .unwrap();
        let tasks = engine.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].display_name, "persisted");
        assert_eq!(tasks[0].sync_status, SyncStatus::Unsynced);
    }
}
