//! The store mode state machine.
//!
//! ```text
//!            go_online (authenticated)
//!   Offline ---------------------------> Online
//!      ^  <---------------------------    |  ^
//!      |        go_offline / logout       |  |
//!      |                  disconnect or   |  | reconnect ping
//!      |                  server error    v  | succeeded
//!      +-------------------------------- Error
//!                 go_offline / logout
//! ```
//!
//! `Offline -> Error` is rejected. Entering `Error` notifies the user once,
//! moves persistence to the durable medium and schedules a bounded reconnect
//! loop.

use crate::bus::{EffectKey, Property};
use crate::credentials::SessionCredentials;
use crate::error::{SyncError, SyncResult};
use crate::notify::{Notification, Notifier};
use crate::state::{
    ConnectionState, ConnectivityState, ServerConnectionState, StoreMode, Transition,
};
use crate::store::TaskStore;
use crate::transport::TaskTransport;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tasksync_protocol::LoginRequest;
use tasksync_storage::Medium;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CONNECTION_HANDLER: &str = "mode-controller:connection";
const SERVER_HANDLER: &str = "mode-controller:server";
const MODE_HANDLER: &str = "mode-controller:mode";

/// Wait and budget of the reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectSchedule {
    /// Wait before each ping.
    pub interval: Duration,
    /// Pings before giving up.
    pub attempts: u32,
}

impl Default for ReconnectSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            attempts: 20,
        }
    }
}

/// Owns the store mode and every transition between modes.
pub struct ModeController {
    inner: Arc<ModeInner>,
}

struct ModeInner {
    state: Arc<ConnectivityState>,
    store: Arc<TaskStore>,
    transport: Arc<dyn TaskTransport>,
    credentials: Arc<SessionCredentials>,
    notifier: Arc<dyn Notifier>,
    schedule: ReconnectSchedule,
    runtime: Option<Handle>,
    // Serializes user-driven transitions, which await the network.
    transitions: tokio::sync::Mutex<()>,
    reconnect: Mutex<Option<ReconnectTask>>,
    lost_reason: Mutex<Option<String>>,
}

struct ReconnectTask {
    handle: JoinHandle<()>,
    wake: Arc<Notify>,
}

impl ModeController {
    /// Creates a controller in `Offline` mode and subscribes it to the
    /// connectivity signals on `state`'s bus.
    pub fn new(
        state: Arc<ConnectivityState>,
        store: Arc<TaskStore>,
        transport: Arc<dyn TaskTransport>,
        credentials: Arc<SessionCredentials>,
        notifier: Arc<dyn Notifier>,
        schedule: ReconnectSchedule,
    ) -> Self {
        let inner = Arc::new(ModeInner {
            state,
            store,
            transport,
            credentials,
            notifier,
            schedule,
            runtime: Handle::try_current().ok(),
            transitions: tokio::sync::Mutex::new(()),
            reconnect: Mutex::new(None),
            lost_reason: Mutex::new(None),
        });
        Self::subscribe(&inner);
        Self { inner }
    }

    fn subscribe(inner: &Arc<ModeInner>) {
        let bus = inner.state.bus();

        let weak = Arc::downgrade(inner);
        bus.register(
            EffectKey::after(Property::ConnectionState),
            CONNECTION_HANDLER,
            move |_, transition| {
                let Some(inner) = weak.upgrade() else { return };
                match *transition {
                    Transition::Connection {
                        to: ConnectionState::Disconnected,
                        ..
                    } if inner.mode() == StoreMode::Online => {
                        inner.lose_connection("network disconnected");
                    }
                    Transition::Connection {
                        to: ConnectionState::Connected,
                        ..
                    } if inner.mode() == StoreMode::Error => inner.network_back(),
                    _ => {}
                }
            },
        );

        let weak = Arc::downgrade(inner);
        bus.register(
            EffectKey::after(Property::ServerConnectionState),
            SERVER_HANDLER,
            move |_, transition| {
                let Some(inner) = weak.upgrade() else { return };
                if let Transition::Server {
                    to: ServerConnectionState::Error,
                    ..
                } = *transition
                {
                    if inner.mode() == StoreMode::Online {
                        inner.lose_connection("server unreachable");
                    }
                }
            },
        );

        let weak = Arc::downgrade(inner);
        bus.register(
            EffectKey::after(Property::StoreMode),
            MODE_HANDLER,
            move |_, transition| {
                let Some(inner) = weak.upgrade() else { return };
                if let Transition::StoreMode {
                    to: StoreMode::Error,
                    ..
                } = *transition
                {
                    inner.error_entered();
                }
            },
        );
    }

    /// Current mode.
    pub fn mode(&self) -> StoreMode {
        self.inner.mode()
    }

    /// Returns true while a reconnect loop is scheduled.
    pub fn is_reconnecting(&self) -> bool {
        self.inner
            .reconnect
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Aborts a scheduled reconnect loop. The mode is left as it is.
    pub fn shutdown(&self) {
        self.inner.abort_reconnect();
    }

    /// Logs in with `POST /auth/login` and fetches anti-forgery credentials.
    pub async fn login(&self, username: &str, password: &str) -> SyncResult<()> {
        let request = LoginRequest::new(username, password);
        let token = self.inner.transport.login(&request).await?;
        self.inner.start_session(token.user_id, token.token).await
    }

    /// Registers with `POST /auth/signin` and fetches anti-forgery
    /// credentials.
    pub async fn signin(&self, username: &str, password: &str) -> SyncResult<()> {
        let request = LoginRequest::new(username, password);
        let token = self.inner.transport.signin(&request).await?;
        self.inner.start_session(token.user_id, token.token).await
    }

    /// Reconciles staged changes and switches to `Online`.
    ///
    /// A failed reconciliation is reported as a warning and does not block
    /// the transition.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotAuthenticated`] without a server session.
    pub async fn go_online(&self) -> SyncResult<()> {
        let _serial = self.inner.transitions.lock().await;
        self.inner.abort_reconnect();
        self.inner.go_online().await
    }

    /// Leaves `Online` or `Error` for `Offline`.
    ///
    /// Ends the server session (running the logout hook if one was held),
    /// moves persistence to the durable medium and clears the session
    /// medium's sync metadata. The user id is kept so work can continue
    /// offline.
    pub async fn go_offline(&self) -> SyncResult<()> {
        let _serial = self.inner.transitions.lock().await;
        self.inner.abort_reconnect();
        self.inner.lost_reason.lock().take();
        if self.inner.credentials.is_authenticated() {
            self.inner.credentials.end_session();
        }
        self.inner.store.switch_medium(Medium::Durable)?;
        self.inner.store.clear_session_sync()?;
        self.inner.transition(StoreMode::Offline)?;
        Ok(())
    }

    /// Goes offline and forgets the user.
    pub async fn logout(&self) -> SyncResult<()> {
        self.go_offline().await?;
        self.inner.credentials.reset();
        info!("logged out");
        Ok(())
    }

    /// Moves `Online` to `Error`.
    ///
    /// Called by the connectivity handlers; exposed for callers that detect a
    /// lost connection themselves. Already being in `Error` is a no-op.
    /// The user is notified and the reconnect loop scheduled once per entry.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidStateTransition`] from `Offline`; the mode is left
    /// unchanged.
    pub fn enter_error(&self, reason: &str) -> SyncResult<()> {
        self.inner.enter_error(reason)
    }

    /// Runs `callback` every time a reconnect brings the store from `Error`
    /// back to `Online`. Registering the same `id` again replaces the
    /// callback.
    pub fn on_reconnect(&self, id: &str, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.state.bus().register(
            EffectKey::after(Property::StoreMode),
            format!("reconnect:{id}"),
            move |_, transition| {
                if let Transition::StoreMode {
                    from: StoreMode::Error,
                    to: StoreMode::Online,
                } = *transition
                {
                    callback();
                }
            },
        );
    }

    /// Removes a callback added with [`on_reconnect`](Self::on_reconnect).
    pub fn remove_on_reconnect(&self, id: &str) -> bool {
        self.inner
            .state
            .bus()
            .unregister(EffectKey::after(Property::StoreMode), &format!("reconnect:{id}"))
    }
}

impl ModeInner {
    fn mode(&self) -> StoreMode {
        self.state.mode()
    }

    /// Moves to `to`, returning the previous mode.
    fn transition(&self, to: StoreMode) -> SyncResult<StoreMode> {
        let from = self.mode();
        if !from.can_transition_to(to) {
            return Err(SyncError::InvalidStateTransition { from, to });
        }
        if from != to {
            info!(%from, %to, "store mode changed");
            self.state.set_mode(to);
        }
        Ok(from)
    }

    async fn start_session(&self, user_id: String, token: String) -> SyncResult<()> {
        info!(user_id = %user_id, "logged in");
        self.credentials.set_session(user_id, token);
        let csrf = self.transport.csrf_token().await?;
        self.credentials.set_csrf(csrf);
        Ok(())
    }

    async fn go_online(self: &Arc<Self>) -> SyncResult<()> {
        if !self.credentials.is_authenticated() {
            return Err(SyncError::NotAuthenticated);
        }
        if self.mode() == StoreMode::Online {
            return Ok(());
        }
        let answered = match self.store.reconcile().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "going online with unsynced changes");
                self.notifier.notify(Notification::SyncWarning {
                    message: e.to_string(),
                });
                e.status().is_some_and(|status| status < 500)
            }
        };
        if answered {
            self.state.reset_connection_errors();
            self.state.set_server(ServerConnectionState::Connected);
        }
        self.store.switch_medium(Medium::Session)?;
        self.transition(StoreMode::Online)?;

        // Signals that fired while not online are not replayed.
        if self.state.connection() == ConnectionState::Disconnected {
            self.enter_error("network disconnected")?;
        } else if self.state.server() == ServerConnectionState::Error {
            self.enter_error("server unreachable")?;
        }
        Ok(())
    }

    fn enter_error(&self, reason: &str) -> SyncResult<()> {
        let from = self.mode();
        if !from.can_transition_to(StoreMode::Error) {
            return Err(SyncError::InvalidStateTransition {
                from,
                to: StoreMode::Error,
            });
        }
        if from == StoreMode::Error {
            return Ok(());
        }
        self.lost_reason
            .lock()
            .get_or_insert_with(|| reason.to_string());
        info!(%from, to = %StoreMode::Error, reason, "store mode changed");
        self.state.set_mode(StoreMode::Error);
        Ok(())
    }

    fn lose_connection(&self, reason: &str) {
        if let Err(e) = self.enter_error(reason) {
            warn!(error = %e, reason, "could not enter error mode");
        }
    }

    /// Runs once per announced entry into `Error`.
    fn error_entered(self: &Arc<Self>) {
        let reason = self
            .lost_reason
            .lock()
            .take()
            .unwrap_or_else(|| "connection lost".to_string());
        if let Err(e) = self.store.switch_medium(Medium::Durable) {
            warn!(error = %e, "could not move tasks to durable storage");
        }
        self.notifier.notify(Notification::ConnectionLost { reason });
        self.schedule_reconnect();
    }

    fn network_back(self: &Arc<Self>) {
        {
            let reconnect = self.reconnect.lock();
            if let Some(task) = reconnect.as_ref().filter(|t| !t.handle.is_finished()) {
                debug!("network back, waking reconnect loop");
                task.wake.notify_one();
                return;
            }
        }
        debug!("network back, restarting reconnect loop");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            warn!("no runtime available, reconnect loop not scheduled");
            return;
        };
        let wake = Arc::new(Notify::new());
        let handle = runtime.spawn(reconnect_loop(
            Arc::downgrade(self),
            self.schedule,
            Arc::clone(&wake),
        ));
        if let Some(previous) = self.reconnect.lock().replace(ReconnectTask { handle, wake }) {
            previous.handle.abort();
        }
        debug!(
            interval_ms = self.schedule.interval.as_millis() as u64,
            attempts = self.schedule.attempts,
            "reconnect loop scheduled"
        );
    }

    /// Forgets the loop woken by `wake`, leaving a newer loop in place.
    fn detach_reconnect(&self, wake: &Arc<Notify>) {
        let mut reconnect = self.reconnect.lock();
        if reconnect
            .as_ref()
            .is_some_and(|task| Arc::ptr_eq(&task.wake, wake))
        {
            reconnect.take();
        }
    }

    fn abort_reconnect(&self) {
        if let Some(task) = self.reconnect.lock().take() {
            task.handle.abort();
        }
    }
}

impl Drop for ModeInner {
    fn drop(&mut self) {
        self.abort_reconnect();
    }
}

async fn reconnect_loop(weak: Weak<ModeInner>, schedule: ReconnectSchedule, wake: Arc<Notify>) {
    for attempt in 1..=schedule.attempts {
        let Some(inner) = weak.upgrade() else { return };
        tokio::select! {
            _ = tokio::time::sleep(schedule.interval) => {}
            _ = wake.notified() => {}
        }
        if inner.mode() != StoreMode::Error {
            return;
        }

        match inner.transport.ping().await {
            Ok(()) => {
                info!(attempt, "reconnect ping succeeded");
                inner.state.set_connection(ConnectionState::Connected);
                // Detach so the transition below does not abort this task.
                inner.detach_reconnect(&wake);
                inner.state.reset_connection_errors();
                inner.state.set_server(ServerConnectionState::Connected);
                inner.notifier.notify(Notification::Reconnected);

                let _serial = inner.transitions.lock().await;
                if inner.mode() != StoreMode::Error {
                    return;
                }
                if let Err(e) = inner.go_online().await {
                    warn!(error = %e, "reconnected but could not go online");
                }
                return;
            }
            Err(e) => debug!(
                attempt,
                remaining = schedule.attempts - attempt,
                error = %e,
                "reconnect ping failed"
            ),
        }
    }

    if let Some(inner) = weak.upgrade() {
        inner.detach_reconnect(&wake);
        inner.notifier.notify(Notification::ReconnectExhausted {
            attempts: schedule.attempts,
        });
    }
}
