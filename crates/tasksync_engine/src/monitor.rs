//! Connectivity signals.
//!
//! The monitor turns platform reachability notifications and periodic pings
//! into [`ConnectivityState`] mutations. It never changes the store mode
//! itself; the mode controller reacts to what it reports.

use crate::error::{SyncError, SyncResult};
use crate::state::{ConnectionState, ConnectivityState, ServerConnectionState};
use crate::transport::TaskTransport;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Reports network and server reachability.
pub struct ConnectivityMonitor {
    state: Arc<ConnectivityState>,
    transport: Arc<dyn TaskTransport>,
    ping_interval: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor pinging through `transport` every `ping_interval`
    /// once started.
    pub fn new(
        state: Arc<ConnectivityState>,
        transport: Arc<dyn TaskTransport>,
        ping_interval: Duration,
    ) -> Self {
        Self {
            state,
            transport,
            ping_interval,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Records a platform reachability notification.
    pub fn network_changed(&self, reachable: bool) {
        record_network(&self.state, reachable);
    }

    /// Forwards every value published on `rx` as a reachability notification
    /// until the sender is dropped or the monitor shuts down.
    pub fn watch_network(&self, mut rx: watch::Receiver<bool>) -> SyncResult<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let state = Arc::clone(&self.state);
        let task = handle.spawn(async move {
            record_network(&state, *rx.borrow_and_update());
            while rx.changed().await.is_ok() {
                let reachable = *rx.borrow_and_update();
                record_network(&state, reachable);
            }
            debug!("network watch closed");
        });
        self.tasks.lock().push(task);
        Ok(())
    }

    /// Pings the server once and records the outcome. Returns whether the
    /// server answered.
    pub async fn ping_once(&self) -> bool {
        ping(&self.state, self.transport.as_ref()).await
    }

    /// Starts the periodic ping.
    pub fn start(&self) -> SyncResult<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let state = Arc::clone(&self.state);
        let transport = Arc::clone(&self.transport);
        let period = self.ping_interval;
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                ping(&state, transport.as_ref()).await;
            }
        });
        debug!(interval_ms = period.as_millis() as u64, "connectivity monitor started");
        self.tasks.lock().push(task);
        Ok(())
    }

    /// Returns true while any background task is alive.
    pub fn is_running(&self) -> bool {
        self.tasks.lock().iter().any(|t| !t.is_finished())
    }

    /// Aborts the periodic ping and any network watch.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn record_network(state: &ConnectivityState, reachable: bool) {
    let connection = if reachable {
        ConnectionState::Connected
    } else {
        ConnectionState::Disconnected
    };
    trace!(?connection, "network notification");
    state.set_connection(connection);
}

async fn ping(state: &ConnectivityState, transport: &dyn TaskTransport) -> bool {
    match transport.ping().await {
        Ok(()) => {
            state.reset_connection_errors();
            state.set_server(ServerConnectionState::Connected);
            true
        }
        Err(e) => {
            debug!(error = %e, "ping failed");
            state.increment_connection_errors();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SideEffectBus;
    use crate::state::StoreMode;
    use crate::transport::MockTransport;

    fn setup() -> (Arc<ConnectivityState>, Arc<MockTransport>, ConnectivityMonitor) {
        let state = Arc::new(ConnectivityState::new(Arc::new(SideEffectBus::new())));
        let mock = Arc::new(MockTransport::new());
        let monitor =
            ConnectivityMonitor::new(Arc::clone(&state), mock.clone(), Duration::from_millis(10));
        (state, mock, monitor)
    }

    #[test]
    fn network_changes_are_recorded_immediately() {
        let (state, _, monitor) = setup();
        monitor.network_changed(false);
        assert_eq!(state.connection(), ConnectionState::Disconnected);
        monitor.network_changed(true);
        assert_eq!(state.connection(), ConnectionState::Connected);
        assert_eq!(state.mode(), StoreMode::Offline);
    }

    #[tokio::test]
    async fn ping_failures_count_until_threshold() {
        let (state, mock, monitor) = setup();
        state.install_failure_counter(2);
        mock.set_reachable(false);

        assert!(!monitor.ping_once().await);
        assert!(!monitor.ping_once().await);
        assert_eq!(state.connection_errors(), 2);
        assert!(!monitor.ping_once().await);
        assert_eq!(state.server(), ServerConnectionState::Error);

        mock.set_reachable(true);
        assert!(monitor.ping_once().await);
        assert_eq!(state.server(), ServerConnectionState::Connected);
        assert_eq!(state.connection_errors(), 0);
    }

    #[tokio::test]
    async fn periodic_ping_runs_until_shutdown() {
        let (_, mock, monitor) = setup();
        monitor.start().unwrap();
        assert!(monitor.is_running());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(mock.ping_count() >= 2);

        monitor.shutdown();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let after = mock.ping_count();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(mock.ping_count(), after);
        assert!(mock.task_calls().is_empty());
    }

    #[tokio::test]
    async fn watch_forwards_notifications() {
        let (state, _, monitor) = setup();
        let (tx, rx) = watch::channel(true);
        monitor.watch_network(rx).unwrap();

        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(state.connection(), ConnectionState::Disconnected);

        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(state.connection(), ConnectionState::Connected);
    }

    #[test]
    fn start_outside_runtime_fails() {
        let (_, _, monitor) = setup();
        assert!(matches!(monitor.start(), Err(SyncError::NoRuntime)));
    }
}
