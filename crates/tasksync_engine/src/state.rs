//! Connectivity state container.
//!
//! Holds the store mode, the network and server connection states and the
//! connection failure counter. Every mutation is announced on the
//! [`SideEffectBus`] as a `BeforeChange` / `AfterChange` pair.
//!
//! Mutations requested while a pair is being dispatched (for example by a
//! handler reacting to a change) are queued and applied once the current pair
//! has completed, so pairs never interleave.

use crate::bus::{EffectKey, Property, SideEffectBus};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Handler id of the built-in failure counter.
pub const FAILURE_COUNTER_HANDLER: &str = "connection-failure-counter";

/// The mode of the task store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreMode {
    /// Mutations go to the server.
    Online,
    /// Mutations are staged locally.
    Offline,
    /// Connection lost while online; staging locally and trying to reconnect.
    Error,
}

impl StoreMode {
    /// Returns true if the mode machine permits moving from `self` to `to`.
    ///
    /// `Offline -> Error` is the only forbidden edge; staying put is allowed.
    pub fn can_transition_to(&self, to: StoreMode) -> bool {
        !matches!((self, to), (StoreMode::Offline, StoreMode::Error))
    }

    /// Returns the lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreMode::Online => "online",
            StoreMode::Offline => "offline",
            StoreMode::Error => "error",
        }
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network-level reachability as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The network is reachable.
    Connected,
    /// The network is unreachable.
    Disconnected,
}

/// Reachability of the record store itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerConnectionState {
    /// The last probe succeeded.
    Connected,
    /// Too many consecutive failures.
    Error,
}

/// A typed state change, passed to side-effect handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Store mode change.
    StoreMode {
        /// Previous value.
        from: StoreMode,
        /// New value.
        to: StoreMode,
    },
    /// Network reachability change.
    Connection {
        /// Previous value.
        from: ConnectionState,
        /// New value.
        to: ConnectionState,
    },
    /// Server reachability change.
    Server {
        /// Previous value.
        from: ServerConnectionState,
        /// New value.
        to: ServerConnectionState,
    },
    /// Failure counter change.
    ConnectionErrors {
        /// Previous count.
        from: u32,
        /// New count.
        to: u32,
    },
}

impl Transition {
    /// The property this transition mutates.
    pub fn property(&self) -> Property {
        match self {
            Transition::StoreMode { .. } => Property::StoreMode,
            Transition::Connection { .. } => Property::ConnectionState,
            Transition::Server { .. } => Property::ServerConnectionState,
            Transition::ConnectionErrors { .. } => Property::ConnectionErrors,
        }
    }
}

/// A point-in-time copy of the connectivity values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivitySnapshot {
    /// Store mode.
    pub mode: StoreMode,
    /// Network reachability.
    pub connection: ConnectionState,
    /// Server reachability.
    pub server: ServerConnectionState,
    /// Consecutive connection failures.
    pub connection_errors: u32,
}

impl Default for ConnectivitySnapshot {
    fn default() -> Self {
        Self {
            mode: StoreMode::Offline,
            connection: ConnectionState::Connected,
            server: ServerConnectionState::Connected,
            connection_errors: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Mutation {
    Mode(StoreMode),
    Connection(ConnectionState),
    Server(ServerConnectionState),
    ServerFailed,
    IncrementErrors,
    ResetErrors,
}

/// The connectivity state container.
pub struct ConnectivityState {
    values: Mutex<ConnectivitySnapshot>,
    bus: Arc<SideEffectBus>,
    pending: Mutex<VecDeque<Mutation>>,
    // Held for the whole drain. Reentrant so handlers on the draining thread
    // can enqueue; the flag tells them a drain is already running.
    drain: ReentrantMutex<Cell<bool>>,
}

impl ConnectivityState {
    /// Creates a container in its initial state (offline, connected, no
    /// failures) announcing on `bus`.
    pub fn new(bus: Arc<SideEffectBus>) -> Self {
        Self {
            values: Mutex::new(ConnectivitySnapshot::default()),
            bus,
            pending: Mutex::new(VecDeque::new()),
            drain: ReentrantMutex::new(Cell::new(false)),
        }
    }

    /// Registers the failure counter: once the count exceeds `threshold` it
    /// is reset to zero and the server is marked in error.
    pub fn install_failure_counter(&self, threshold: u32) {
        self.bus.register(
            EffectKey::after(Property::ConnectionErrors),
            FAILURE_COUNTER_HANDLER,
            move |state, transition| {
                if let Transition::ConnectionErrors { to, .. } = *transition {
                    if to > threshold {
                        tracing::warn!(failures = to, threshold, "server marked unreachable");
                        state.reset_connection_errors();
                        state.mark_server_unreachable();
                    }
                }
            },
        );
    }

    /// The bus this container announces on.
    pub fn bus(&self) -> &Arc<SideEffectBus> {
        &self.bus
    }

    /// Returns a copy of all values.
    pub fn snapshot(&self) -> ConnectivitySnapshot {
        *self.values.lock()
    }

    /// Current store mode.
    pub fn mode(&self) -> StoreMode {
        self.values.lock().mode
    }

    /// Current network reachability.
    pub fn connection(&self) -> ConnectionState {
        self.values.lock().connection
    }

    /// Current server reachability.
    pub fn server(&self) -> ServerConnectionState {
        self.values.lock().server
    }

    /// Current failure count.
    pub fn connection_errors(&self) -> u32 {
        self.values.lock().connection_errors
    }

    /// Sets the store mode. Edges the mode machine forbids are logged and
    /// ignored.
    pub(crate) fn set_mode(&self, mode: StoreMode) {
        self.apply(Mutation::Mode(mode));
    }

    /// Sets the network reachability.
    pub fn set_connection(&self, connection: ConnectionState) {
        self.apply(Mutation::Connection(connection));
    }

    /// Sets the server reachability.
    pub fn set_server(&self, server: ServerConnectionState) {
        self.apply(Mutation::Server(server));
    }

    /// Marks the server in error. Announced on every call, also when the
    /// server is already in error.
    pub fn mark_server_unreachable(&self) {
        self.apply(Mutation::ServerFailed);
    }

    /// Adds one to the failure counter.
    pub fn increment_connection_errors(&self) {
        self.apply(Mutation::IncrementErrors);
    }

    /// Resets the failure counter to zero.
    pub fn reset_connection_errors(&self) {
        self.apply(Mutation::ResetErrors);
    }

    fn apply(&self, mutation: Mutation) {
        let draining = self.drain.lock();
        self.pending.lock().push_back(mutation);
        if draining.get() {
            return;
        }
        draining.set(true);
        loop {
            let next = self.pending.lock().pop_front();
            match next {
                Some(mutation) => self.apply_one(mutation),
                None => break,
            }
        }
        draining.set(false);
    }

    fn apply_one(&self, mutation: Mutation) {
        let current = self.snapshot();
        let transition = match mutation {
            Mutation::Mode(to) if to != current.mode => {
                if !current.mode.can_transition_to(to) {
                    tracing::warn!(from = %current.mode, %to, "store mode transition rejected");
                    return;
                }
                Transition::StoreMode {
                    from: current.mode,
                    to,
                }
            }
            Mutation::Connection(to) if to != current.connection => Transition::Connection {
                from: current.connection,
                to,
            },
            Mutation::Server(to) if to != current.server => Transition::Server {
                from: current.server,
                to,
            },
            Mutation::ServerFailed => Transition::Server {
                from: current.server,
                to: ServerConnectionState::Error,
            },
            Mutation::IncrementErrors => Transition::ConnectionErrors {
                from: current.connection_errors,
                to: current.connection_errors.saturating_add(1),
            },
            Mutation::ResetErrors if current.connection_errors != 0 => {
                Transition::ConnectionErrors {
                    from: current.connection_errors,
                    to: 0,
                }
            }
            _ => return,
        };

        let property = transition.property();
        self.bus
            .dispatch(EffectKey::before(property), self, &transition);
        {
            let mut values = self.values.lock();
            match transition {
                Transition::StoreMode { to, .. } => values.mode = to,
                Transition::Connection { to, .. } => values.connection = to,
                Transition::Server { to, .. } => values.server = to,
                Transition::ConnectionErrors { to, .. } => values.connection_errors = to,
            }
        }
        tracing::trace!(?transition, "connectivity state changed");
        self.bus.dispatch(EffectKey::after(property), self, &transition);
    }
}

impl fmt::Debug for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityState")
            .field("values", &self.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<ConnectivityState> {
        Arc::new(ConnectivityState::new(Arc::new(SideEffectBus::new())))
    }

    fn record(state: &ConnectivityState, property: Property, log: &Arc<Mutex<Vec<String>>>) {
        for (key, label) in [
            (EffectKey::before(property), "before"),
            (EffectKey::after(property), "after"),
        ] {
            let log = Arc::clone(log);
            state.bus().register(key, format!("log-{label}"), move |s, t| {
                log.lock().push(format!("{label} {t:?} mode={}", s.mode()));
            });
        }
    }

    #[test]
    fn mode_transitions() {
        assert!(StoreMode::Offline.can_transition_to(StoreMode::Online));
        assert!(!StoreMode::Offline.can_transition_to(StoreMode::Error));
        assert!(StoreMode::Online.can_transition_to(StoreMode::Error));
        assert!(StoreMode::Online.can_transition_to(StoreMode::Offline));
        assert!(StoreMode::Error.can_transition_to(StoreMode::Online));
        assert!(StoreMode::Error.can_transition_to(StoreMode::Offline));
    }

    #[test]
    fn initial_state() {
        let snapshot = state().snapshot();
        assert_eq!(snapshot, ConnectivitySnapshot::default());
        assert_eq!(snapshot.mode, StoreMode::Offline);
    }

    #[test]
    fn before_sees_old_value_after_sees_new() {
        let state = state();
        let log = Arc::new(Mutex::new(Vec::new()));
        record(&state, Property::StoreMode, &log);

        state.set_mode(StoreMode::Online);

        let log = log.lock();
        assert_eq!(log.len(), 2);
        assert!(log[0].starts_with("before") && log[0].ends_with("mode=offline"));
        assert!(log[1].starts_with("after") && log[1].ends_with("mode=online"));
    }

    #[test]
    fn unchanged_value_is_not_announced() {
        let state = state();
        let log = Arc::new(Mutex::new(Vec::new()));
        record(&state, Property::StoreMode, &log);
        state.set_mode(StoreMode::Offline);
        state.reset_connection_errors();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn nested_mutations_run_after_current_pair() {
        let state = state();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = Arc::clone(&log);
        state.bus().register(
            EffectKey::before(Property::ConnectionState),
            "nest",
            move |s, _| {
                l.lock().push("conn before".to_string());
                s.set_server(ServerConnectionState::Error);
            },
        );
        let l = Arc::clone(&log);
        state.bus().register(
            EffectKey::after(Property::ConnectionState),
            "a",
            move |_, _| l.lock().push("conn after".to_string()),
        );
        let l = Arc::clone(&log);
        state.bus().register(
            EffectKey::before(Property::ServerConnectionState),
            "b",
            move |_, _| l.lock().push("server before".to_string()),
        );

        state.set_connection(ConnectionState::Disconnected);

        assert_eq!(
            *log.lock(),
            vec!["conn before", "conn after", "server before"]
        );
        assert_eq!(state.server(), ServerConnectionState::Error);
    }

    #[test]
    fn failure_counter_trips_above_threshold() {
        let state = state();
        state.install_failure_counter(2);

        state.increment_connection_errors();
        state.increment_connection_errors();
        assert_eq!(state.connection_errors(), 2);
        assert_eq!(state.server(), ServerConnectionState::Connected);

        state.increment_connection_errors();
        assert_eq!(state.connection_errors(), 0);
        assert_eq!(state.server(), ServerConnectionState::Error);
    }

    #[test]
    fn forbidden_mode_edge_is_ignored() {
        let state = state();
        let log = Arc::new(Mutex::new(Vec::new()));
        record(&state, Property::StoreMode, &log);

        state.set_mode(StoreMode::Error);

        assert_eq!(state.mode(), StoreMode::Offline);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn repeated_trip_is_announced() {
        let state = state();
        state.install_failure_counter(1);
        let trips = Arc::new(Mutex::new(Vec::new()));
        let t = Arc::clone(&trips);
        state.bus().register(
            EffectKey::after(Property::ServerConnectionState),
            "trips",
            move |_, transition| t.lock().push(*transition),
        );

        for _ in 0..4 {
            state.increment_connection_errors();
        }

        let error = ServerConnectionState::Error;
        assert_eq!(
            *trips.lock(),
            vec![
                Transition::Server {
                    from: ServerConnectionState::Connected,
                    to: error
                },
                Transition::Server { from: error, to: error },
            ]
        );
        assert_eq!(state.connection_errors(), 0);
    }

    #[test]
    fn concurrent_mutations_are_serialized() {
        let state = state();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        state.increment_connection_errors();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(state.connection_errors(), 800);
    }
}
