//! Side-effect propagation between state containers.
//!
//! Containers announce every mutation of an observable property as a
//! `BeforeChange` / `AfterChange` pair. Other components register handlers for
//! the pairs they care about instead of holding references to each other.

use crate::state::{ConnectivityState, Transition};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An observable property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    /// [`crate::StoreMode`].
    StoreMode,
    /// [`crate::ConnectionState`].
    ConnectionState,
    /// [`crate::ServerConnectionState`].
    ServerConnectionState,
    /// The consecutive connection failure counter.
    ConnectionErrors,
}

/// When a handler runs relative to the mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before the new value is written.
    BeforeChange,
    /// After the new value is written.
    AfterChange,
}

/// Identifies a class of side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectKey {
    /// Property being mutated.
    pub property: Property,
    /// Phase of the mutation.
    pub phase: Phase,
}

impl EffectKey {
    /// Key for handlers that run before `property` changes.
    pub const fn before(property: Property) -> Self {
        Self {
            property,
            phase: Phase::BeforeChange,
        }
    }

    /// Key for handlers that run after `property` changed.
    pub const fn after(property: Property) -> Self {
        Self {
            property,
            phase: Phase::AfterChange,
        }
    }
}

/// A side-effect handler.
pub type EffectHandler = Arc<dyn Fn(&ConnectivityState, &Transition) + Send + Sync>;

/// Registry and dispatcher of side-effect handlers.
///
/// Handlers for one key run in registration order. Registering an id that is
/// already present under the same key replaces its handler in place.
#[derive(Default)]
pub struct SideEffectBus {
    handlers: RwLock<HashMap<EffectKey, Vec<(String, EffectHandler)>>>,
}

impl SideEffectBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `key` as `handler_id`.
    ///
    /// Returns true if an existing registration was replaced.
    pub fn register(
        &self,
        key: EffectKey,
        handler_id: impl Into<String>,
        handler: impl Fn(&ConnectivityState, &Transition) + Send + Sync + 'static,
    ) -> bool {
        let handler_id = handler_id.into();
        let handler: EffectHandler = Arc::new(handler);
        let mut handlers = self.handlers.write();
        let slot = handlers.entry(key).or_default();
        match slot.iter_mut().find(|(id, _)| *id == handler_id) {
            Some(existing) => {
                existing.1 = handler;
                true
            }
            None => {
                slot.push((handler_id, handler));
                false
            }
        }
    }

    /// Removes a registration. Returns true if one was removed.
    pub fn unregister(&self, key: EffectKey, handler_id: &str) -> bool {
        let mut handlers = self.handlers.write();
        let Some(slot) = handlers.get_mut(&key) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|(id, _)| id != handler_id);
        before != slot.len()
    }

    /// Runs every handler registered under `key`.
    ///
    /// The registry lock is released before handlers run, so handlers may
    /// register or unregister freely.
    pub fn dispatch(&self, key: EffectKey, state: &ConnectivityState, transition: &Transition) {
        let handlers: Vec<EffectHandler> = match self.handlers.read().get(&key) {
            Some(slot) => slot.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return,
        };
        for handler in handlers {
            handler(state, transition);
        }
    }

    /// Returns the number of handlers registered under `key`.
    pub fn handler_count(&self, key: EffectKey) -> usize {
        self.handlers.read().get(&key).map_or(0, Vec::len)
    }
}

impl fmt::Debug for SideEffectBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let mut map = f.debug_map();
        for (key, slot) in handlers.iter() {
            map.entry(key, &slot.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ConnectionState, StoreMode};
    use parking_lot::Mutex;

    fn key() -> EffectKey {
        EffectKey::after(Property::StoreMode)
    }

    fn transition() -> Transition {
        Transition::StoreMode {
            from: StoreMode::Offline,
            to: StoreMode::Online,
        }
    }

    #[test]
    fn dispatch_without_handlers_is_noop() {
        let state = ConnectivityState::new(Arc::new(SideEffectBus::new()));
        state.bus().dispatch(key(), &state, &transition());
        assert_eq!(state.bus().handler_count(key()), 0);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = Arc::new(SideEffectBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            bus.register(key(), name, move |_, _| seen.lock().push(name));
        }
        let state = ConnectivityState::new(Arc::clone(&bus));
        bus.dispatch(key(), &state, &transition());
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn same_id_replaces_handler() {
        let bus = Arc::new(SideEffectBus::new());
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c = Arc::clone(&calls);
        assert!(!bus.register(key(), "reconnect", move |_, _| c.lock().push(1)));
        let c = Arc::clone(&calls);
        assert!(bus.register(key(), "reconnect", move |_, _| c.lock().push(2)));

        let state = ConnectivityState::new(Arc::clone(&bus));
        bus.dispatch(key(), &state, &transition());
        assert_eq!(*calls.lock(), vec![2]);
        assert_eq!(bus.handler_count(key()), 1);
    }

    #[test]
    fn keys_are_isolated() {
        let bus = Arc::new(SideEffectBus::new());
        let calls = Arc::new(Mutex::new(0));
        let c = Arc::clone(&calls);
        bus.register(EffectKey::before(Property::StoreMode), "x", move |_, _| {
            *c.lock() += 1
        });
        let state = ConnectivityState::new(Arc::clone(&bus));
        bus.dispatch(key(), &state, &transition());
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn unregister_removes() {
        let bus = SideEffectBus::new();
        bus.register(key(), "x", |_, _| {});
        assert!(bus.unregister(key(), "x"));
        assert!(!bus.unregister(key(), "x"));
        assert!(!bus.unregister(EffectKey::before(Property::ConnectionErrors), "x"));
    }

    #[test]
    fn handler_may_register_during_dispatch() {
        let bus = Arc::new(SideEffectBus::new());
        let inner = Arc::clone(&bus);
        bus.register(key(), "outer", move |_, _| {
            inner.register(EffectKey::after(Property::ConnectionState), "late", |_, t| {
                assert!(matches!(
                    t,
                    Transition::Connection {
                        to: ConnectionState::Disconnected,
                        ..
                    }
                ));
            });
        });
        let state = ConnectivityState::new(Arc::clone(&bus));
        bus.dispatch(key(), &state, &transition());
        assert_eq!(
            bus.handler_count(EffectKey::after(Property::ConnectionState)),
            1
        );
    }
}
