//! Cross-tab auth broadcasts over shared storage change events.
//!
//! A broadcast writes a timestamp under the event's key and removes it right
//! away. Change notifications are edge-triggered on value mutation, so the
//! removal guarantees the next broadcast of the same kind is observed even
//! when it carries the same timestamp. Removals themselves are not events.
//!
//! Without shared storage (disabled by the host, private mode quotas) the bus
//! degrades to a no-op and tabs stop hearing about each other.

use std::rc::Rc;

use chrono::Utc;

use crate::storage::{SharedStorage, StorageChange, Subscription};

pub const LOGIN_EVENT_KEY: &str = "nexus.auth.login_event";
pub const LOGOUT_EVENT_KEY: &str = "nexus.auth.logout_event";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrossTabKind {
    Login,
    Logout,
}

impl CrossTabKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
        }
    }

    #[must_use]
    pub fn storage_key(self) -> &'static str {
        match self {
            Self::Login => LOGIN_EVENT_KEY,
            Self::Logout => LOGOUT_EVENT_KEY,
        }
    }

    #[must_use]
    pub fn from_storage_key(key: &str) -> Option<Self> {
        match key {
            LOGIN_EVENT_KEY => Some(Self::Login),
            LOGOUT_EVENT_KEY => Some(Self::Logout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossTabEvent {
    pub kind: CrossTabKind,
    pub timestamp_ms: i64,
}

impl CrossTabEvent {
    /// Decodes a storage change into a broadcast, ignoring marker removals
    /// and unrelated keys.
    #[must_use]
    pub fn from_change(change: &StorageChange) -> Option<Self> {
        let kind = CrossTabKind::from_storage_key(&change.key)?;
        let value = change.new_value.as_deref()?;
        Some(Self {
            kind,
            timestamp_ms: value.trim().parse().unwrap_or_default(),
        })
    }
}

#[derive(Clone, Default)]
pub struct CrossTabBus {
    shared: Option<Rc<dyn SharedStorage>>,
}

impl CrossTabBus {
    pub fn new(shared: Option<Rc<dyn SharedStorage>>) -> Self {
        if shared.is_none() {
            tracing::warn!(
                target: "nexus.broadcast",
                "shared storage unavailable; cross-tab auth sync disabled",
            );
        }
        Self { shared }
    }

    pub fn is_available(&self) -> bool {
        self.shared.is_some()
    }

    /// Announces `kind` to every other tab. Returns whether the marker reached
    /// shared storage; failures only degrade cross-tab sync.
    pub fn broadcast(&self, kind: CrossTabKind) -> bool {
        let Some(shared) = self.shared.as_ref() else {
            return false;
        };
        let key = kind.storage_key();
        let marker = Utc::now().timestamp_millis().to_string();
        if let Err(error) = shared.set_item(key, &marker) {
            tracing::warn!(
                target: "nexus.broadcast",
                kind = kind.as_str(),
                error = %error,
                "failed to write cross-tab marker",
            );
            return false;
        }
        if let Err(error) = shared.remove_item(key) {
            tracing::warn!(
                target: "nexus.broadcast",
                kind = kind.as_str(),
                error = %error,
                "failed to clear cross-tab marker; a repeat broadcast may go unnoticed",
            );
        }
        tracing::debug!(target: "nexus.broadcast", kind = kind.as_str(), "broadcast sent");
        true
    }

    /// Calls `handler` for every broadcast made by another tab.
    pub fn subscribe(&self, handler: impl Fn(CrossTabEvent) + 'static) -> Subscription {
        let Some(shared) = self.shared.as_ref() else {
            return Subscription::inert();
        };
        let listener = Rc::new(move |change: &StorageChange| {
            if let Some(event) = CrossTabEvent::from_change(change) {
                handler(event);
            }
        });
        match shared.watch(listener) {
            Ok(subscription) => subscription,
            Err(error) => {
                tracing::warn!(
                    target: "nexus.broadcast",
                    error = %error,
                    "failed to watch shared storage; cross-tab auth sync disabled",
                );
                Subscription::inert()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SharedMemoryOrigin;
    use crate::storage::KeyValueStorage;
    use std::cell::RefCell;

    fn recorder() -> (Rc<RefCell<Vec<CrossTabEvent>>>, impl Fn(CrossTabEvent) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (seen, move |event| sink.borrow_mut().push(event))
    }

    #[test]
    fn other_tabs_observe_each_broadcast_once() {
        let origin = SharedMemoryOrigin::new();
        let sender = CrossTabBus::new(Some(Rc::new(origin.open_tab())));
        let receiver = CrossTabBus::new(Some(Rc::new(origin.open_tab())));
        let (seen, handler) = recorder();
        let _subscription = receiver.subscribe(handler);

        assert!(sender.broadcast(CrossTabKind::Logout));
        assert!(sender.broadcast(CrossTabKind::Logout));

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|event| event.kind == CrossTabKind::Logout));
    }

    #[test]
    fn sender_does_not_hear_itself() {
        let origin = SharedMemoryOrigin::new();
        let bus = CrossTabBus::new(Some(Rc::new(origin.open_tab())));
        let (seen, handler) = recorder();
        let _subscription = bus.subscribe(handler);

        bus.broadcast(CrossTabKind::Login);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn marker_is_cleared_after_broadcast() {
        let origin = SharedMemoryOrigin::new();
        let storage = Rc::new(origin.open_tab());
        let bus = CrossTabBus::new(Some(storage.clone()));
        bus.broadcast(CrossTabKind::Login);
        assert_eq!(storage.get_item(LOGIN_EVENT_KEY).expect("readable"), None);
    }

    #[test]
    fn dropping_subscription_stops_delivery() {
        let origin = SharedMemoryOrigin::new();
        let sender = CrossTabBus::new(Some(Rc::new(origin.open_tab())));
        let receiver = CrossTabBus::new(Some(Rc::new(origin.open_tab())));
        let (seen, handler) = recorder();
        let subscription = receiver.subscribe(handler);
        drop(subscription);

        sender.broadcast(CrossTabKind::Logout);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn missing_shared_storage_degrades_to_noop() {
        let bus = CrossTabBus::new(None);
        assert!(!bus.is_available());
        assert!(!bus.broadcast(CrossTabKind::Logout));
        assert!(bus.subscribe(|_| {}).is_inert());
    }

    #[test]
    fn disabled_shared_storage_degrades_to_noop() {
        let origin = SharedMemoryOrigin::new();
        let bus = CrossTabBus::new(Some(Rc::new(origin.open_tab())));
        origin.set_available(false);
        assert!(!bus.broadcast(CrossTabKind::Logout));
    }

    #[test]
    fn unrelated_keys_and_removals_are_not_events() {
        let removal = StorageChange {
            key: LOGOUT_EVENT_KEY.to_string(),
            old_value: Some("1".to_string()),
            new_value: None,
        };
        assert_eq!(CrossTabEvent::from_change(&removal), None);

        let unrelated = StorageChange {
            key: "theme".to_string(),
            old_value: None,
            new_value: Some("dark".to_string()),
        };
        assert_eq!(CrossTabEvent::from_change(&unrelated), None);
    }
}
