//! Browser-style key-value storage primitives.
//!
//! Two flavours are consumed by the coordinator:
//!
//! - [`KeyValueStorage`]: tab-scoped storage (sessionStorage in a browser).
//!   Nothing written here is ever visible to another tab.
//! - [`SharedStorage`]: origin-wide storage (localStorage) that additionally
//!   reports changes made by *other* tabs. A tab never observes its own
//!   writes, and a write that leaves the value unchanged produces no
//!   notification.

use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage_unavailable:{message}")]
    Unavailable { message: String },
    #[error("storage_write_rejected:{key}")]
    WriteRejected { key: String },
    #[error("storage_encode_failed:{message}")]
    Encode { message: String },
}

impl StorageError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// A change to a shared key made by another tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

pub type StorageListener = Rc<dyn Fn(&StorageChange)>;

pub trait KeyValueStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

pub trait SharedStorage: KeyValueStorage {
    /// Registers `listener` for changes made by other tabs. The listener stays
    /// installed until the returned [`Subscription`] is dropped or cancelled.
    fn watch(&self, listener: StorageListener) -> Result<Subscription, StorageError>;
}

/// Teardown handle for a registered callback.
///
/// Dropping the handle unregisters the callback.
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to tear down, handed out when the
    /// underlying channel is unavailable.
    pub fn inert() -> Self {
        Self { cancel: None }
    }

    pub fn is_inert(&self) -> bool {
        self.cancel.is_none()
    }

    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn dropping_subscription_runs_cancel_once() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let subscription = Subscription::new(move || counter.set(counter.get() + 1));
        assert!(!subscription.is_inert());
        drop(subscription);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn explicit_cancel_does_not_run_twice_on_drop() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        Subscription::new(move || counter.set(counter.get() + 1)).cancel();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn inert_subscription_is_a_noop() {
        let subscription = Subscription::inert();
        assert!(subscription.is_inert());
        subscription.cancel();
    }
}
