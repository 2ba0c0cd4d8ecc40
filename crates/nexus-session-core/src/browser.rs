//! `web-sys` backed storage for a real browser tab.

use std::rc::Rc;

use wasm_bindgen::JsCast;
use wasm_bindgen::closure::Closure;
use web_sys::{StorageEvent, VisibilityState};

use crate::machine::TabContext;
use crate::storage::{
    KeyValueStorage, SharedStorage, StorageChange, StorageError, StorageListener, Subscription,
};

/// sessionStorage or localStorage of the current window.
pub struct BrowserStorage {
    storage: web_sys::Storage,
}

impl BrowserStorage {
    pub fn session() -> Result<Self, StorageError> {
        let window = web_sys::window().ok_or_else(|| StorageError::unavailable("no window"))?;
        let storage = window
            .session_storage()
            .map_err(|_| StorageError::unavailable("sessionStorage access denied"))?
            .ok_or_else(|| StorageError::unavailable("sessionStorage missing"))?;
        Ok(Self { storage })
    }

    pub fn local() -> Result<Self, StorageError> {
        let window = web_sys::window().ok_or_else(|| StorageError::unavailable("no window"))?;
        let storage = window
            .local_storage()
            .map_err(|_| StorageError::unavailable("localStorage access denied"))?
            .ok_or_else(|| StorageError::unavailable("localStorage missing"))?;
        Ok(Self { storage })
    }
}

impl KeyValueStorage for BrowserStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage
            .get_item(key)
            .map_err(|_| StorageError::unavailable(format!("read of {key} failed")))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.storage
            .set_item(key, value)
            .map_err(|_| StorageError::WriteRejected {
                key: key.to_string(),
            })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.storage
            .remove_item(key)
            .map_err(|_| StorageError::WriteRejected {
                key: key.to_string(),
            })
    }
}

impl SharedStorage for BrowserStorage {
    /// Listens for the window `storage` event, which browsers only fire for
    /// writes made by other tabs.
    fn watch(&self, listener: StorageListener) -> Result<Subscription, StorageError> {
        let window = web_sys::window().ok_or_else(|| StorageError::unavailable("no window"))?;
        let callback = Closure::<dyn FnMut(web_sys::Event)>::wrap(Box::new(move |event| {
            let Some(event) = event.dyn_ref::<StorageEvent>() else {
                return;
            };
            // A null key means the other tab called clear().
            let Some(key) = event.key() else {
                return;
            };
            listener(&StorageChange {
                key,
                old_value: event.old_value(),
                new_value: event.new_value(),
            });
        }));
        window
            .add_event_listener_with_callback("storage", callback.as_ref().unchecked_ref())
            .map_err(|_| StorageError::unavailable("storage event listener rejected"))?;

        Ok(Subscription::new(move || {
            let _ = window
                .remove_event_listener_with_callback("storage", callback.as_ref().unchecked_ref());
            drop(callback);
        }))
    }
}

/// Storage for a coordinator running in this window. Shared storage is
/// optional: without it the tab runs isolated.
pub fn tab_context() -> Result<TabContext, StorageError> {
    let tab_storage: Rc<dyn KeyValueStorage> = Rc::new(BrowserStorage::session()?);
    let shared_storage = match BrowserStorage::local() {
        Ok(local) => Some(Rc::new(local) as Rc<dyn SharedStorage>),
        Err(error) => {
            tracing::warn!(target: "nexus.storage", error = %error, "localStorage unavailable");
            None
        }
    };
    Ok(TabContext {
        tab_storage,
        shared_storage,
    })
}

/// Calls `on_change(visible)` whenever the document's visibility flips.
pub fn watch_visibility(on_change: impl Fn(bool) + 'static) -> Subscription {
    let Some(document) = web_sys::window().and_then(|window| window.document()) else {
        return Subscription::inert();
    };
    let target = document.clone();
    let callback = Closure::<dyn FnMut(web_sys::Event)>::wrap(Box::new(move |_event| {
        on_change(target.visibility_state() == VisibilityState::Visible);
    }));
    if document
        .add_event_listener_with_callback("visibilitychange", callback.as_ref().unchecked_ref())
        .is_err()
    {
        tracing::warn!(target: "nexus.session", "visibilitychange listener rejected");
        return Subscription::inert();
    }

    Subscription::new(move || {
        let _ = document.remove_event_listener_with_callback(
            "visibilitychange",
            callback.as_ref().unchecked_ref(),
        );
        drop(callback);
    })
}
