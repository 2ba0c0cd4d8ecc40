//! In-memory collaborators for tests and the tab simulator.
//!
//! [`SharedMemoryOrigin`] reproduces browser storage-event semantics: a write
//! notifies every *other* tab view of the origin, and only when the value
//! actually changes.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::{Rc, Weak};

use async_trait::async_trait;

use crate::identity::{
    Credentials, Document, DocumentStore, Identity, IdentityListener, IdentityProvider,
    ProviderError, SetOptions, StoreError,
};
use crate::storage::{
    KeyValueStorage, SharedStorage, StorageChange, StorageError, StorageListener, Subscription,
};

/// Tab-scoped storage, the sessionStorage stand-in.
#[derive(Debug)]
pub struct MemoryStorage {
    items: RefCell<BTreeMap<String, String>>,
    available: Cell<bool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            items: RefCell::new(BTreeMap::new()),
            available: Cell::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.available.get() {
            Ok(())
        } else {
            Err(StorageError::unavailable("tab storage disabled"))
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.ensure_available()?;
        Ok(self.items.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.ensure_available()?;
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.ensure_available()?;
        self.items.borrow_mut().remove(key);
        Ok(())
    }
}

struct OriginListener {
    id: u64,
    view: u64,
    listener: StorageListener,
}

#[derive(Default)]
struct OriginState {
    items: BTreeMap<String, String>,
    listeners: Vec<OriginListener>,
    next_view: u64,
    next_listener: u64,
    unavailable: bool,
}

/// One origin's localStorage, shared by every tab opened from it.
#[derive(Clone, Default)]
pub struct SharedMemoryOrigin {
    state: Rc<RefCell<OriginState>>,
}

impl SharedMemoryOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the storage view of a new tab.
    pub fn open_tab(&self) -> SharedMemoryStorage {
        let mut state = self.state.borrow_mut();
        state.next_view += 1;
        SharedMemoryStorage {
            state: Rc::clone(&self.state),
            view: state.next_view,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.state.borrow_mut().unavailable = !available;
    }

    pub fn listener_count(&self) -> usize {
        self.state.borrow().listeners.len()
    }
}

pub struct SharedMemoryStorage {
    state: Rc<RefCell<OriginState>>,
    view: u64,
}

impl SharedMemoryStorage {
    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.state.borrow().unavailable {
            Err(StorageError::unavailable("shared storage disabled"))
        } else {
            Ok(())
        }
    }

    fn notify_others(&self, change: StorageChange) {
        // Listeners run after the borrow is released so they may touch storage.
        let listeners = self
            .state
            .borrow()
            .listeners
            .iter()
            .filter(|entry| entry.view != self.view)
            .map(|entry| Rc::clone(&entry.listener))
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(&change);
        }
    }
}

impl KeyValueStorage for SharedMemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.ensure_available()?;
        Ok(self.state.borrow().items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.ensure_available()?;
        let old_value = self
            .state
            .borrow_mut()
            .items
            .insert(key.to_string(), value.to_string());
        if old_value.as_deref() != Some(value) {
            self.notify_others(StorageChange {
                key: key.to_string(),
                old_value,
                new_value: Some(value.to_string()),
            });
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.ensure_available()?;
        let old_value = self.state.borrow_mut().items.remove(key);
        if old_value.is_some() {
            self.notify_others(StorageChange {
                key: key.to_string(),
                old_value,
                new_value: None,
            });
        }
        Ok(())
    }
}

impl SharedStorage for SharedMemoryStorage {
    fn watch(&self, listener: StorageListener) -> Result<Subscription, StorageError> {
        self.ensure_available()?;
        let id = {
            let mut state = self.state.borrow_mut();
            state.next_listener += 1;
            let id = state.next_listener;
            state.listeners.push(OriginListener {
                id,
                view: self.view,
                listener,
            });
            id
        };
        let state: Weak<RefCell<OriginState>> = Rc::downgrade(&self.state);
        Ok(Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                state.borrow_mut().listeners.retain(|entry| entry.id != id);
            }
        }))
    }
}

#[derive(Debug, Clone)]
struct MemoryAccount {
    uid: String,
    password: String,
    display_name: Option<String>,
}

type IdentityListeners = Rc<RefCell<Vec<(u64, IdentityListener)>>>;

/// Identity provider for one tab, with per-tab session persistence.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    accounts: RefCell<HashMap<String, MemoryAccount>>,
    current: RefCell<Option<Identity>>,
    listeners: IdentityListeners,
    next_listener: Cell<u64>,
    interactive_results: RefCell<VecDeque<Result<Identity, ProviderError>>>,
    sign_in_failures: RefCell<VecDeque<ProviderError>>,
    reset_codes: RefCell<HashMap<String, String>>,
    last_reset_code: RefCell<Option<String>>,
    issued_resets: Cell<u32>,
    sign_out_calls: Cell<usize>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_account(&self, email: &str, password: &str, uid: &str) {
        self.accounts.borrow_mut().insert(
            email.trim().to_lowercase(),
            MemoryAccount {
                uid: uid.to_string(),
                password: password.to_string(),
                display_name: None,
            },
        );
    }

    /// Simulates the provider reporting a new auth state.
    pub fn emit(&self, identity: Option<Identity>) {
        self.current.replace(identity.clone());
        self.notify(identity);
    }

    pub fn current(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.get()
    }

    pub fn queue_interactive_result(&self, result: Result<Identity, ProviderError>) {
        self.interactive_results.borrow_mut().push_back(result);
    }

    pub fn fail_next_sign_in(&self, error: ProviderError) {
        self.sign_in_failures.borrow_mut().push_back(error);
    }

    pub fn last_reset_code(&self) -> Option<String> {
        self.last_reset_code.borrow().clone()
    }

    pub fn password_of(&self, email: &str) -> Option<String> {
        self.accounts
            .borrow()
            .get(&email.trim().to_lowercase())
            .map(|account| account.password.clone())
    }

    fn notify(&self, identity: Option<Identity>) {
        let listeners = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(identity.clone());
        }
    }

    fn set_current(&self, identity: Option<Identity>) {
        let changed = *self.current.borrow() != identity;
        if changed {
            self.emit(identity);
        }
    }
}

#[async_trait(?Send)]
impl IdentityProvider for MemoryIdentityProvider {
    fn subscribe_auth_state(&self, listener: IdentityListener) -> Subscription {
        let id = self.next_listener.get() + 1;
        self.next_listener.set(id);
        self.listeners
            .borrow_mut()
            .push((id, Rc::clone(&listener)));
        listener(self.current());

        let listeners = Rc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.borrow_mut().retain(|(entry, _)| *entry != id);
            }
        })
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, ProviderError> {
        if let Some(error) = self.sign_in_failures.borrow_mut().pop_front() {
            return Err(error);
        }
        let email = credentials.email.trim().to_lowercase();
        let account = self
            .accounts
            .borrow()
            .get(&email)
            .cloned()
            .ok_or(ProviderError::InvalidCredentials)?;
        if account.password != credentials.password {
            return Err(ProviderError::InvalidCredentials);
        }
        let identity = Identity {
            uid: account.uid,
            email: Some(email),
            display_name: account.display_name,
            photo_url: None,
        };
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_in_interactive(&self) -> Result<Identity, ProviderError> {
        let result = self
            .interactive_results
            .borrow_mut()
            .pop_front()
            .unwrap_or(Err(ProviderError::PopupDismissed));
        let identity = result?;
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.sign_out_calls.set(self.sign_out_calls.get() + 1);
        self.set_current(None);
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), ProviderError> {
        let email = email.trim().to_lowercase();
        if !self.accounts.borrow().contains_key(&email) {
            // Unknown addresses are accepted silently so callers cannot probe accounts.
            return Ok(());
        }
        let issued = self.issued_resets.get() + 1;
        self.issued_resets.set(issued);
        let code = format!("{:06}", 100_000 + issued);
        self.reset_codes.borrow_mut().insert(code.clone(), email);
        self.last_reset_code.replace(Some(code));
        Ok(())
    }

    async fn verify_password_reset_code(&self, code: &str) -> Result<String, ProviderError> {
        self.reset_codes
            .borrow()
            .get(code)
            .cloned()
            .ok_or(ProviderError::InvalidActionCode)
    }

    async fn confirm_password_reset(
        &self,
        code: &str,
        new_password: &str,
    ) -> Result<(), ProviderError> {
        if new_password.len() < 6 {
            return Err(ProviderError::WeakPassword);
        }
        let email = self
            .reset_codes
            .borrow_mut()
            .remove(code)
            .ok_or(ProviderError::InvalidActionCode)?;
        if let Some(account) = self.accounts.borrow_mut().get_mut(&email) {
            account.password = new_password.to_string();
        }
        Ok(())
    }
}

/// Document store keyed by `(collection, id)`.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RefCell<HashMap<(String, String), Document>>,
    read_failures: RefCell<VecDeque<StoreError>>,
    write_failures: RefCell<VecDeque<StoreError>>,
    reads: Cell<usize>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a document; non-object values store an empty document.
    pub fn insert(&self, collection: &str, id: &str, value: serde_json::Value) {
        let document = match value {
            serde_json::Value::Object(map) => map,
            _ => Document::new(),
        };
        self.documents
            .borrow_mut()
            .insert((collection.to_string(), id.to_string()), document);
    }

    pub fn remove(&self, collection: &str, id: &str) {
        self.documents
            .borrow_mut()
            .remove(&(collection.to_string(), id.to_string()));
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.documents
            .borrow()
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    pub fn fail_next_read(&self, error: StoreError) {
        self.read_failures.borrow_mut().push_back(error);
    }

    pub fn fail_next_write(&self, error: StoreError) {
        self.write_failures.borrow_mut().push_back(error);
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

#[async_trait(?Send)]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        self.reads.set(self.reads.get() + 1);
        if let Some(error) = self.read_failures.borrow_mut().pop_front() {
            return Err(error);
        }
        Ok(self.document(collection, id))
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
        options: SetOptions,
    ) -> Result<(), StoreError> {
        if let Some(error) = self.write_failures.borrow_mut().pop_front() {
            return Err(error);
        }
        let mut documents = self.documents.borrow_mut();
        let entry = documents
            .entry((collection.to_string(), id.to_string()))
            .or_default();
        if options.merge {
            entry.extend(fields);
        } else {
            *entry = fields;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_listener() -> (Rc<RefCell<Vec<StorageChange>>>, StorageListener) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let listener: StorageListener =
            Rc::new(move |change: &StorageChange| sink.borrow_mut().push(change.clone()));
        (seen, listener)
    }

    #[test]
    fn shared_writes_notify_other_views_only() {
        let origin = SharedMemoryOrigin::new();
        let left = origin.open_tab();
        let right = origin.open_tab();
        let (left_seen, left_listener) = recording_listener();
        let (right_seen, right_listener) = recording_listener();
        let _left_watch = left.watch(left_listener).expect("watch left");
        let _right_watch = right.watch(right_listener).expect("watch right");

        left.set_item("k", "v1").expect("write");
        assert!(left_seen.borrow().is_empty());
        assert_eq!(
            right_seen.borrow().as_slice(),
            [StorageChange {
                key: "k".to_string(),
                old_value: None,
                new_value: Some("v1".to_string()),
            }]
        );
        assert_eq!(right.get_item("k").expect("read").as_deref(), Some("v1"));
    }

    #[test]
    fn unchanged_value_does_not_notify() {
        let origin = SharedMemoryOrigin::new();
        let writer = origin.open_tab();
        let reader = origin.open_tab();
        let (seen, listener) = recording_listener();
        let _watch = reader.watch(listener).expect("watch");

        writer.set_item("k", "same").expect("first");
        writer.set_item("k", "same").expect("second");
        writer.remove_item("missing").expect("remove missing");
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn cancelled_watch_is_unregistered() {
        let origin = SharedMemoryOrigin::new();
        let view = origin.open_tab();
        let (_seen, listener) = recording_listener();
        let watch = view.watch(listener).expect("watch");
        assert_eq!(origin.listener_count(), 1);
        watch.cancel();
        assert_eq!(origin.listener_count(), 0);
    }

    #[tokio::test]
    async fn merge_writes_keep_existing_fields() {
        let store = MemoryDocumentStore::new();
        store.insert("users", "1", serde_json::json!({"role": "admin", "name": "Ada"}));

        let mut fields = Document::new();
        fields.insert("name".to_string(), serde_json::json!("Grace"));
        store
            .set_document("users", "1", fields.clone(), SetOptions::MERGE)
            .await
            .expect("merge");
        let merged = store.document("users", "1").expect("present");
        assert_eq!(merged.get("role"), Some(&serde_json::json!("admin")));
        assert_eq!(merged.get("name"), Some(&serde_json::json!("Grace")));

        store
            .set_document("users", "1", fields, SetOptions::REPLACE)
            .await
            .expect("replace");
        assert_eq!(store.document("users", "1").expect("present").get("role"), None);
    }

    #[tokio::test]
    async fn provider_reports_current_identity_on_subscribe() {
        let provider = MemoryIdentityProvider::new();
        provider.register_account("ada@nexus.test", "correct horse", "42");
        provider
            .sign_in(&Credentials {
                email: "ada@nexus.test".to_string(),
                password: "correct horse".to_string(),
            })
            .await
            .expect("sign in");

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _subscription =
            provider.subscribe_auth_state(Rc::new(move |identity: Option<Identity>| {
                sink.borrow_mut().push(identity.map(|identity| identity.uid));
            }));
        provider.sign_out().await.expect("sign out");
        provider.sign_out().await.expect("second sign out");

        assert_eq!(seen.borrow().as_slice(), [Some("42".to_string()), None]);
        assert_eq!(provider.sign_out_calls(), 2);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let provider = MemoryIdentityProvider::new();
        provider.register_account("ada@nexus.test", "correct horse", "42");
        let error = provider
            .sign_in(&Credentials {
                email: "ada@nexus.test".to_string(),
                password: "battery staple".to_string(),
            })
            .await
            .expect_err("rejected");
        assert_eq!(error, ProviderError::InvalidCredentials);
        assert_eq!(provider.current(), None);
    }
}
