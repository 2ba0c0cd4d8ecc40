//! Auth state machine for one tab.
//!
//! [`SessionCoordinator`] owns every collaborator of the tab: the identity
//! provider subscription, the cross-tab bus, the session store and the
//! active-tab tracker. Provider callbacks and cross-tab broadcasts are queued
//! into a single inbox and applied strictly in arrival order by
//! [`SessionCoordinator::process_pending`] or [`SessionCoordinator::turn`].

use std::rc::Rc;

use chrono::Utc;
use futures::channel::mpsc;
use futures::{FutureExt, StreamExt};

use crate::activity::{ActiveTabTracker, TabActivity};
use crate::auth::normalize_credentials;
use crate::broadcast::{CrossTabBus, CrossTabEvent, CrossTabKind};
use crate::config::CoordinatorConfig;
use crate::error::AuthError;
use crate::identity::{DocumentStore, Identity, IdentityProvider, ProviderError, SetOptions};
use crate::profile::{Principal, ProfileUpdate, Role};
use crate::router::{AppRoute, GuardView, RouteGuard};
use crate::session::{SessionRecord, SessionStore};
use crate::storage::{KeyValueStorage, SharedStorage, Subscription};
use crate::tab::{TabIdentity, allocate_tab_identity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Waiting for the provider's first auth-state callback.
    Initializing,
    Unauthenticated,
    /// Identity known, profile fetch in flight.
    Authenticating { uid: String },
    Authenticated(Principal),
    /// Profile fetch failed for a reason worth retrying.
    Error(AuthError),
}

impl AuthState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating { .. } => "authenticating",
            Self::Authenticated(_) => "authenticated",
            Self::Error(_) => "error",
        }
    }

    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Authenticated(principal) => Some(principal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorInput {
    IdentityChanged(Option<Identity>),
    CrossTab(CrossTabEvent),
}

/// Browser storage handed to one tab's coordinator.
#[derive(Clone)]
pub struct TabContext {
    pub tab_storage: Rc<dyn KeyValueStorage>,
    /// `None` when the host disables shared storage; cross-tab sync is then off.
    pub shared_storage: Option<Rc<dyn SharedStorage>>,
}

pub struct SessionCoordinator<P, D> {
    provider: Rc<P>,
    documents: Rc<D>,
    config: CoordinatorConfig,
    tab: TabIdentity,
    sessions: SessionStore,
    bus: CrossTabBus,
    activity: ActiveTabTracker,
    state: AuthState,
    notice: Option<AuthError>,
    identity: Option<Identity>,
    /// Uid force-signed-out by this tab; its stale callbacks are ignored.
    rejected_uid: Option<String>,
    inbox_tx: mpsc::UnboundedSender<CoordinatorInput>,
    inbox_rx: mpsc::UnboundedReceiver<CoordinatorInput>,
    subscriptions: Vec<Subscription>,
}

impl<P, D> SessionCoordinator<P, D>
where
    P: IdentityProvider + 'static,
    D: DocumentStore + 'static,
{
    pub fn new(
        provider: Rc<P>,
        documents: Rc<D>,
        context: TabContext,
        config: CoordinatorConfig,
    ) -> Self {
        let tab = allocate_tab_identity(context.tab_storage.as_ref());
        let sessions = SessionStore::new(Rc::clone(&context.tab_storage));
        let bus = CrossTabBus::new(context.shared_storage.clone());
        let activity = ActiveTabTracker::new(tab.as_str(), context.shared_storage);
        let (inbox_tx, inbox_rx) = mpsc::unbounded();

        Self {
            provider,
            documents,
            config,
            tab,
            sessions,
            bus,
            activity,
            state: AuthState::Initializing,
            notice: None,
            identity: None,
            rejected_uid: None,
            inbox_tx,
            inbox_rx,
            subscriptions: Vec::new(),
        }
    }

    /// Subscribes to the provider, the cross-tab bus and the active-tab slot.
    /// Calling `start` on a running coordinator does nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let tx = self.inbox_tx.clone();
        let identity_subscription = self.provider.subscribe_auth_state(Rc::new(
            move |identity: Option<Identity>| {
                if tx
                    .unbounded_send(CoordinatorInput::IdentityChanged(identity))
                    .is_err()
                {
                    tracing::debug!(target: "nexus.session", "inbox closed; auth callback dropped");
                }
            },
        ));

        let tx = self.inbox_tx.clone();
        let bus_subscription = self.bus.subscribe(move |event| {
            if tx
                .unbounded_send(CoordinatorInput::CrossTab(event))
                .is_err()
            {
                tracing::debug!(target: "nexus.broadcast", "inbox closed; broadcast dropped");
            }
        });

        self.subscriptions = vec![
            identity_subscription,
            bus_subscription,
            self.activity.watch(),
        ];
        self.activity.claim();

        tracing::info!(
            target: "nexus.session",
            tab_id = %self.tab,
            cross_tab = self.bus.is_available(),
            "session coordinator started",
        );
    }

    /// Tears down every subscription. Queued inputs are kept but no new ones
    /// arrive until the next `start`.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        for subscription in self.subscriptions.drain(..) {
            subscription.cancel();
        }
        tracing::info!(target: "nexus.session", tab_id = %self.tab, "session coordinator stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.state.principal()
    }

    /// Message to show in a banner, if any.
    pub fn notice(&self) -> Option<&AuthError> {
        self.notice.as_ref()
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    pub fn tab_id(&self) -> &str {
        self.tab.as_str()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// This tab's stored session snapshot.
    pub fn session(&self) -> Option<SessionRecord> {
        match self.sessions.read(self.tab.as_str()) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(
                    target: "nexus.storage",
                    tab_id = %self.tab,
                    error = %error,
                    "failed to read session snapshot",
                );
                None
            }
        }
    }

    pub fn activity(&self) -> TabActivity {
        self.activity.activity()
    }

    pub fn set_visible(&self, visible: bool) {
        self.activity.set_visible(visible);
    }

    /// Queues an input as if a subscription had delivered it.
    pub fn enqueue(&self, input: CoordinatorInput) {
        if self.inbox_tx.unbounded_send(input).is_err() {
            tracing::debug!(target: "nexus.session", "inbox closed; input dropped");
        }
    }

    /// Applies every queued input, including any queued while applying.
    /// Returns how many inputs were applied.
    pub async fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Some(Some(input)) = self.inbox_rx.next().now_or_never() {
            self.apply(input).await;
            applied += 1;
        }
        applied
    }

    /// Waits for the next input, then drains the inbox.
    pub async fn turn(&mut self) -> usize {
        let Some(input) = self.inbox_rx.next().await else {
            return 0;
        };
        self.apply(input).await;
        1 + self.process_pending().await
    }

    pub fn guard(&self, required: Role) -> GuardView {
        let activity = if self.config.enforce_active_tab {
            self.activity.activity()
        } else {
            TabActivity::Active
        };
        let record = self.guard_record();
        RouteGuard::new(required).evaluate(&self.state, record.as_ref(), activity)
    }

    /// The snapshot protected pages are judged on. An authenticated tab uses
    /// its live principal even when tab storage rejected the write. After a
    /// failed fetch only a snapshot of the identity being fetched counts.
    fn guard_record(&self) -> Option<SessionRecord> {
        match &self.state {
            AuthState::Authenticated(principal) => {
                Some(SessionRecord::new(self.tab.as_str(), Some(principal.clone())))
            }
            AuthState::Error(_) => self.retained_snapshot().map(|principal| {
                SessionRecord::new(self.tab.as_str(), Some(principal))
            }),
            AuthState::Initializing
            | AuthState::Unauthenticated
            | AuthState::Authenticating { .. } => None,
        }
    }

    /// Stored principal, if it belongs to the identity the provider reports.
    fn retained_snapshot(&self) -> Option<Principal> {
        let identity = self.identity.as_ref()?;
        self.session()
            .and_then(|record| record.principal)
            .filter(|principal| principal.uid == identity.uid)
    }

    pub async fn sign_in_with_password(
        &mut self,
        email: &str,
        password: &str,
    ) -> Result<AppRoute, AuthError> {
        let credentials = normalize_credentials(email, password)?;
        self.begin_sign_in().await;
        let result = self.provider.sign_in(&credentials).await;
        let identity = match result {
            Ok(identity) => identity,
            Err(error) => return Err(self.sign_in_failed(error)),
        };
        self.complete_sign_in(identity).await
    }

    /// Popup sign-in. `Ok(None)` means the person closed the popup.
    pub async fn sign_in_interactive(&mut self) -> Result<Option<AppRoute>, AuthError> {
        self.begin_sign_in().await;
        let result = self.provider.sign_in_interactive().await;
        match result {
            Ok(identity) => self.complete_sign_in(identity).await.map(Some),
            Err(ProviderError::PopupDismissed) => {
                tracing::debug!(target: "nexus.auth", tab_id = %self.tab, "sign-in popup dismissed");
                Ok(None)
            }
            Err(error) => Err(self.sign_in_failed(error)),
        }
    }

    /// Signs this tab out and tells every other tab to do the same.
    ///
    /// Local teardown and the broadcast happen even if the provider call
    /// fails; the provider error is returned afterwards.
    pub async fn sign_out(&mut self) -> Result<(), AuthError> {
        let result = self.provider.sign_out().await;
        self.identity = None;
        self.rejected_uid = None;
        self.notice = None;
        self.clear_record();
        self.transition(AuthState::Unauthenticated);
        self.bus.broadcast(CrossTabKind::Logout);
        tracing::info!(target: "nexus.auth", tab_id = %self.tab, "signed out");

        result.map_err(|error| {
            tracing::warn!(
                target: "nexus.auth",
                tab_id = %self.tab,
                error = %error,
                "provider sign-out failed",
            );
            AuthError::from(error)
        })
    }

    /// Re-runs the profile fetch for the current identity after a failure.
    pub async fn retry(&mut self) -> Result<Principal, AuthError> {
        let Some(identity) = self.identity.clone() else {
            return Err(AuthError::NotSignedIn);
        };
        self.reconcile(&identity).await
    }

    /// Merges the editable fields into the profile document and refreshes the
    /// principal and session snapshot.
    pub async fn update_profile(&mut self, update: ProfileUpdate) -> Result<Principal, AuthError> {
        let mut principal = match &self.state {
            AuthState::Authenticated(principal) => principal.clone(),
            // The page still renders from the snapshot; surface the fetch failure.
            AuthState::Error(error) if self.retained_snapshot().is_some() => {
                return Err(error.clone());
            }
            _ => return Err(AuthError::NotSignedIn),
        };
        if update.picture_too_large() {
            return Err(self.surface(AuthError::PictureTooLarge));
        }

        let fields = update.to_document(Utc::now());
        if let Err(error) = self
            .documents
            .set_document(
                &self.config.profile_collection,
                &principal.uid,
                fields,
                SetOptions::MERGE,
            )
            .await
        {
            tracing::warn!(
                target: "nexus.auth",
                uid = %principal.uid,
                error = %error,
                "profile update failed",
            );
            return Err(self.surface(AuthError::from(error)));
        }

        update.apply_to(&mut principal.profile);
        self.write_record(&principal);
        self.state = AuthState::Authenticated(principal.clone());
        tracing::info!(target: "nexus.auth", uid = %principal.uid, "profile updated");
        Ok(principal)
    }

    async fn apply(&mut self, input: CoordinatorInput) {
        match input {
            CoordinatorInput::IdentityChanged(identity) => self.apply_identity(identity).await,
            CoordinatorInput::CrossTab(event) => self.apply_cross_tab(event).await,
        }
    }

    async fn apply_identity(&mut self, identity: Option<Identity>) {
        let Some(identity) = identity else {
            self.identity = None;
            self.settle_signed_out();
            return;
        };

        if self.rejected_uid.as_deref() == Some(identity.uid.as_str()) {
            tracing::debug!(
                target: "nexus.session",
                uid = %identity.uid,
                "ignoring callback for force-signed-out identity",
            );
            // Whoever this tab showed before is no longer the provider's identity.
            if self.identity.take().is_some() {
                self.settle_signed_out();
            }
            return;
        }

        let same_identity = self
            .identity
            .as_ref()
            .is_some_and(|current| current.uid == identity.uid);
        let settled = matches!(
            self.state,
            AuthState::Authenticated(_) | AuthState::Error(_) | AuthState::Authenticating { .. }
        );
        if same_identity && settled {
            tracing::debug!(target: "nexus.session", uid = %identity.uid, "duplicate auth callback");
            return;
        }

        self.identity = Some(identity.clone());
        // Failures are already reflected in state and notice.
        let _ = self.reconcile(&identity).await;
    }

    async fn apply_cross_tab(&mut self, event: CrossTabEvent) {
        tracing::info!(
            target: "nexus.broadcast",
            tab_id = %self.tab,
            kind = event.kind.as_str(),
            "cross-tab event received",
        );
        match event.kind {
            CrossTabKind::Logout => {
                self.identity = None;
                self.clear_record();
                self.transition(AuthState::Unauthenticated);
                // Quiet sign-out: the originating tab already broadcast.
                if let Err(error) = self.provider.sign_out().await {
                    tracing::warn!(
                        target: "nexus.auth",
                        tab_id = %self.tab,
                        error = %error,
                        "provider sign-out after cross-tab logout failed",
                    );
                }
            }
            CrossTabKind::Login => {
                let Some(identity) = self.identity.clone() else {
                    tracing::debug!(
                        target: "nexus.session",
                        tab_id = %self.tab,
                        "cross-tab login ignored; no identity in this tab",
                    );
                    return;
                };
                let _ = self.reconcile(&identity).await;
            }
        }
    }

    /// Fetches the profile for `identity` and settles the state on the result.
    async fn reconcile(&mut self, identity: &Identity) -> Result<Principal, AuthError> {
        self.transition(AuthState::Authenticating {
            uid: identity.uid.clone(),
        });

        let fetched = self
            .documents
            .get_document(&self.config.profile_collection, &identity.uid)
            .await;
        let document = match fetched {
            Ok(Some(document)) => document,
            Ok(None) => {
                tracing::warn!(
                    target: "nexus.auth",
                    uid = %identity.uid,
                    collection = %self.config.profile_collection,
                    "profile document missing",
                );
                return Err(self.force_sign_out(identity, AuthError::AccountNotConfigured).await);
            }
            Err(error) => {
                tracing::warn!(
                    target: "nexus.auth",
                    uid = %identity.uid,
                    error = %error,
                    "profile fetch failed",
                );
                let error = AuthError::from(error);
                if self.retained_snapshot().is_none() {
                    // The snapshot belongs to someone the provider no longer reports.
                    self.clear_record();
                }
                self.notice = Some(error.clone());
                self.transition(AuthState::Error(error.clone()));
                return Err(error);
            }
        };

        match Principal::from_profile_document(identity, &document, self.config.default_role) {
            Ok(principal) => {
                self.write_record(&principal);
                self.notice = None;
                tracing::info!(
                    target: "nexus.auth",
                    tab_id = %self.tab,
                    uid = %principal.uid,
                    role = %principal.role,
                    "principal authenticated",
                );
                self.transition(AuthState::Authenticated(principal.clone()));
                Ok(principal)
            }
            Err(error) => {
                tracing::warn!(
                    target: "nexus.auth",
                    uid = %identity.uid,
                    error = %error,
                    "profile role rejected",
                );
                Err(self.force_sign_out(identity, AuthError::from(error)).await)
            }
        }
    }

    /// Clears the session and signs the provider out because the identity has
    /// no usable role. Returns `error` for convenience.
    async fn force_sign_out(&mut self, identity: &Identity, error: AuthError) -> AuthError {
        self.identity = None;
        self.rejected_uid = Some(identity.uid.clone());
        self.clear_record();
        self.notice = Some(error.clone());
        self.transition(AuthState::Unauthenticated);
        if let Err(sign_out_error) = self.provider.sign_out().await {
            tracing::warn!(
                target: "nexus.auth",
                uid = %identity.uid,
                error = %sign_out_error,
                "forced sign-out failed at provider",
            );
        }
        error
    }

    fn settle_signed_out(&mut self) {
        if matches!(self.state, AuthState::Unauthenticated) {
            tracing::debug!(target: "nexus.session", tab_id = %self.tab, "already signed out");
        }
        self.clear_record();
        self.transition(AuthState::Unauthenticated);
    }

    /// Settles inputs that arrived before the sign-in so they cannot be
    /// applied on top of its result.
    async fn begin_sign_in(&mut self) {
        self.process_pending().await;
        self.notice = None;
        self.rejected_uid = None;
    }

    async fn complete_sign_in(&mut self, identity: Identity) -> Result<AppRoute, AuthError> {
        self.identity = Some(identity.clone());
        let principal = self.reconcile(&identity).await?;
        self.bus.broadcast(CrossTabKind::Login);
        self.activity.claim();
        tracing::info!(target: "nexus.auth", tab_id = %self.tab, uid = %principal.uid, "signed in");
        Ok(principal.role.home_route())
    }

    fn sign_in_failed(&mut self, error: ProviderError) -> AuthError {
        tracing::warn!(target: "nexus.auth", tab_id = %self.tab, error = %error, "sign-in failed");
        self.surface(AuthError::from(error))
    }

    fn surface(&mut self, error: AuthError) -> AuthError {
        self.notice = Some(error.clone());
        error
    }

    fn write_record(&self, principal: &Principal) {
        if let Err(error) = self.sessions.write(self.tab.as_str(), Some(principal.clone())) {
            tracing::warn!(
                target: "nexus.storage",
                tab_id = %self.tab,
                error = %error,
                "failed to persist session snapshot",
            );
        }
    }

    fn clear_record(&self) {
        if let Err(error) = self.sessions.clear(self.tab.as_str()) {
            tracing::warn!(
                target: "nexus.storage",
                tab_id = %self.tab,
                error = %error,
                "failed to clear session snapshot",
            );
        }
    }

    fn transition(&mut self, next: AuthState) {
        if self.state != next {
            tracing::info!(
                target: "nexus.session",
                tab_id = %self.tab,
                from = self.state.as_str(),
                to = next.as_str(),
                "auth state changed",
            );
        }
        self.state = next;
    }
}
