//! Tab-scoped session coordination for the Nexus admin dashboard.
//!
//! Each browser tab gets its own identity and session snapshot, sign-in and
//! sign-out are mirrored across tabs through shared-storage broadcasts, and
//! protected pages are gated by role.

pub mod activity;
pub mod auth;
pub mod broadcast;
#[cfg(target_arch = "wasm32")]
pub mod browser;
pub mod config;
pub mod error;
pub mod identity;
pub mod machine;
pub mod memory;
pub mod profile;
pub mod recovery;
pub mod router;
pub mod session;
pub mod storage;
pub mod tab;

pub use activity::{ACTIVE_TAB_KEY, ActiveTabTracker, TabActivity};
pub use auth::{AuthInputError, normalize_credentials, normalize_email, normalize_verification_code};
pub use broadcast::{CrossTabBus, CrossTabEvent, CrossTabKind};
pub use config::{ConfigError, CoordinatorConfig};
pub use error::AuthError;
pub use identity::{
    Credentials, Document, DocumentStore, Identity, IdentityProvider, ProviderError, SetOptions,
    StoreError,
};
pub use machine::{AuthState, CoordinatorInput, SessionCoordinator, TabContext};
pub use profile::{PictureUpload, Principal, Profile, ProfileUpdate, Role};
pub use recovery::{PasswordRecovery, validate_new_password};
pub use router::{
    AppRoute, GuardDecision, GuardView, RouteGuard, authorize, authorize_for_tab, role_home_of,
};
pub use session::{SessionRecord, SessionStore};
pub use storage::{KeyValueStorage, SharedStorage, StorageChange, StorageError, Subscription};
pub use tab::{TabIdentity, allocate_tab_identity};
