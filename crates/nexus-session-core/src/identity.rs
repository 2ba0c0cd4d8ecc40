//! Contracts consumed from the hosted identity provider and document store.

use std::rc::Rc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::storage::Subscription;

pub type Document = serde_json::Map<String, serde_json::Value>;

/// Callback invoked with the provider's current identity, `None` when signed out.
pub type IdentityListener = Rc<dyn Fn(Option<Identity>)>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            display_name: None,
            photo_url: None,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub merge: bool,
}

impl SetOptions {
    pub const MERGE: Self = Self { merge: true };
    pub const REPLACE: Self = Self { merge: false };
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid_credentials")]
    InvalidCredentials,
    #[error("too_many_requests")]
    TooManyRequests,
    #[error("popup_closed_by_user")]
    PopupDismissed,
    #[error("popup_blocked")]
    PopupBlocked,
    #[error("unauthorized_domain")]
    UnauthorizedDomain,
    #[error("invalid_action_code")]
    InvalidActionCode,
    #[error("expired_action_code")]
    ExpiredActionCode,
    #[error("weak_password")]
    WeakPassword,
    #[error("provider_network_failed:{message}")]
    Network { message: String },
    #[error("provider_error:{code}:{message}")]
    Other { code: String, message: String },
}

impl ProviderError {
    /// Translates a raw provider error code into the closed set above.
    #[must_use]
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code.trim() {
            "auth/user-not-found" | "auth/wrong-password" | "auth/invalid-credential"
            | "auth/invalid-email" => Self::InvalidCredentials,
            "auth/too-many-requests" => Self::TooManyRequests,
            "auth/popup-closed-by-user" | "auth/cancelled-popup-request" => Self::PopupDismissed,
            "auth/popup-blocked" => Self::PopupBlocked,
            "auth/unauthorized-domain" => Self::UnauthorizedDomain,
            "auth/invalid-action-code" => Self::InvalidActionCode,
            "auth/expired-action-code" => Self::ExpiredActionCode,
            "auth/weak-password" => Self::WeakPassword,
            "auth/network-request-failed" | "auth/timeout" => Self::Network { message },
            other => Self::Other {
                code: other.to_string(),
                message,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document_store_unavailable:{message}")]
    Unavailable { message: String },
    #[error("document_store_permission_denied:{path}")]
    PermissionDenied { path: String },
    #[error("document_store_not_found:{path}")]
    NotFound { path: String },
    #[error("document_store_failed:{message}")]
    Other { message: String },
}

#[async_trait(?Send)]
pub trait IdentityProvider {
    /// Registers `listener` for auth-state changes. The provider reports the
    /// current identity once shortly after subscription, then on every change.
    fn subscribe_auth_state(&self, listener: IdentityListener) -> Subscription;

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, ProviderError>;
    async fn sign_in_interactive(&self) -> Result<Identity, ProviderError>;
    async fn sign_out(&self) -> Result<(), ProviderError>;
    async fn send_password_reset(&self, email: &str) -> Result<(), ProviderError>;
    /// Checks a reset code and returns the email it was issued for.
    async fn verify_password_reset_code(&self, code: &str) -> Result<String, ProviderError>;
    async fn confirm_password_reset(
        &self,
        code: &str,
        new_password: &str,
    ) -> Result<(), ProviderError>;
}

#[async_trait(?Send)]
pub trait DocumentStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError>;
    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
        options: SetOptions,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_codes_map_to_closed_set() {
        assert_eq!(
            ProviderError::from_code("auth/wrong-password", "bad"),
            ProviderError::InvalidCredentials
        );
        assert_eq!(
            ProviderError::from_code("auth/user-not-found", ""),
            ProviderError::InvalidCredentials
        );
        assert_eq!(
            ProviderError::from_code("auth/too-many-requests", ""),
            ProviderError::TooManyRequests
        );
        assert_eq!(
            ProviderError::from_code("auth/popup-closed-by-user", ""),
            ProviderError::PopupDismissed
        );
        assert_eq!(
            ProviderError::from_code("auth/network-request-failed", "offline"),
            ProviderError::Network {
                message: "offline".to_string()
            }
        );
    }

    #[test]
    fn unknown_provider_codes_are_preserved_for_logs() {
        let error = ProviderError::from_code("auth/quota-exceeded", "slow down");
        assert_eq!(
            error.to_string(),
            "provider_error:auth/quota-exceeded:slow down"
        );
    }
}
