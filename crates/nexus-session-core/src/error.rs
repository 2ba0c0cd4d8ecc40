use crate::auth::AuthInputError;
use crate::identity::{ProviderError, StoreError};
use crate::profile::ProfileError;

/// Failures surfaced to the person using the dashboard.
///
/// `Display` renders the message shown in the UI. Raw provider codes only
/// appear in the `detail` of [`AuthError::Transient`], which is logged and
/// never displayed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Something went wrong. Please try again.")]
    Transient { detail: String },
    #[error("User account not properly configured.")]
    AccountNotConfigured,
    #[error("Your account has an invalid role configuration.")]
    InvalidRole,
    #[error("Invalid email or password.")]
    InvalidCredentials,
    #[error("Too many failed attempts. Please try again later.")]
    TooManyRequests,
    #[error("Popup was blocked. Please allow popups for this site.")]
    PopupBlocked,
    #[error("This domain is not authorized for Google Sign-In.")]
    UnauthorizedDomain,
    #[error("Invalid verification code. Please try again.")]
    InvalidResetCode,
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Password must be at least {min} characters long")]
    PasswordTooShort { min: usize },
    #[error("File size exceeds 1MB")]
    PictureTooLarge,
    #[error("You must be signed in to do that.")]
    NotSignedIn,
    #[error("{0}")]
    Input(#[from] AuthInputError),
}

impl AuthError {
    pub fn transient(detail: impl std::fmt::Display) -> Self {
        Self::Transient {
            detail: detail.to_string(),
        }
    }

    /// Transient failures leave the session untouched so the user can retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl From<ProviderError> for AuthError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::InvalidCredentials => Self::InvalidCredentials,
            ProviderError::TooManyRequests => Self::TooManyRequests,
            ProviderError::PopupBlocked => Self::PopupBlocked,
            ProviderError::UnauthorizedDomain => Self::UnauthorizedDomain,
            ProviderError::InvalidActionCode | ProviderError::ExpiredActionCode => {
                Self::InvalidResetCode
            }
            ProviderError::WeakPassword => Self::PasswordTooShort {
                min: crate::auth::MIN_PASSWORD_LEN,
            },
            other @ (ProviderError::PopupDismissed
            | ProviderError::Network { .. }
            | ProviderError::Other { .. }) => Self::transient(other),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(error: StoreError) -> Self {
        Self::transient(error)
    }
}

impl From<ProfileError> for AuthError {
    fn from(error: ProfileError) -> Self {
        match error {
            ProfileError::MissingRole => Self::AccountNotConfigured,
            ProfileError::UnknownRole { .. } => Self::InvalidRole,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_message_hides_provider_detail() {
        let error = AuthError::from(ProviderError::from_code(
            "auth/internal-error",
            "backend exploded",
        ));
        assert!(error.is_transient());
        let shown = error.to_string();
        assert!(!shown.contains("auth/"));
        assert!(!shown.contains("exploded"));
    }

    #[test]
    fn credential_failures_use_login_page_messages() {
        assert_eq!(
            AuthError::from(ProviderError::InvalidCredentials).to_string(),
            "Invalid email or password."
        );
        assert_eq!(
            AuthError::from(ProviderError::TooManyRequests).to_string(),
            "Too many failed attempts. Please try again later."
        );
    }

    #[test]
    fn profile_errors_map_to_configuration_messages() {
        assert_eq!(
            AuthError::from(ProfileError::MissingRole),
            AuthError::AccountNotConfigured
        );
        assert_eq!(
            AuthError::from(ProfileError::UnknownRole {
                raw: "guest".to_string()
            }),
            AuthError::InvalidRole
        );
    }
}
