//! Forgot-password, verify-code and reset-password pages.

use std::rc::Rc;

use crate::auth::{MIN_PASSWORD_LEN, normalize_email, normalize_verification_code};
use crate::error::AuthError;
use crate::identity::IdentityProvider;
use crate::router::AppRoute;

/// Checks a new password and its confirmation before it reaches the provider.
pub fn validate_new_password(password: &str, confirmation: &str) -> Result<(), AuthError> {
    if password != confirmation {
        return Err(AuthError::PasswordMismatch);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::PasswordTooShort {
            min: MIN_PASSWORD_LEN,
        });
    }
    Ok(())
}

pub struct PasswordRecovery<P> {
    provider: Rc<P>,
}

impl<P: IdentityProvider> PasswordRecovery<P> {
    pub fn new(provider: Rc<P>) -> Self {
        Self { provider }
    }

    /// Sends the reset email and returns the page that asks for the code.
    pub async fn request_reset(&self, email: &str) -> Result<AppRoute, AuthError> {
        let email = normalize_email(email)?;
        self.provider
            .send_password_reset(&email)
            .await
            .map_err(|error| {
                tracing::warn!(target: "nexus.auth", error = %error, "password reset request failed");
                AuthError::from(error)
            })?;
        tracing::info!(target: "nexus.auth", "password reset requested");
        Ok(AppRoute::VerifyCode)
    }

    /// Validates the emailed code. Returns the normalized code and the email
    /// it belongs to.
    pub async fn verify_code(&self, raw_code: &str) -> Result<(String, String), AuthError> {
        let code = normalize_verification_code(raw_code)?;
        let email = self
            .provider
            .verify_password_reset_code(&code)
            .await
            .map_err(|error| {
                tracing::debug!(target: "nexus.auth", error = %error, "reset code rejected");
                AuthError::from(error)
            })?;
        Ok((code, email))
    }

    /// Sets the new password and returns the login page.
    pub async fn confirm_reset(
        &self,
        raw_code: &str,
        password: &str,
        confirmation: &str,
    ) -> Result<AppRoute, AuthError> {
        let code = normalize_verification_code(raw_code)?;
        validate_new_password(password, confirmation)?;
        self.provider
            .confirm_password_reset(&code, password)
            .await
            .map_err(AuthError::from)?;
        tracing::info!(target: "nexus.auth", "password reset completed");
        Ok(AppRoute::Login)
    }
}
