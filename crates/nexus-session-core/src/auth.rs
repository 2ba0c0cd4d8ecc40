use crate::identity::Credentials;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const RESET_CODE_DIGITS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthInputError {
    #[error("Please enter your email address.")]
    EmptyEmail,
    #[error("Please enter a valid email address.")]
    InvalidEmail,
    #[error("Please enter your password.")]
    EmptyPassword,
    #[error("Please enter the verification code.")]
    EmptyVerificationCode,
    #[error("Verification code must contain letters or digits.")]
    InvalidVerificationCode,
}

pub fn normalize_email(raw: &str) -> Result<String, AuthInputError> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(AuthInputError::EmptyEmail);
    }
    let Some((local, domain)) = normalized.split_once('@') else {
        return Err(AuthInputError::InvalidEmail);
    };
    if local.is_empty() || domain.is_empty() || normalized.chars().any(char::is_whitespace) {
        return Err(AuthInputError::InvalidEmail);
    }
    Ok(normalized)
}

/// Extracts a reset code from pasted input.
///
/// Six digits anywhere in the input win (the emailed code is often pasted
/// with spaces or punctuation); otherwise the alphanumeric characters are
/// kept, which covers provider-issued action codes.
pub fn normalize_verification_code(raw: &str) -> Result<String, AuthInputError> {
    let collapsed = raw.split_whitespace().collect::<String>();
    if collapsed.is_empty() {
        return Err(AuthInputError::EmptyVerificationCode);
    }

    let digits_only = collapsed
        .chars()
        .filter(|ch| ch.is_ascii_digit())
        .collect::<String>();
    if digits_only.len() == RESET_CODE_DIGITS {
        return Ok(digits_only);
    }

    let alnum = collapsed
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .collect::<String>();
    if alnum.is_empty() {
        return Err(AuthInputError::InvalidVerificationCode);
    }

    Ok(alnum)
}

pub fn normalize_credentials(email: &str, password: &str) -> Result<Credentials, AuthInputError> {
    let email = normalize_email(email)?;
    if password.is_empty() {
        return Err(AuthInputError::EmptyPassword);
    }
    Ok(Credentials {
        email,
        password: password.to_string(),
    })
}
