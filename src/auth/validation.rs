//! Input validation for logins, nicknames and passwords.
//!
//! Every value that may appear as a non-final protocol field is checked
//! here, so nothing the server echoes back can contain the separator.

use thiserror::Error;

use crate::protocol::SEPARATOR;

/// Maximum login length in characters.
pub const MAX_LOGIN_LENGTH: usize = 32;

/// Maximum nickname length in characters.
pub const MAX_NICKNAME_LENGTH: usize = 32;

/// Maximum password length in characters.
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Sentinel clients use for "everyone" in their contact list.
pub const BROADCAST_SENTINEL: &str = "ALL";

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Login is empty.
    #[error("login cannot be empty")]
    LoginEmpty,

    /// Login is too long.
    #[error("login must be at most {MAX_LOGIN_LENGTH} characters")]
    LoginTooLong,

    /// Login contains whitespace, control characters or the separator.
    #[error("login contains invalid characters")]
    LoginInvalidChars,

    /// Nickname is empty.
    #[error("nickname cannot be empty")]
    NicknameEmpty,

    /// Nickname is too long.
    #[error("nickname must be at most {MAX_NICKNAME_LENGTH} characters")]
    NicknameTooLong,

    /// Nickname contains control characters or the separator.
    #[error("nickname contains invalid characters")]
    NicknameInvalidChars,

    /// Nickname collides with the broadcast sentinel.
    #[error("this nickname is reserved")]
    NicknameReserved,

    /// Password is empty.
    #[error("password cannot be empty")]
    PasswordEmpty,

    /// Password is too long.
    #[error("password must be at most {MAX_PASSWORD_LENGTH} characters")]
    PasswordTooLong,

    /// Password contains control characters or the separator.
    #[error("password contains invalid characters")]
    PasswordInvalidChars,
}

/// Validate a login.
///
/// ```
/// use parley::auth::validation::validate_login;
///
/// assert!(validate_login("alice").is_ok());
/// assert!(validate_login("").is_err());
/// assert!(validate_login("a b").is_err());
/// ```
pub fn validate_login(login: &str) -> Result<(), ValidationError> {
    if login.is_empty() {
        return Err(ValidationError::LoginEmpty);
    }
    if login.chars().count() > MAX_LOGIN_LENGTH {
        return Err(ValidationError::LoginTooLong);
    }
    if login
        .chars()
        .any(|c| c == SEPARATOR || c.is_whitespace() || c.is_control())
    {
        return Err(ValidationError::LoginInvalidChars);
    }
    Ok(())
}

/// Validate a nickname.
///
/// Inner spaces are allowed; leading or trailing whitespace is not.
pub fn validate_nickname(nickname: &str) -> Result<(), ValidationError> {
    if nickname.trim().is_empty() {
        return Err(ValidationError::NicknameEmpty);
    }
    if nickname.chars().count() > MAX_NICKNAME_LENGTH {
        return Err(ValidationError::NicknameTooLong);
    }
    if nickname.trim() != nickname
        || nickname.chars().any(|c| c == SEPARATOR || c.is_control())
    {
        return Err(ValidationError::NicknameInvalidChars);
    }
    if nickname.eq_ignore_ascii_case(BROADCAST_SENTINEL) {
        return Err(ValidationError::NicknameReserved);
    }
    Ok(())
}

/// Validate a password.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::PasswordEmpty);
    }
    if password.chars().count() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::PasswordTooLong);
    }
    if password.chars().any(|c| c == SEPARATOR || c.is_control()) {
        return Err(ValidationError::PasswordInvalidChars);
    }
    Ok(())
}
