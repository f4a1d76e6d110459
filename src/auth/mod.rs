//! Authentication module for parley.
//!
//! Password hashing and input validation used by the user directory.

mod password;
pub mod validation;

pub use password::{verify_password, PasswordError, PasswordHasher};
pub use validation::{validate_login, validate_nickname, validate_password, ValidationError};
