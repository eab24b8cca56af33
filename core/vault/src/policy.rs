//! Rules for choosing a new password.

use subtle::ConstantTimeEq;

use mediavault_common::{Error, Result};

/// Minimum password length in characters.
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Validate a newly chosen password and its confirmation.
///
/// Length counts Unicode scalar values for UTF-8 input and bytes otherwise.
///
/// # Errors
/// - `InvalidInput` if the password is empty, too short, or the
///   confirmation differs
pub fn validate_new_password(password: &[u8], confirmation: &[u8]) -> Result<()> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }

    let length = match std::str::from_utf8(password) {
        Ok(s) => s.chars().count(),
        Err(_) => password.len(),
    };
    if length < MIN_PASSWORD_LENGTH {
        return Err(Error::InvalidInput(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    if !bool::from(password.ct_eq(confirmation)) {
        return Err(Error::InvalidInput("Passwords do not match".to_string()));
    }

    Ok(())
}
