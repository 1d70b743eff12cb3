//! Withdrawal PIN hashing (Argon2id, PHC string format)

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand::rngs::OsRng;

use super::error::WithdrawError;

pub const PIN_MIN_LEN: usize = 4;
pub const PIN_MAX_LEN: usize = 8;

pub fn validate_pin_format(pin: &str) -> Result<(), WithdrawError> {
    let len_ok = (PIN_MIN_LEN..=PIN_MAX_LEN).contains(&pin.len());
    if len_ok && pin.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(WithdrawError::InvalidPinFormat)
    }
}

pub fn hash_pin(pin: &str) -> Result<String, WithdrawError> {
    validate_pin_format(pin)?;
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| WithdrawError::Storage(format!("PIN hashing failed: {}", e)))
}

/// False for a wrong PIN and for a malformed stored hash.
pub fn verify_pin(pin: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(pin.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Stored PIN hash is malformed");
            false
        }
    }
}
