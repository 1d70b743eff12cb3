//! Webhook authentication
//!
//! Paystack signs the raw request body with HMAC-SHA512 keyed by the
//! account secret and sends the hex digest in `x-paystack-signature`.
//! Verification runs on the raw bytes, before any JSON parsing.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use subtle::ConstantTimeEq;

type HmacSha512 = Hmac<Sha512>;

fn digest(secret: &str, body: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Hex HMAC-SHA512 of `body`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    digest(secret, body).map(hex::encode).unwrap_or_default()
}

/// Constant-time check of a hex signature. An empty secret never verifies.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    let Some(expected) = digest(secret, body) else {
        return false;
    };
    expected.as_slice().ct_eq(provided.as_slice()).into()
}

/// Constant-time comparison for shared callback tokens.
pub fn tokens_match(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
