//! Opaque random token generation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// Number of random bytes in session IDs, CSRF states and API secrets.
pub const TOKEN_BYTES: usize = 32;

/// Source of opaque high-entropy tokens.
///
/// Injected into the session service and CSRF store so tests can produce
/// predictable values.
pub trait TokenSource: Send + Sync {
    /// Returns a fresh token.
    fn generate(&self) -> String;
}

/// Operating-system randomness, URL-safe base64 without padding.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsTokenSource;

impl TokenSource for OsTokenSource {
    fn generate(&self) -> String {
        random_token()
    }
}

/// Returns `TOKEN_BYTES` of OS randomness encoded as URL-safe base64.
#[must_use]
pub fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
