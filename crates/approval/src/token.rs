use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;

/// Random bytes per token (256 bits).
const TOKEN_BYTES: usize = 32;

/// Generate a fresh bearer token.
///
/// The token travels in plaintext email, so it comes from the OS RNG and is
/// URL-safe base64 without padding to survive embedding in query strings.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
