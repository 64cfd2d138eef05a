//! Session token generation.
//!
//! RunnerSession tokens are opaque, high-entropy bearer tokens rather than
//! self-contained signed claims: the Store is always consulted to resolve a
//! token back to its session (and to check `is_active`), so there is no
//! payload to authenticate client-side and no need for an HMAC.

use rand::RngCore;

/// Generate a fresh opaque session token: 32 random bytes, hex-encoded.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_64_hex_chars() {
        let token = generate_session_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_are_not_repeated() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_ne!(a, b);
    }
}
