// common/src/token.rs
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

/// Generate a URL- and header-safe token carrying at least `min_bytes`
/// bytes of entropy from the operating system's CSPRNG.
///
/// Each call draws fresh randomness; two tokens never share a seed.
pub fn generate_secure_token(min_bytes: usize) -> String {
    let mut bytes = Zeroizing::new(vec![0u8; min_bytes]);
    OsRng.fill_bytes(&mut bytes);
    base64::encode_config(&*bytes, base64::URL_SAFE_NO_PAD)
}

/// Passphrase protecting the transient key store
pub fn generate_key_store_passphrase(min_bytes: usize) -> Zeroizing<String> {
    Zeroizing::new(generate_secure_token(min_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secure_token_length() {
        // 32 bytes of base64url without padding is 43 characters
        let token = generate_secure_token(32);
        assert_eq!(token.len(), 43);
    }

    #[test]
    fn test_token_is_url_and_header_safe() {
        let token = generate_secure_token(48);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_tokens_are_unique() {
        let token = generate_secure_token(32);
        let token2 = generate_secure_token(32);
        assert_ne!(token, token2);
    }

    #[test]
    fn test_passphrase_independent_of_token() {
        let token = generate_secure_token(32);
        let passphrase = generate_key_store_passphrase(32);
        assert_ne!(token.as_str(), passphrase.as_str());
    }
}
