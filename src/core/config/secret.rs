use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Process-local signing key for development. Tokens issued against it stop
/// verifying after a restart, so strict mode refuses to run without `SECRET_KEY`.
pub(super) fn generate_ephemeral_secret_key() -> String {
    let mut bytes = [0u8; 64];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::generate_ephemeral_secret_key;

    #[test]
    fn generated_keys_are_unique_and_url_safe() {
        let first = generate_ephemeral_secret_key();
        let second = generate_ephemeral_secret_key();

        assert_ne!(first, second);
        assert_eq!(first.len(), 86);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
