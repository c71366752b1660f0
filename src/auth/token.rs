use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Generate a refresh token. Returns `(raw_token, sha256_hash)`.
/// Format: `atr_` + 32 random bytes as hex.
pub fn generate_refresh_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    let raw = format!("atr_{}", hex::encode(bytes));
    let hash = hash_token(&raw);
    (raw, hash)
}

/// Invitation tokens: 256 random bits, URL-safe base64, no padding.
pub fn generate_invitation_token() -> String {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// One-shot machine-credential passwords.
pub fn generate_credential_password() -> String {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hash of a token string, returned as lowercase hex.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
