//! Log-safe identifiers for personal data.

use sha2::{Digest, Sha256};

const EMAIL_HASH_SALT: &[u8] = b"calsync-account-email-salt";

/// Stable, non-reversible stand-in for an account e-mail in log fields.
///
/// Case and surrounding whitespace are ignored so the same mailbox always
/// hashes to the same value.
pub fn redact_email(email: &str) -> String {
    let normalized = email.trim().to_ascii_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(EMAIL_HASH_SALT);
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    format!("email_hash={}", hex::encode(&digest[..8]))
}
