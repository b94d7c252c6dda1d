//! Verification code, recovery code, and opaque token generation
//!
//! Three entropy classes, all drawn from the thread-local CSPRNG:
//!
//! - six-digit display codes, uniform over [100000, 999999]
//! - ten-character recovery codes from an uppercase alphanumeric
//!   alphabet, grouped `XXXXX-XXXXX`
//! - opaque email-link tokens: 32 random bytes, base64url raw value,
//!   sha256 hex digest for storage. The raw value goes to the user once;
//!   only the digest is ever persisted.
//!
//! Recovery codes are additionally hashed with argon2 for at-rest
//! storage, keeping a 3-character hint for display.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::ApiError;

const RECOVERY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const RECOVERY_CODE_LEN: usize = 10;
const OPAQUE_TOKEN_BYTES: usize = 32;

/// A freshly generated opaque token: the raw value for the email, the
/// digest for the database.
#[derive(Debug, Clone)]
pub struct GeneratedToken {
    pub raw: String,
    pub hash: String,
}

/// Six-digit display code, uniform over [100000, 999999].
pub fn generate_verification_code() -> String {
    let mut rng = rand::rng();
    rng.random_range(100_000..=999_999u32).to_string()
}

/// Ten-character recovery code, hyphen after the fifth character.
pub fn generate_recovery_code() -> String {
    let mut rng = rand::rng();
    let chars: Vec<u8> = (0..RECOVERY_CODE_LEN)
        .map(|_| RECOVERY_ALPHABET[rng.random_range(0..RECOVERY_ALPHABET.len())])
        .collect();
    format!(
        "{}-{}",
        String::from_utf8_lossy(&chars[..5]),
        String::from_utf8_lossy(&chars[5..])
    )
}

/// Display hint stored alongside the hash: the last three characters.
pub fn recovery_code_hint(code: &str) -> String {
    code.chars().rev().take(3).collect::<Vec<_>>().into_iter().rev().collect()
}

/// Accept user-typed recovery codes in any case, with or without the
/// hyphen.
pub fn normalize_recovery_code(input: &str) -> String {
    let cleaned: String = input
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase();
    if cleaned.len() == RECOVERY_CODE_LEN {
        format!("{}-{}", &cleaned[..5], &cleaned[5..])
    } else {
        cleaned
    }
}

/// High-entropy opaque token for email links.
pub fn generate_opaque_token() -> GeneratedToken {
    let mut rng = rand::rng();
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    rng.fill(&mut bytes[..]);
    let raw = URL_SAFE_NO_PAD.encode(bytes);
    let hash = hash_token(&raw);
    GeneratedToken { raw, hash }
}

/// sha256 hex digest of a raw token, the only form ever persisted.
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// argon2 hash of a recovery code for at-rest storage.
pub fn hash_recovery_code(code: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(code.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| {
            tracing::error!(error = %e, "failed to hash recovery code");
            ApiError::Internal
        })
}

/// Constant-time verification of a recovery code against its stored hash.
pub fn verify_recovery_code(code: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(normalize_recovery_code(code).as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_code_is_six_digits_in_range() {
        for _ in 0..100 {
            let code = generate_verification_code();
            assert_eq!(code.len(), 6);
            let n: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&n));
        }
    }

    #[test]
    fn recovery_code_matches_display_format() {
        for _ in 0..50 {
            let code = generate_recovery_code();
            assert_eq!(code.len(), 11);
            let (head, tail) = code.split_once('-').unwrap();
            assert_eq!(head.len(), 5);
            assert_eq!(tail.len(), 5);
            assert!(code
                .chars()
                .all(|c| c == '-' || c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn hint_is_last_three_characters() {
        assert_eq!(recovery_code_hint("ABCDE-FGHIJ"), "HIJ");
    }

    #[test]
    fn normalize_accepts_case_and_hyphen_variants() {
        assert_eq!(normalize_recovery_code("abcde-fghij"), "ABCDE-FGHIJ");
        assert_eq!(normalize_recovery_code("ABCDEFGHIJ"), "ABCDE-FGHIJ");
        assert_eq!(normalize_recovery_code(" abcdefghij "), "ABCDE-FGHIJ");
    }

    #[test]
    fn opaque_token_raw_is_never_its_stored_hash() {
        let token = generate_opaque_token();
        assert_ne!(token.raw, token.hash);
        assert_eq!(token.hash.len(), 64);
        assert_eq!(hash_token(&token.raw), token.hash);
    }

    #[test]
    fn opaque_tokens_are_unique() {
        let a = generate_opaque_token();
        let b = generate_opaque_token();
        assert_ne!(a.raw, b.raw);
    }

    #[test]
    fn recovery_code_hash_round_trips() {
        let code = generate_recovery_code();
        let hash = hash_recovery_code(&code).unwrap();
        assert!(verify_recovery_code(&code, &hash));
        assert!(verify_recovery_code(&code.to_lowercase(), &hash));
        assert!(verify_recovery_code(&code.replace('-', ""), &hash));
        assert!(!verify_recovery_code("ZZZZZ-ZZZZZ", &hash));
    }

    #[test]
    fn recovery_hash_is_not_plaintext() {
        let code = generate_recovery_code();
        let hash = hash_recovery_code(&code).unwrap();
        assert!(!hash.contains(&code));
        assert!(hash.starts_with("$argon2"));
    }
}
