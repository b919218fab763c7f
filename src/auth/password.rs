/// Credential Hasher
///
/// One-way, salted bcrypt hashing. Verification goes through bcrypt's own
/// routine; hashes are never compared as strings.

use bcrypt::{hash, verify};
use rand::Rng;

use crate::error::AppError;

/// bcrypt work factor
pub const HASH_COST: u32 = 10;

/// Hash a plaintext password
///
/// # Errors
/// Returns an internal error if bcrypt fails (e.g. the RNG is unavailable)
pub fn hash_password(password: &str) -> Result<String, AppError> {
    hash(password, HASH_COST)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a plaintext password against a stored hash
///
/// A malformed hash is reported as a mismatch, so callers cannot tell the two apart.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match verify(password, password_hash) {
        Ok(matches) => matches,
        Err(e) => {
            tracing::debug!("Password verification error: {}", e);
            false
        }
    }
}

const GENERATED_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*";

/// Random password handed out once when an admin creates a user without one.
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| GENERATED_CHARSET[rng.gen_range(0..GENERATED_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password() {
        let password = "Secret123!";
        let hash = hash_password(password).expect("Failed to hash password");

        assert_ne!(password, hash);
        assert!(hash.starts_with("$2"));
        assert!(hash.contains("$10$"));
    }

    #[test]
    fn test_hash_is_salted() {
        let a = hash_password("Secret123!").unwrap();
        let b = hash_password("Secret123!").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_password() {
        let hash = hash_password("Secret123!").expect("Failed to hash password");
        assert!(verify_password("Secret123!", &hash));
    }

    #[test]
    fn test_verify_wrong_password() {
        let hash = hash_password("Secret123!").expect("Failed to hash password");
        assert!(!verify_password("Secret123?", &hash));
    }

    #[test]
    fn test_malformed_hash_is_a_mismatch() {
        assert!(!verify_password("Secret123!", "not-a-bcrypt-hash"));
        assert!(!verify_password("Secret123!", ""));
    }

    #[test]
    fn test_generated_password() {
        let password = generate_password(12);
        assert_eq!(password.chars().count(), 12);
        assert!(password.bytes().all(|b| GENERATED_CHARSET.contains(&b)));
        assert_ne!(password, generate_password(12));
    }
}
