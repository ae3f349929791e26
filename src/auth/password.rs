use super::AuthError;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 8;

/// At least eight characters with an uppercase letter, a lowercase letter,
/// a digit and a special character.
pub fn check_strength(password: &str) -> Result<(), AuthError> {
    let strong = password.chars().count() >= MIN_PASSWORD_LEN
        && password.chars().any(|c| c.is_uppercase())
        && password.chars().any(|c| c.is_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| !c.is_alphanumeric());

    if strong {
        Ok(())
    } else {
        Err(AuthError::password_too_weak())
    }
}

/// Argon2id PHC string for `password` with a fresh random salt
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| AuthError::server_error(format!("Failed to create salt: {}", e)))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::server_error(format!("Failed to hash password: {}", e)))
}

/// False for a wrong password and for a malformed stored hash
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// `hash_password` on the blocking pool
pub async fn hash_password_blocking(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AuthError::server_error(format!("Password hashing task failed: {}", e)))?
}

pub async fn verify_password_blocking(password: String, stored_hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strength_rule() {
        assert!(check_strength("Str0ng!pass").is_ok());

        for weak in ["Sh0rt!", "alllower1!", "ALLUPPER1!", "NoDigits!!", "NoSpecial12"] {
            let err = check_strength(weak).unwrap_err();
            assert_eq!(err.code().as_str(), "PASSWORD_TOO_WEAK", "{}", weak);
        }
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("Str0ng!pass").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("Str0ng!pass", &hash));
        assert!(!verify_password("Str0ng!pasS", &hash));
        assert!(!verify_password("Str0ng!pass", "not-a-phc-string"));

        let again = hash_password("Str0ng!pass").unwrap();
        assert_ne!(hash, again);
    }
}
