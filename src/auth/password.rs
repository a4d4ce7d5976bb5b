use anyhow::anyhow;
use argon2::{
    password_hash::{Error as HashError, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;

fn hash(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow!("argon2 hash: {e}"))
}

/// `Ok(false)` only for a wrong password. A stored hash that does not parse
/// or cannot be checked is an error, not a failed login.
fn verify(plain: &str, stored: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(stored).map_err(|e| anyhow!("stored password hash: {e}"))?;
    match Argon2::default().verify_password(plain.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(HashError::Password) => Ok(false),
        Err(e) => Err(anyhow!("argon2 verify: {e}")),
    }
}

/// Argon2 is CPU bound; keep it off the async workers.
pub async fn hash_password_async(plain: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash(&plain)).await?
}

pub async fn verify_password_async(plain: String, stored: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || verify(&plain, &stored)).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_password_verifies_and_others_do_not() {
        let stored = hash_password_async("Secret123".into()).await.unwrap();
        assert!(stored.starts_with("$argon2"));
        assert!(!stored.contains("Secret123"));

        assert!(verify_password_async("Secret123".into(), stored.clone()).await.unwrap());
        assert!(!verify_password_async("secret123".into(), stored).await.unwrap());
    }

    #[test]
    fn same_password_gets_a_fresh_salt() {
        assert_ne!(hash("Secret123").unwrap(), hash("Secret123").unwrap());
    }

    #[tokio::test]
    async fn corrupt_stored_hash_is_an_error() {
        let err = verify_password_async("anything".into(), "not-a-valid-hash".into())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("stored password hash"));
    }
}
