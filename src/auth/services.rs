use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use regex::Regex;
use tracing::{info, warn};

use super::{
    repo::{UserRepoError, UserRepository},
    repo_types::User,
};
use crate::error::ApiError;

const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("argon2 hash_password: {e}"))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("argon2 parse hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

pub async fn sign_up(
    users: &dyn UserRepository,
    name: &str,
    email: &str,
    password: &str,
) -> Result<User, ApiError> {
    let name = name.trim();
    let email = normalize_email(email);

    if name.is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::bad_request("Invalid email"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("Password too short"));
    }

    if users
        .find_by_email(&email)
        .await
        .map_err(ApiError::internal)?
        .is_some()
    {
        warn!(email = %email, "email already registered");
        return Err(ApiError::bad_request("User already exists"));
    }

    // hashing is CPU-bound
    let plain = password.to_string();
    let hash = tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::Internal)?;

    let user = match users.create(name, &email, &hash).await {
        Ok(u) => u,
        Err(UserRepoError::EmailTaken) => return Err(ApiError::bad_request("User already exists")),
        Err(e) => return Err(ApiError::internal(e)),
    };
    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user)
}

pub async fn log_in(
    users: &dyn UserRepository,
    email: &str,
    password: &str,
) -> Result<User, ApiError> {
    let invalid = || ApiError::bad_request("Invalid credentials");
    let email = normalize_email(email);

    let Some(user) = users
        .find_by_email(&email)
        .await
        .map_err(ApiError::internal)?
    else {
        warn!(email = %email, "login unknown email");
        return Err(invalid());
    };

    let plain = password.to_string();
    let hash = user.password_hash.clone();
    let ok = tokio::task::spawn_blocking(move || verify_password(&plain, &hash))
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::Internal)?;

    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(invalid());
    }
    info!(user_id = %user.id, "user logged in");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::InMemoryUserRepository;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.de"));
        assert_eq!(normalize_email("  Foo@Example.COM "), "foo@example.com");
    }

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_password("Secur3P@ssw0rd!").expect("hashing should succeed");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("Secur3P@ssw0rd!", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
        assert!(verify_password("anything", "not-a-valid-hash").is_err());
    }

    #[test]
    fn same_password_gets_different_salts() {
        assert_ne!(
            hash_password("correct-horse").unwrap(),
            hash_password("correct-horse").unwrap()
        );
    }

    #[tokio::test]
    async fn sign_up_then_log_in() {
        let users = InMemoryUserRepository::default();
        let user = sign_up(&users, "Asha", " Asha@Example.com", "longenough")
            .await
            .unwrap();
        assert_eq!(user.email, "asha@example.com");
        assert_ne!(user.password_hash, "longenough");

        let again = log_in(&users, "asha@example.com", "longenough").await.unwrap();
        assert_eq!(again.id, user.id);

        let err = log_in(&users, "asha@example.com", "wrong-pass").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(m) if m == "Invalid credentials"));
        let err = log_in(&users, "ghost@example.com", "longenough").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(m) if m == "Invalid credentials"));
    }

    #[tokio::test]
    async fn sign_up_validates_input() {
        let users = InMemoryUserRepository::default();
        assert!(sign_up(&users, "A", "bad-email", "longenough").await.is_err());
        assert!(sign_up(&users, "A", "a@b.co", "short").await.is_err());
        assert!(sign_up(&users, " ", "a@b.co", "longenough").await.is_err());

        sign_up(&users, "A", "a@b.co", "longenough").await.unwrap();
        let err = sign_up(&users, "B", "A@b.co", "longenough").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(m) if m == "User already exists"));
    }
}
