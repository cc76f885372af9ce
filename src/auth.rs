use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::UserRecord;
use argon2::password_hash::{
    rand_core::OsRng, Error as PasswordHashError, PasswordHash, PasswordHasher, PasswordVerifier,
    SaltString,
};
use argon2::Argon2;
use std::sync::Arc;

pub const PROTECTED_USER: &str = "admin";

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| AppError::Internal(format!("failed to hash password: {err}")))?;
    Ok(hash.to_string())
}

pub fn verify_password(expected_hash: &str, candidate: &str) -> AppResult<bool> {
    let parsed = PasswordHash::new(expected_hash)
        .map_err(|err| AppError::Internal(format!("invalid stored hash: {err}")))?;
    match Argon2::default().verify_password(candidate.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(PasswordHashError::Password) => Ok(false),
        Err(err) => Err(AppError::Internal(format!("failed to verify password: {err}"))),
    }
}

#[derive(Clone)]
pub struct UserManager {
    db: Arc<Database>,
}

impl UserManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn ensure_admin(&self, initial_password: &str) -> AppResult<bool> {
        if self.db.count_users()? > 0 {
            return Ok(false);
        }
        self.create(PROTECTED_USER, initial_password)?;
        tracing::info!(user = PROTECTED_USER, "seeded initial admin account");
        Ok(true)
    }

    pub fn authenticate(&self, username: &str, password: &str) -> AppResult<bool> {
        match self.db.user_password_hash(username)? {
            Some(hash) => verify_password(&hash, password),
            None => Ok(false),
        }
    }

    pub fn create(&self, username: &str, password: &str) -> AppResult<UserRecord> {
        if username.is_empty() {
            return Err(AppError::Config("username cannot be empty".to_string()));
        }
        let hash = hash_password(password)?;
        self.db.insert_user(username, &hash)
    }

    pub fn update(&self, username: &str, password: &str) -> AppResult<()> {
        if self.db.user_password_hash(username)?.is_none() {
            return Err(AppError::UserNotFound(username.to_string()));
        }
        let hash = hash_password(password)?;
        self.db.update_user_password(username, &hash)
    }

    pub fn remove(&self, username: &str) -> AppResult<()> {
        if username == PROTECTED_USER {
            return Err(AppError::ProtectedUser(username.to_string()));
        }
        self.db.delete_user(username)
    }

    pub fn list(&self) -> AppResult<Vec<UserRecord>> {
        self.db.list_users()
    }
}
