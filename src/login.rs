#![cfg(not(tarpaulin_include))]

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use lazy_static::lazy_static;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use uuid::Uuid;

/// User data structure representing a registered account
///
/// The `id` is what the row store uses as the owner key; the username is
/// only used to sign in.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// Stable owner id
    pub id: String,

    /// Username (unique, used for login)
    pub username: String,

    /// Email address
    pub email: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,
}

/// Credential data for login and registration
#[derive(Debug, Serialize, Deserialize)]
pub struct UserCredentials {
    /// Username for login/registration
    pub username: String,

    /// Email address (optional for login, required for registration)
    #[serde(default)]
    pub email: String,

    /// Password in plaintext (only transmitted, never stored)
    pub password: String,
}

/// User session information
#[derive(Debug, Clone)]
pub struct Session {
    /// Owner id of the signed-in user
    pub user_id: String,

    /// Time when the session expires
    pub expires_at: SystemTime,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Username, email and password cannot be empty")]
    MissingFields,

    #[error("Username already exists")]
    UsernameTaken,

    #[error("Email address is already registered")]
    EmailTaken,

    #[error("Password hashing failed")]
    Hashing,

    #[error("User database error: {0}")]
    Database(String),
}

// Global sessions storage
//
// Stores all active user sessions in a thread-safe map.
lazy_static! {
    static ref SESSIONS: RwLock<HashMap<String, Session>> = RwLock::new(HashMap::new());
}

const USERS_FILE: &str = "users.json";
const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds

/// File-backed user database
///
/// All users live in a single `users.json` map keyed by username inside
/// the configured data directory.
#[derive(Debug)]
pub struct UserDirectory {
    path: PathBuf,
    // Serializes read-modify-write cycles on the users file.
    write_lock: Mutex<()>,
}

impl UserDirectory {
    /// Open the user database, creating the directory and an empty users
    /// file if they don't exist.
    ///
    /// # Arguments
    /// * `dir` - Data directory that holds `users.json`
    ///
    /// # Errors
    /// * Returns an error if the directory or file cannot be created
    pub fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref();
        if !dir.exists() {
            create_dir_all(dir)?;
        }
        let path = dir.join(USERS_FILE);
        if !path.exists() {
            let mut file = File::create(&path)?;
            file.write_all(b"{}")?;
        }
        Ok(UserDirectory {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Get all registered users
    ///
    /// # Returns
    /// * Map of usernames to user records
    ///
    /// # Errors
    /// * Returns an error if the users file cannot be read or parsed
    pub fn get_users(&self) -> Result<HashMap<String, User>, AuthError> {
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| AuthError::Database(format!("failed to read users file: {}", e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| AuthError::Database(format!("failed to parse users data: {}", e)))
    }

    fn save_users(&self, users: &HashMap<String, User>) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(users)
            .map_err(|e| AuthError::Database(e.to_string()))?;
        fs::write(&self.path, json)
            .map_err(|e| AuthError::Database(format!("failed to write users file: {}", e)))
    }

    /// Register a new user
    ///
    /// Creates a new account with a fresh owner id. The password is hashed
    /// before storage.
    ///
    /// # Arguments
    /// * `username` - Unique username for the new account
    /// * `email` - Email address for the user
    /// * `password` - Plain text password (will be hashed)
    ///
    /// # Returns
    /// * The stored user record
    ///
    /// # Errors
    /// * Returns an error if any field is empty
    /// * Returns an error if the username or email is already in use
    pub fn register_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        if username.is_empty() || password.is_empty() || email.is_empty() {
            return Err(AuthError::MissingFields);
        }

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut users = self.get_users()?;
        if users.contains_key(username) {
            return Err(AuthError::UsernameTaken);
        }
        if users.values().any(|user| user.email == email) {
            return Err(AuthError::EmailTaken);
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password)?,
        };
        users.insert(username.to_string(), user.clone());
        self.save_users(&users)?;
        info!("registered user {}", username);
        Ok(user)
    }

    /// Verify user credentials
    ///
    /// # Returns
    /// * `Some(user)` when the username exists and the password matches
    ///
    /// # Errors
    /// * Returns an error if there is a problem accessing the user database
    pub fn verify_user(&self, username: &str, password: &str) -> Result<Option<User>, AuthError> {
        let users = self.get_users()?;
        Ok(users
            .get(username)
            .filter(|user| verify_password(password, &user.password_hash))
            .cloned())
    }
}

/// Hash a password using Argon2
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::Hashing)
}

/// Verify a password against a stored hash
///
/// A malformed stored hash counts as a mismatch.
fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        warn!("stored password hash is malformed");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Create a new user session
///
/// # Arguments
/// * `user_id` - Owner id of the authenticated user
///
/// # Returns
/// * A unique session ID
pub fn create_session(user_id: &str) -> String {
    let session_id = Uuid::new_v4().to_string();
    let expires_at = SystemTime::now() + Duration::from_secs(SESSION_DURATION);

    let session = Session {
        user_id: user_id.to_string(),
        expires_at,
    };

    let mut sessions = SESSIONS.write().unwrap_or_else(|e| e.into_inner());
    sessions.insert(session_id.clone(), session);

    session_id
}

/// Validate a session
///
/// # Returns
/// * The owner id for the session if it exists and has not expired
pub fn validate_session(session_id: &str) -> Option<String> {
    let sessions = SESSIONS.read().unwrap_or_else(|e| e.into_inner());
    sessions
        .get(session_id)
        .filter(|session| session.expires_at > SystemTime::now())
        .map(|session| session.user_id.clone())
}

/// End a session
pub fn end_session(session_id: &str) {
    let mut sessions = SESSIONS.write().unwrap_or_else(|e| e.into_inner());
    sessions.remove(session_id);
}
