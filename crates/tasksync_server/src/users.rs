//! Registered users.

use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct UserRecord {
    user_id: String,
    salt: [u8; 16],
    hash: [u8; 32],
}

/// Username to credential table. Passwords are stored as salted SHA-256.
#[derive(Debug, Default)]
pub struct UserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl UserStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `username`, returning the new user id.
    pub fn register(&self, username: &str, password: &str) -> ServerResult<String> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(ServerError::InvalidRequest(
                "username and password are required".into(),
            ));
        }
        let mut users = self.users.write();
        if users.contains_key(username) {
            return Err(ServerError::UserExists(username.to_string()));
        }
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let record = UserRecord {
            user_id: Uuid::new_v4().to_string(),
            salt,
            hash: hash_password(&salt, password),
        };
        let user_id = record.user_id.clone();
        users.insert(username.to_string(), record);
        Ok(user_id)
    }

    /// Checks a password, returning the user id.
    pub fn verify(&self, username: &str, password: &str) -> ServerResult<String> {
        let users = self.users.read();
        match users.get(username) {
            Some(record) if hash_password(&record.salt, password) == record.hash => {
                Ok(record.user_id.clone())
            }
            _ => Err(ServerError::NotAuthenticated("invalid credentials".into())),
        }
    }

    /// Number of registered users.
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    /// Returns true if nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

fn hash_password(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_verify() {
        let users = UserStore::new();
        let id = users.register("alice", "secret").unwrap();
        assert_eq!(users.verify("alice", "secret").unwrap(), id);
        assert!(users.verify("alice", "wrong").is_err());
        assert!(users.verify("bob", "secret").is_err());
        assert_eq!(users.len(), 1);
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let users = UserStore::new();
        users.register("alice", "a").unwrap();
        let err = users.register("alice", "b").unwrap_err();
        assert_eq!(err.status(), 409);
    }

    #[test]
    fn empty_credentials_are_rejected() {
        let users = UserStore::new();
        assert_eq!(users.register("", "pw").unwrap_err().status(), 400);
        assert_eq!(users.register("alice", "").unwrap_err().status(), 400);
        assert!(users.is_empty());
    }
}
