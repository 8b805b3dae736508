use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Checks a user's password before a session is started
///
/// The monitoring core never calls this; user ids reach it already verified.
pub trait CredentialStore: Send + Sync {
    fn verify(&self, user: &str, password: &str) -> bool;

    fn authenticate(&self, user: &str, password: &str) -> Result<()> {
        if self.verify(user, password) {
            Ok(())
        } else {
            tracing::warn!(user = %user, "Rejected login");
            Err(Error::Authentication(user.to_string()))
        }
    }
}

/// Credentials held in memory as hex SHA-256 digests
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    digests: HashMap<String, String>,
}

impl StaticCredentialStore {
    /// `digests` maps user id to the hex SHA-256 of the password
    pub fn new(digests: HashMap<String, String>) -> Self {
        let digests = digests
            .into_iter()
            .map(|(user, digest)| (user, digest.trim().to_ascii_lowercase()))
            .collect();
        Self { digests }
    }

    pub fn with_user(mut self, user: &str, password: &str) -> Self {
        self.digests.insert(user.to_string(), hash_password(password));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

impl CredentialStore for StaticCredentialStore {
    fn verify(&self, user: &str, password: &str) -> bool {
        match self.digests.get(user) {
            Some(expected) => constant_time_eq(expected.as_bytes(), hash_password(password).as_bytes()),
            None => false,
        }
    }
}

/// Hex SHA-256 of a password, as stored in the `users` settings table
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
