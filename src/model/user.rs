use std::ops::{Deref, DerefMut};

use argon2::Config as Argon2Config;
use serde::{Deserialize, Serialize};

use crate::model::{auth::Rights, mongodb::Id};

/// Core user data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCore {
    /// The user's unique association member number.
    pub member_number: String,
    pub first_names: String,
    pub last_names: String,
    pub email: String,
    pub password_hash: String,
    pub role: Rights,
}

impl UserCore {
    /// Create a new user, hashing their password.
    pub fn new(
        member_number: String,
        first_names: String,
        last_names: String,
        email: String,
        password: &str,
        role: Rights,
    ) -> Self {
        let salt: [u8; 16] = rand::random();
        let password_hash =
            argon2::hash_encoded(password.as_bytes(), &salt, &Argon2Config::default())
                .unwrap(); // Safe because the default `Config` is valid.
        Self {
            member_number,
            first_names,
            last_names,
            email,
            password_hash,
            role,
        }
    }

    /// Check whether the given password is correct.
    pub fn verify_password<T: AsRef<[u8]>>(&self, password: T) -> bool {
        // Unwrap safe because the only way to create a UserCore is via
        // `new`, so the hash is always well-formed.
        argon2::verify_encoded(&self.password_hash, password.as_ref()).unwrap()
    }
}

/// A user without an ID.
pub type NewUser = UserCore;

/// A user from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub user: UserCore,
}

impl Deref for User {
    type Target = UserCore;

    fn deref(&self) -> &Self::Target {
        &self.user
    }
}

impl DerefMut for User {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.user
    }
}
