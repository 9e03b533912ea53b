//! # Identity Module
//!
//! Who the current user is, and how users are named.
//!
//! Authentication and account issuance belong to the database provider; this
//! module only carries the resulting ids around.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           IDENTITY TYPES                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  UserId     "u1"                     opaque, valid store key           │
//! │  User       { id, display_name, email }                                │
//! │  Session    { user_id }              the signed-in user               │
//! │                                                                         │
//! │  Ids are compared as raw strings. That ordering is what makes         │
//! │  conversation ids symmetric, so it must not be locale-aware.          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::path::validate_key;

/// Opaque user identifier issued by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Wrap `id`, checking it can be used as a store key.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_key(&id)?;
        Ok(Self(id))
    }

    /// The raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for UserId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// A user as known to the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// User id
    pub id: UserId,
    /// Name shown to friends
    pub display_name: String,
    /// Address used to find this user
    pub email: String,
}

impl User {
    /// Create a user record.
    pub fn new(id: UserId, display_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            email: email.into(),
        }
    }
}

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    user_id: UserId,
}

impl Session {
    /// Session for an already-authenticated user.
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    /// Current user id.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Whether `id` is the current user.
    pub fn is_self(&self, id: &str) -> bool {
        self.user_id.as_str() == id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_validation() {
        assert!(UserId::new("u1").is_ok());
        assert!(UserId::new("").is_err());
        assert!(UserId::new("a/b").is_err());
        assert!("has.dot".parse::<UserId>().is_err());
    }

    #[test]
    fn test_user_id_orders_by_raw_string() {
        let upper = UserId::new("Zed").unwrap();
        let lower = UserId::new("amy").unwrap();
        // Uppercase sorts before lowercase in byte order.
        assert!(upper < lower);
    }

    #[test]
    fn test_user_id_serde() {
        let id: UserId = serde_json::from_str("\"u1\"").unwrap();
        assert_eq!(id.as_str(), "u1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"u1\"");
        assert!(serde_json::from_str::<UserId>("\"a#b\"").is_err());
    }

    #[test]
    fn test_session() {
        let session = Session::new(UserId::new("u1").unwrap());
        assert!(session.is_self("u1"));
        assert!(!session.is_self("u2"));
        assert_eq!(session.user_id().to_string(), "u1");
    }
}
