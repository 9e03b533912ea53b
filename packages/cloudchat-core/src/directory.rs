//! User directory.
//!
//! Every user has a record at `users/{uid}` holding a display name and an
//! email address. Search uses an indexed equality query on `email`, so the
//! database needs `".indexOn": ["email"]` on `users`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Result;
use crate::identity::{User, UserId};
use crate::store::{path, MultiPathUpdate, RealtimeStore};

/// Field that search matches against.
pub const EMAIL_FIELD: &str = "email";

/// Stored form of a user. Friend edges live beside these fields and are
/// ignored here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Display name
    #[serde(default)]
    pub username: String,
    /// Email address
    #[serde(default)]
    pub email: String,
}

impl UserRecord {
    fn into_user(self, id: UserId) -> User {
        User::new(id, self.username, self.email)
    }
}

/// Read and register users.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn RealtimeStore>,
}

impl UserDirectory {
    /// Directory backed by `store`.
    pub fn new(store: Arc<dyn RealtimeStore>) -> Self {
        Self { store }
    }

    /// Write `user`'s name and email, leaving their friend edges alone.
    pub async fn register(&self, user: &User) -> Result<()> {
        let record = path::user(user.id.as_str())?;
        let update = MultiPathUpdate::new()
            .set(record.child("username")?, json!(user.display_name))
            .set(record.child(EMAIL_FIELD)?, json!(user.email));
        self.store.update(update).await?;

        tracing::info!(user = %user.id, "Registered user");
        Ok(())
    }

    /// Read one user, `None` if there is no record.
    pub async fn lookup(&self, id: &UserId) -> Result<Option<User>> {
        let snapshot = self.store.get(&path::user(id.as_str())?).await?;
        Ok(snapshot
            .deserialize::<UserRecord>()?
            .map(|record| record.into_user(id.clone())))
    }

    /// First user whose email equals `email` exactly, skipping `exclude`.
    ///
    /// Matching is case-sensitive. When several users share an address the
    /// one with the smallest id wins.
    pub async fn find_by_email(&self, email: &str, exclude: &UserId) -> Result<Option<User>> {
        let snapshot = self
            .store
            .query_equal(&path::users(), EMAIL_FIELD, email)
            .await?;

        for (uid, value) in snapshot.children() {
            if uid == exclude.as_str() {
                continue;
            }
            let record: UserRecord = match serde_json::from_value(value.clone()) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(user = uid, error = %e, "Skipping malformed user record");
                    continue;
                }
            };
            // The query is exact on the server, but check again so a lax
            // backend cannot widen the match.
            if record.email != email {
                continue;
            }
            return Ok(Some(record.into_user(UserId::new(uid)?)));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn uid(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    async fn directory() -> (MemoryStore, UserDirectory) {
        let store = MemoryStore::new();
        let directory = UserDirectory::new(Arc::new(store.clone()));
        directory
            .register(&User::new(uid("u1"), "Alice", "a@x.com"))
            .await
            .unwrap();
        directory
            .register(&User::new(uid("u2"), "Bob", "b@x.com"))
            .await
            .unwrap();
        (store, directory)
    }

    #[tokio::test]
    async fn test_register_keeps_friend_edges() {
        let (store, directory) = directory().await;
        store
            .set(&path::friend_edge("u1", "u2").unwrap(), json!("Bob"))
            .await
            .unwrap();

        directory
            .register(&User::new(uid("u1"), "Alice B.", "a@x.com"))
            .await
            .unwrap();

        let user = directory.lookup(&uid("u1")).await.unwrap().unwrap();
        assert_eq!(user.display_name, "Alice B.");
        assert!(store
            .get(&path::friend_edge("u1", "u2").unwrap())
            .await
            .unwrap()
            .exists());
    }

    #[tokio::test]
    async fn test_lookup_missing() {
        let (_, directory) = directory().await;
        assert!(directory.lookup(&uid("u9")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_email() {
        let (_, directory) = directory().await;

        let found = directory
            .find_by_email("a@x.com", &uid("u2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, uid("u1"));
        assert_eq!(found.display_name, "Alice");

        // Own address is excluded.
        assert!(directory
            .find_by_email("a@x.com", &uid("u1"))
            .await
            .unwrap()
            .is_none());

        // Exact, case-sensitive.
        assert!(directory
            .find_by_email("A@X.COM", &uid("u2"))
            .await
            .unwrap()
            .is_none());
    }
}
