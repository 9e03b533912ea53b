//! # Friends Module
//!
//! Friend list sync and friendship edges.
//!
//! ## Friendship Edges
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FRIENDSHIP EDGES                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Bob searches "a@x.com"                                                │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  users?orderBy="email"&equalTo="a@x.com"   ──►  u1 (Alice)             │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  one atomic multi-path update                                          │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  users/u2/friends/u1 = "Alice"      (self → found)              │   │
//! │  │  users/u1/friends/u2 = "Bob"        (found → self)              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  both friend-list subscriptions emit the new edge                      │
//! │                                                                         │
//! │  Edges are always written and removed in pairs, so neither side can   │
//! │  see a one-way friendship.                                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use serde_json::{json, Value};

use crate::directory::UserDirectory;
use crate::error::{Error, Result};
use crate::identity::{Session, User, UserId};
use crate::store::{path, MultiPathUpdate, RealtimeStore, Snapshot};
use crate::subscription::Subscription;

/// An entry in the friend list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Friend {
    /// Friend's user id
    pub id: UserId,
    /// Name stored on the edge
    pub name: String,
    /// Unread marker. Always false until read tracking exists.
    pub has_new_messages: bool,
}

impl Friend {
    /// Friend entry with no unread messages.
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            has_new_messages: false,
        }
    }
}

/// Project a friend-map snapshot into a list, in the order the store emits
/// keys.
pub fn project_friends(snapshot: &Snapshot) -> Vec<Friend> {
    snapshot
        .children()
        .into_iter()
        .filter_map(|(key, value)| {
            let Value::String(name) = value else {
                tracing::warn!(friend = key, "Skipping non-string friend entry");
                return None;
            };
            match UserId::new(key) {
                Ok(id) => Some(Friend::new(id, name.clone())),
                Err(e) => {
                    tracing::warn!(friend = key, error = %e, "Skipping friend with invalid id");
                    None
                }
            }
        })
        .collect()
}

/// Friend list operations for the signed-in user.
#[derive(Clone)]
pub struct FriendsService {
    store: Arc<dyn RealtimeStore>,
    directory: UserDirectory,
    session: Session,
}

impl FriendsService {
    /// Create a friends service for `session`.
    pub fn new(store: Arc<dyn RealtimeStore>, session: Session) -> Self {
        Self {
            directory: UserDirectory::new(store.clone()),
            store,
            session,
        }
    }

    /// Open a live feed of the current user's friend map.
    ///
    /// Pass each snapshot through [`project_friends`].
    pub async fn subscribe(&self) -> Result<Subscription> {
        let path = path::friends(self.session.user_id().as_str())?;
        self.store.subscribe(&path).await
    }

    /// Find a user by exact email and befriend them.
    pub async fn search_and_add_user(&self, email: &str) -> Result<Friend> {
        if email.is_empty() {
            return Err(Error::EmptySearchQuery);
        }

        let me = self.session.user_id();
        let Some(found) = self.directory.find_by_email(email, me).await? else {
            tracing::info!(user = %me, "Friend search found no user");
            return Err(Error::UserNotFound(email.to_string()));
        };

        self.add_friend(&found).await
    }

    /// Write both friendship edges with `other`.
    pub async fn add_friend(&self, other: &User) -> Result<Friend> {
        if self.session.is_self(other.id.as_str()) {
            return Err(Error::CannotAddSelf);
        }
        let me = self.session.user_id();

        // The reverse edge carries our own name, so our record must exist.
        let Some(myself) = self.directory.lookup(me).await? else {
            return Err(Error::UserNotFound(me.to_string()));
        };

        let update = MultiPathUpdate::new()
            .set(
                path::friend_edge(me.as_str(), other.id.as_str())?,
                json!(other.display_name),
            )
            .set(
                path::friend_edge(other.id.as_str(), me.as_str())?,
                json!(myself.display_name),
            );
        self.store.update(update).await?;

        tracing::info!(user = %me, friend = %other.id, "Added friend");
        Ok(Friend::new(other.id.clone(), other.display_name.clone()))
    }

    /// Remove both friendship edges with `friend`.
    pub async fn remove_friend(&self, friend: &UserId) -> Result<()> {
        let me = self.session.user_id();
        let edge = path::friend_edge(me.as_str(), friend.as_str())?;
        if !self.store.get(&edge).await?.exists() {
            return Err(Error::NotFriends(friend.to_string()));
        }

        let update = MultiPathUpdate::new()
            .remove(edge)
            .remove(path::friend_edge(friend.as_str(), me.as_str())?);
        self.store.update(update).await?;

        tracing::info!(user = %me, friend = %friend, "Removed friend");
        Ok(())
    }
}
