//! # Store Module
//!
//! The boundary to the realtime document database.
//!
//! ## Store Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORE BOUNDARY                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  friends / messaging / directory                                       │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  RealtimeStore (trait)                                          │   │
//! │  │  ─────────────────────                                           │   │
//! │  │  get / set / push / remove      one-shot reads and writes       │   │
//! │  │  update                         atomic multi-path write         │   │
//! │  │  query_equal                    indexed child-equality query    │   │
//! │  │  subscribe                      live full-snapshot feed         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │         │                                   │                           │
//! │         ▼                                   ▼                           │
//! │  ┌──────────────────────┐        ┌──────────────────────────────────┐  │
//! │  │  MemoryStore         │        │  RestStore                       │  │
//! │  │  in-process tree,    │        │  {path}.json over HTTPS,         │  │
//! │  │  tests and demos     │        │  Server-Sent Events for feeds    │  │
//! │  └──────────────────────┘        └──────────────────────────────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Document Layout
//!
//! ```text
//! users/
//!   {uid}/
//!     username: "Alice"
//!     email:    "a@x.com"
//!     friends/
//!       {friendId}: "Bob"                 ◄── friendship edge
//! conversations/
//!   {uidA}_{uidB}/                        ◄── smaller id first
//!     messages/
//!       {pushId}: { text, senderId, timestamp, imageUrl }
//! ```

pub mod memory;
pub mod path;
pub mod push_id;
pub mod rest;
pub(crate) mod tree;

pub use memory::MemoryStore;
pub use path::StorePath;
pub use push_id::PushIdGenerator;
pub use rest::RestStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::subscription::Subscription;

/// The value at a path at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    path: StorePath,
    value: Option<Value>,
}

impl Snapshot {
    /// Create a snapshot; `null` is treated as absent.
    pub fn new(path: StorePath, value: Option<Value>) -> Self {
        let value = value.filter(|v| !v.is_null());
        Self { path, value }
    }

    /// Path this snapshot was taken at.
    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Whether anything is stored at the path.
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// Raw value, if present.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Take the raw value.
    pub fn into_value(self) -> Option<Value> {
        self.value
    }

    /// Child entries in the order the store emits them (ascending key).
    pub fn children(&self) -> Vec<(&str, &Value)> {
        match &self.value {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.as_str(), v)).collect(),
            _ => Vec::new(),
        }
    }

    /// Deserialize the value, `None` if absent.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.value {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| {
                    Error::DeserializationError(format!("{} at {}", e, self.path))
                }),
            None => Ok(None),
        }
    }
}

/// A set of writes applied atomically: all succeed or none do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiPathUpdate {
    entries: Vec<(StorePath, Value)>,
}

impl MultiPathUpdate {
    /// Empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a write; `Value::Null` deletes.
    pub fn set(mut self, path: StorePath, value: Value) -> Self {
        self.entries.push((path, value));
        self
    }

    /// Add a delete.
    pub fn remove(self, path: StorePath) -> Self {
        self.set(path, Value::Null)
    }

    /// Writes in insertion order.
    pub fn entries(&self) -> &[(StorePath, Value)] {
        &self.entries
    }

    /// Whether there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reject updates where one path lies inside another, which the
    /// database refuses as ambiguous.
    pub fn validate(&self) -> Result<()> {
        for (i, (a, _)) in self.entries.iter().enumerate() {
            for (b, _) in &self.entries[i + 1..] {
                if a.overlaps(b) {
                    return Err(Error::InvalidKey(format!(
                        "update paths {} and {} overlap",
                        a, b
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Read/subscribe/write/delete access to a realtime document database.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// One-shot read.
    async fn get(&self, path: &StorePath) -> Result<Snapshot>;

    /// Replace the value at `path`; `Value::Null` deletes.
    async fn set(&self, path: &StorePath, value: Value) -> Result<()>;

    /// Delete the value at `path`.
    async fn remove(&self, path: &StorePath) -> Result<()> {
        self.set(path, Value::Null).await
    }

    /// Apply several writes atomically.
    async fn update(&self, update: MultiPathUpdate) -> Result<()>;

    /// Children of `path` whose `child` field equals `value`.
    async fn query_equal(&self, path: &StorePath, child: &str, value: &str) -> Result<Snapshot>;

    /// Open a live feed of snapshots at `path`.
    ///
    /// The current value is delivered first, then one snapshot per change.
    async fn subscribe(&self, path: &StorePath) -> Result<Subscription>;

    /// Allocate a new chronologically ordered child key.
    fn generate_key(&self) -> String;

    /// Write `value` under a freshly generated child key of `path`.
    async fn push(&self, path: &StorePath, value: Value) -> Result<String> {
        let key = self.generate_key();
        self.set(&path.child(&key)?, value).await?;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_null_is_absent() {
        let snap = Snapshot::new(StorePath::root(), Some(Value::Null));
        assert!(!snap.exists());
        assert!(snap.children().is_empty());
        assert_eq!(snap.deserialize::<String>().unwrap(), None);
    }

    #[test]
    fn test_snapshot_children_in_key_order() {
        let snap = Snapshot::new(
            path::users(),
            Some(json!({"b": 2, "a": 1, "c": 3})),
        );
        let keys: Vec<&str> = snap.children().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_snapshot_deserialize_error_names_path() {
        let snap = Snapshot::new(path::users(), Some(json!("not a number")));
        let err = snap.deserialize::<i64>().unwrap_err();
        assert!(err.to_string().contains("/users"));
    }

    #[test]
    fn test_update_validation() {
        let ok = MultiPathUpdate::new()
            .set(path::friend_edge("u1", "u2").unwrap(), json!("Bob"))
            .set(path::friend_edge("u2", "u1").unwrap(), json!("Alice"));
        assert!(ok.validate().is_ok());
        assert_eq!(ok.entries().len(), 2);

        let overlapping = MultiPathUpdate::new()
            .set(path::friends("u1").unwrap(), json!({}))
            .remove(path::friend_edge("u1", "u2").unwrap());
        assert!(overlapping.validate().is_err());
    }
}
