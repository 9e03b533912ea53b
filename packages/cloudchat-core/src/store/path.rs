//! Logical locations in the document tree.
//!
//! A [`StorePath`] is a list of validated key segments. The helpers at the
//! bottom of this file are the only places the chat layout
//! (`users/...`, `conversations/...`) is spelled out.

use std::fmt;

use crate::error::{Error, Result};

/// Longest key the database accepts, in bytes.
pub const MAX_KEY_BYTES: usize = 768;

/// Characters that may not appear in a key.
const FORBIDDEN_KEY_CHARS: &[char] = &['.', '$', '#', '[', ']', '/'];

/// Check that `key` can be used as a single path segment.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key is empty".into()));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(Error::InvalidKey(format!(
            "key is {} bytes (max {})",
            key.len(),
            MAX_KEY_BYTES
        )));
    }
    if let Some(c) = key
        .chars()
        .find(|c| FORBIDDEN_KEY_CHARS.contains(c) || c.is_ascii_control())
    {
        return Err(Error::InvalidKey(format!("{:?} contains {:?}", key, c)));
    }
    Ok(())
}

/// A path from the database root, e.g. `users/u1/friends`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The database root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a slash-separated path. Leading, trailing and repeated slashes
    /// are ignored.
    pub fn parse(path: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            validate_key(segment)?;
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Append one validated segment.
    pub fn child(&self, key: &str) -> Result<Self> {
        validate_key(key)?;
        let mut segments = self.segments.clone();
        segments.push(key.to_string());
        Ok(Self { segments })
    }

    /// Path segments from the root.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True if `self` equals `other` or lies above it.
    pub fn is_ancestor_of(&self, other: &StorePath) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// True if a write at `other` can change the value at `self`.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }

    /// Path joined with `/`, without a leading slash.
    pub fn as_string(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

// ============================================================================
// CHAT LAYOUT
// ============================================================================

/// `users`
pub fn users() -> StorePath {
    StorePath {
        segments: vec!["users".to_string()],
    }
}

/// `users/{uid}`
pub fn user(uid: &str) -> Result<StorePath> {
    users().child(uid)
}

/// `users/{uid}/friends`
pub fn friends(uid: &str) -> Result<StorePath> {
    user(uid)?.child("friends")
}

/// `users/{uid}/friends/{friend_id}`
pub fn friend_edge(uid: &str, friend_id: &str) -> Result<StorePath> {
    friends(uid)?.child(friend_id)
}

/// `conversations/{conversation_id}/messages`
pub fn messages(conversation_id: &str) -> Result<StorePath> {
    StorePath {
        segments: vec!["conversations".to_string()],
    }
    .child(conversation_id)?
    .child("messages")
}

/// `conversations/{conversation_id}/messages/{message_id}`
pub fn message(conversation_id: &str, message_id: &str) -> Result<StorePath> {
    messages(conversation_id)?.child(message_id)
}
