//! # Messaging Module
//!
//! Conversation addressing and the message composer.
//!
//! ## Conversation Addressing
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      CONVERSATION ADDRESSING                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Both participants must land on the same message collection without    │
//! │  talking to each other first:                                          │
//! │                                                                         │
//! │    between("u2", "u1")  ─┐                                             │
//! │                          ├──►  "u1_u2"  (smaller id first)            │
//! │    between("u1", "u2")  ─┘                                             │
//! │                                                                         │
//! │    conversations/u1_u2/messages/{pushId}                               │
//! │                                                                         │
//! │  Ids are compared as raw strings. An id containing '_' can collide    │
//! │  with another pair; ids are only validated as store keys.             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Send Flow
//!
//! ```text
//! send_message(peer, text, image)
//!   │
//!   ├── text empty and no image ──► EmptyMessage, nothing written
//!   ├── image? validate ──► ObjectStore::upload ──► stable URL
//!   └── push {text, senderId, timestamp, imageUrl} under the conversation
//! ```

pub mod attachments;

pub use attachments::{HttpObjectStore, ImageAttachment, MemoryObjectStore, ObjectStore};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DEFAULT_MAX_IMAGE_SIZE;
use crate::error::{Error, Result};
use crate::identity::{Session, UserId};
use crate::store::{path, RealtimeStore, Snapshot};
use crate::subscription::Subscription;
use crate::time::{Clock, SystemClock};

/// Joins the two participant ids of a conversation.
pub const CONVERSATION_ID_SEPARATOR: char = '_';

/// Key of the message collection shared by two users.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(String);

impl ConversationId {
    /// Conversation between `a` and `b`, independent of argument order.
    ///
    /// Ids are ordered by UTF-16 code units so every client on the database
    /// derives the same key.
    pub fn between(a: &UserId, b: &UserId) -> Self {
        let (first, second) = if a.as_str().encode_utf16().lt(b.as_str().encode_utf16()) {
            (a, b)
        } else {
            (b, a)
        };
        Self(format!(
            "{}{}{}",
            first, CONVERSATION_ID_SEPARATOR, second
        ))
    }

    /// The raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored form of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Message text, possibly empty when an image is attached
    #[serde(default)]
    pub text: String,
    /// Author's user id
    pub sender_id: String,
    /// Client send time in Unix milliseconds
    pub timestamp: i64,
    /// Durable URL of the attached image
    #[serde(default)]
    pub image_url: Option<String>,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Store-assigned push id
    pub id: String,
    /// Message text
    pub text: String,
    /// Author
    pub sender_id: UserId,
    /// Client send time in Unix milliseconds
    pub timestamp: i64,
    /// Attached image URL
    pub image_url: Option<String>,
}

impl Message {
    fn from_record(id: impl Into<String>, record: MessageRecord) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            text: record.text,
            sender_id: UserId::new(record.sender_id)?,
            timestamp: record.timestamp,
            image_url: record.image_url,
        })
    }

    /// Whether `user` wrote this message.
    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender_id == user
    }

    /// Whether an image is attached.
    pub fn has_image(&self) -> bool {
        self.image_url.is_some()
    }
}

/// Project a message-collection snapshot into a list, in the order the
/// store emits keys. Malformed records are skipped.
pub fn project_messages(snapshot: &Snapshot) -> Vec<Message> {
    snapshot
        .children()
        .into_iter()
        .filter_map(|(id, value)| {
            let parsed = serde_json::from_value::<MessageRecord>(value.clone())
                .map_err(Error::from)
                .and_then(|record| Message::from_record(id, record));
            match parsed {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(message = id, error = %e, "Skipping malformed message");
                    None
                }
            }
        })
        .collect()
}

/// Sends and deletes messages for the signed-in user.
#[derive(Clone)]
pub struct MessagingService {
    store: Arc<dyn RealtimeStore>,
    session: Session,
    clock: Arc<dyn Clock>,
    objects: Option<Arc<dyn ObjectStore>>,
    max_image_size: usize,
}

impl MessagingService {
    /// Create a messaging service for `session`. Image sends fail until an
    /// object store is attached.
    pub fn new(store: Arc<dyn RealtimeStore>, session: Session) -> Self {
        Self {
            store,
            session,
            clock: Arc::new(SystemClock),
            objects: None,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
        }
    }

    /// Use `clock` for message timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Upload images to `objects`.
    pub fn with_object_store(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    /// Reject images larger than `max` bytes.
    pub fn with_max_image_size(mut self, max: usize) -> Self {
        self.max_image_size = max;
        self
    }

    /// Conversation between the current user and `peer`.
    pub fn conversation_with(&self, peer: &UserId) -> ConversationId {
        ConversationId::between(self.session.user_id(), peer)
    }

    /// Open a live feed of the conversation with `peer`.
    ///
    /// Pass each snapshot through [`project_messages`].
    pub async fn subscribe(&self, peer: &UserId) -> Result<Subscription> {
        let conversation = self.conversation_with(peer);
        let path = path::messages(conversation.as_str())?;
        self.store.subscribe(&path).await
    }

    /// Append a message to the conversation with `peer`.
    pub async fn send_message(
        &self,
        peer: &UserId,
        text: &str,
        image: Option<&ImageAttachment>,
    ) -> Result<Message> {
        if text.is_empty() && image.is_none() {
            return Err(Error::EmptyMessage);
        }

        let conversation = self.conversation_with(peer);
        let image_url = match image {
            Some(image) => Some(self.upload(&conversation, image).await?),
            None => None,
        };

        let record = MessageRecord {
            text: text.to_string(),
            sender_id: self.session.user_id().to_string(),
            timestamp: self.clock.now_millis(),
            image_url,
        };
        let id = self
            .store
            .push(
                &path::messages(conversation.as_str())?,
                serde_json::to_value(&record)?,
            )
            .await?;

        tracing::info!(
            conversation = %conversation,
            message = %id,
            has_image = record.image_url.is_some(),
            "Message sent"
        );
        Message::from_record(id, record)
    }

    async fn upload(&self, conversation: &ConversationId, image: &ImageAttachment) -> Result<String> {
        image.validate(self.max_image_size)?;
        let objects = self
            .objects
            .as_ref()
            .ok_or_else(|| Error::UploadFailed("no object store configured".into()))?;
        objects.upload(&image.object_key(conversation), image).await
    }

    /// Delete one of the current user's messages from the conversation with
    /// `peer`.
    pub async fn delete_message(&self, peer: &UserId, message_id: &str) -> Result<()> {
        let conversation = self.conversation_with(peer);
        let path = path::message(conversation.as_str(), message_id)?;

        let snapshot = self.store.get(&path).await?;
        let Some(value) = snapshot.value() else {
            return Err(Error::MessageNotFound(message_id.to_string()));
        };
        let sender = value.get("senderId").and_then(Value::as_str);
        if sender != Some(self.session.user_id().as_str()) {
            tracing::warn!(conversation = %conversation, message = message_id, "Refusing to delete another user's message");
            return Err(Error::NotMessageOwner(message_id.to_string()));
        }

        self.store.remove(&path).await?;
        tracing::info!(conversation = %conversation, message = message_id, "Message deleted");
        Ok(())
    }
}
