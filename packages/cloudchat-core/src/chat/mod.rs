//! # Chat Module
//!
//! The chat session: owns the local state, the two live subscriptions, and
//! every user action.
//!
//! ## Session Data Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         CHAT SESSION FLOW                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  mount()                                                               │
//! │    └── subscribe users/{me}/friends ────────────┐                      │
//! │                                                  ▼                      │
//! │                                   FriendsUpdated (full replace)        │
//! │                                   nothing selected? select first       │
//! │                                                  │                      │
//! │  select_friend(peer)                             │                      │
//! │    ├── drop previous message subscription ◄──────┘                      │
//! │    └── subscribe conversations/{cid}/messages ──┐                      │
//! │                                                  ▼                      │
//! │                                   MessagesUpdated (full replace)       │
//! │                                                                         │
//! │  send / delete / search-and-add                                        │
//! │    └── write to the store ──► own subscription echoes the change      │
//! │                                                                         │
//! │  Every remote call runs under the request timeout and the session     │
//! │  cancellation token. Failures come back as errors and are also        │
//! │  published as ChatEvent::Notice.                                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod handle;
mod state;

pub use handle::{ChatCommand, ChatHandle};
pub use state::ChatState;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::ChatConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::friends::{project_friends, Friend, FriendsService};
use crate::identity::{Session, UserId};
use crate::messaging::{
    project_messages, ConversationId, ImageAttachment, Message, MessagingService, ObjectStore,
};
use crate::render::{self, ChatView};
use crate::store::{RealtimeStore, Snapshot};
use crate::subscription::Subscription;
use crate::time::Clock;

/// Something the UI should react to.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// The friend list was replaced
    FriendsUpdated(Vec<Friend>),
    /// A conversation was opened
    FriendSelected {
        /// Selected friend
        friend: UserId,
        /// Their conversation
        conversation: ConversationId,
    },
    /// No conversation is open any more
    SelectionCleared,
    /// The open conversation's messages were replaced
    MessagesUpdated {
        /// Conversation the messages belong to
        conversation: ConversationId,
        /// All messages, in store order
        messages: Vec<Message>,
    },
    /// A message was written
    MessageSent(Message),
    /// A message was removed
    MessageDeleted {
        /// Conversation it was removed from
        conversation: ConversationId,
        /// Removed message id
        message_id: String,
    },
    /// A friendship was created
    FriendAdded(Friend),
    /// A friendship was removed
    FriendRemoved(UserId),
    /// Non-blocking failure report
    Notice {
        /// Error classification
        kind: ErrorKind,
        /// Human-readable description
        message: String,
    },
}

/// One emission taken off a live subscription.
enum FeedItem {
    Friends(Option<Result<Snapshot>>),
    Messages(ConversationId, Option<Result<Snapshot>>),
}

/// Chat client for one signed-in user.
pub struct ChatSession {
    session: Session,
    config: ChatConfig,
    friends: FriendsService,
    messaging: MessagingService,
    state: ChatState,
    friends_feed: Option<Subscription>,
    messages_feed: Option<(ConversationId, Subscription)>,
    events: broadcast::Sender<ChatEvent>,
    cancel: CancellationToken,
}

impl ChatSession {
    /// Create a session for `session` against `store`.
    pub fn new(store: Arc<dyn RealtimeStore>, session: Session, config: ChatConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            friends: FriendsService::new(store.clone(), session.clone()),
            messaging: MessagingService::new(store, session.clone())
                .with_max_image_size(config.max_image_size),
            session,
            config,
            state: ChatState::default(),
            friends_feed: None,
            messages_feed: None,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `clock` for message timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.messaging = self.messaging.with_clock(clock);
        self
    }

    /// Upload image attachments to `objects`.
    pub fn with_object_store(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.messaging = self.messaging.with_object_store(objects);
        self
    }

    /// The signed-in user.
    pub fn user_id(&self) -> &UserId {
        self.session.user_id()
    }

    /// Current local state.
    pub fn state(&self) -> &ChatState {
        &self.state
    }

    /// Render the current state.
    pub fn view(&self) -> ChatView {
        render::render(&self.state, self.session.user_id())
    }

    /// Receive session events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Token that cancels every in-flight call of this session.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ========================================================================
    // SUBSCRIPTIONS
    // ========================================================================

    /// Start following the friend list.
    pub async fn mount(&mut self) -> Result<()> {
        let result = self.try_mount().await;
        self.reported("mount", result)
    }

    async fn try_mount(&mut self) -> Result<()> {
        if self.friends_feed.is_some() {
            return Ok(());
        }
        let feed = self.guarded("subscribe friends", self.friends.subscribe()).await?;
        self.friends_feed = Some(feed);
        tracing::info!(user = %self.session.user_id(), "Chat session mounted");
        Ok(())
    }

    /// Wait for the next subscription emission and apply it to the state.
    ///
    /// Returns `false` once the session is shut down or no subscription is
    /// open.
    pub async fn next_update(&mut self) -> bool {
        match self.next_feed_item().await {
            Some(item) => {
                self.apply_feed_item(item).await;
                true
            }
            None => false,
        }
    }

    pub(crate) fn has_feeds(&self) -> bool {
        !self.cancel.is_cancelled() && (self.friends_feed.is_some() || self.messages_feed.is_some())
    }

    /// Take the next emission off either subscription. Cancel safe.
    async fn next_feed_item(&mut self) -> Option<FeedItem> {
        if !self.has_feeds() {
            return None;
        }

        let friends_feed = &mut self.friends_feed;
        let messages_feed = &mut self.messages_feed;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = async {
                match friends_feed {
                    Some(feed) => feed.next().await,
                    None => std::future::pending().await,
                }
            } => Some(FeedItem::Friends(item)),
            (conversation, item) = async {
                match messages_feed {
                    Some((conversation, feed)) => (conversation.clone(), feed.next().await),
                    None => std::future::pending().await,
                }
            } => Some(FeedItem::Messages(conversation, item)),
        }
    }

    async fn apply_feed_item(&mut self, item: FeedItem) {
        match item {
            FeedItem::Friends(Some(Ok(snapshot))) => self.apply_friends(&snapshot).await,
            FeedItem::Friends(Some(Err(e))) => self.notice("friends feed", &e),
            FeedItem::Friends(None) => {
                tracing::warn!(user = %self.session.user_id(), "Friends feed ended");
                self.friends_feed = None;
            }
            FeedItem::Messages(conversation, item) => {
                if self.state.conversation.as_ref() != Some(&conversation) {
                    tracing::debug!(conversation = %conversation, "Ignoring emission for inactive conversation");
                    return;
                }
                match item {
                    Some(Ok(snapshot)) => {
                        self.state.messages = project_messages(&snapshot);
                        tracing::debug!(
                            conversation = %conversation,
                            count = self.state.messages.len(),
                            "Messages updated"
                        );
                        self.emit(ChatEvent::MessagesUpdated {
                            conversation,
                            messages: self.state.messages.clone(),
                        });
                    }
                    Some(Err(e)) => self.notice("messages feed", &e),
                    None => {
                        tracing::warn!(conversation = %conversation, "Messages feed ended");
                        self.messages_feed = None;
                    }
                }
            }
        }
    }

    async fn apply_friends(&mut self, snapshot: &Snapshot) {
        self.state.friends = project_friends(snapshot);
        tracing::debug!(count = self.state.friends.len(), "Friends updated");
        self.emit(ChatEvent::FriendsUpdated(self.state.friends.clone()));

        // A friend that disappeared from the list takes the open
        // conversation with them.
        if self.state.selected.is_some() && self.state.selected_friend().is_none() {
            self.clear_selection();
        }

        if self.state.selected.is_none() {
            if let Some(first) = self.state.friends.first().map(|f| f.id.clone()) {
                // select_friend reports its own failure.
                let _ = self.select_friend(first).await;
            }
        }
    }

    /// Open the conversation with `friend`, closing the current one first.
    pub async fn select_friend(&mut self, friend: UserId) -> Result<()> {
        let result = self.try_select_friend(friend).await;
        self.reported("select_friend", result)
    }

    async fn try_select_friend(&mut self, friend: UserId) -> Result<()> {
        if self.state.selected.as_ref() == Some(&friend) && self.messages_feed.is_some() {
            return Ok(());
        }

        // The old feed must be gone before the new one opens.
        if let Some((old, feed)) = self.messages_feed.take() {
            tracing::debug!(conversation = %old, "Closing conversation");
            feed.cancel();
        }

        let conversation = self.messaging.conversation_with(&friend);
        let feed = match self
            .guarded("subscribe messages", self.messaging.subscribe(&friend))
            .await
        {
            Ok(feed) => feed,
            Err(e) => {
                // No feed means no selection, so the next friends emission
                // auto-selects again.
                if self.state.selected.is_some() {
                    self.state.close_conversation();
                    self.emit(ChatEvent::SelectionCleared);
                }
                return Err(e);
            }
        };

        self.state.selected = Some(friend.clone());
        self.state.conversation = Some(conversation.clone());
        self.state.messages.clear();
        self.messages_feed = Some((conversation.clone(), feed));

        tracing::info!(friend = %friend, conversation = %conversation, "Conversation opened");
        self.emit(ChatEvent::FriendSelected {
            friend,
            conversation,
        });
        Ok(())
    }

    /// Close the open conversation.
    pub fn clear_selection(&mut self) {
        if let Some((conversation, feed)) = self.messages_feed.take() {
            tracing::debug!(conversation = %conversation, "Closing conversation");
            feed.cancel();
        }
        if self.state.selected.is_some() {
            self.state.close_conversation();
            self.emit(ChatEvent::SelectionCleared);
        }
    }

    // ========================================================================
    // COMPOSER
    // ========================================================================

    /// Replace the draft text.
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.state.draft = text.into();
    }

    /// Pick or clear the image for the next message.
    pub fn attach_image(&mut self, image: Option<ImageAttachment>) -> Result<()> {
        if let Some(image) = &image {
            let checked = image.validate(self.config.max_image_size);
            self.reported("attach_image", checked)?;
        }
        self.state.pending_image = image;
        Ok(())
    }

    /// Send the draft and pending image to the selected friend.
    ///
    /// Returns `Ok(None)` without writing when there is nothing to send.
    pub async fn send_message(&mut self) -> Result<Option<Message>> {
        let result = self.try_send_message().await;
        self.reported("send_message", result)
    }

    async fn try_send_message(&mut self) -> Result<Option<Message>> {
        if !self.state.has_content() {
            return Ok(None);
        }
        let peer = self.state.selected.clone().ok_or(Error::NoPeerSelected)?;

        let message = self
            .guarded(
                "send message",
                self.messaging.send_message(
                    &peer,
                    &self.state.draft,
                    self.state.pending_image.as_ref(),
                ),
            )
            .await?;

        self.state.draft.clear();
        self.state.pending_image = None;
        self.emit(ChatEvent::MessageSent(message.clone()));
        Ok(Some(message))
    }

    /// Delete one of the current user's messages from the open conversation.
    pub async fn delete_message(&mut self, message_id: &str) -> Result<()> {
        let result = self.try_delete_message(message_id).await;
        self.reported("delete_message", result)
    }

    async fn try_delete_message(&mut self, message_id: &str) -> Result<()> {
        let peer = self.state.selected.clone().ok_or(Error::NoPeerSelected)?;
        self.guarded(
            "delete message",
            self.messaging.delete_message(&peer, message_id),
        )
        .await?;

        self.emit(ChatEvent::MessageDeleted {
            conversation: self.messaging.conversation_with(&peer),
            message_id: message_id.to_string(),
        });
        Ok(())
    }

    // ========================================================================
    // FRIENDS
    // ========================================================================

    /// Replace the search box text.
    pub fn set_search_query(&mut self, query: impl Into<String>) {
        self.state.search_query = query.into();
    }

    /// Befriend the user whose email equals the search query.
    ///
    /// Returns `Ok(None)` without searching when the query is empty. The
    /// query is cleared only on success.
    pub async fn search_and_add_user(&mut self) -> Result<Option<Friend>> {
        let result = self.try_search_and_add_user().await;
        self.reported("search_and_add_user", result)
    }

    async fn try_search_and_add_user(&mut self) -> Result<Option<Friend>> {
        if self.state.search_query.is_empty() {
            return Ok(None);
        }
        let friend = self
            .guarded(
                "search and add user",
                self.friends.search_and_add_user(&self.state.search_query),
            )
            .await?;

        self.state.search_query.clear();
        self.emit(ChatEvent::FriendAdded(friend.clone()));
        Ok(Some(friend))
    }

    /// End the friendship with `friend`.
    pub async fn remove_friend(&mut self, friend: &UserId) -> Result<()> {
        let result = self.try_remove_friend(friend).await;
        self.reported("remove_friend", result)
    }

    async fn try_remove_friend(&mut self, friend: &UserId) -> Result<()> {
        self.guarded("remove friend", self.friends.remove_friend(friend))
            .await?;
        if self.state.selected.as_ref() == Some(friend) {
            self.clear_selection();
        }
        self.emit(ChatEvent::FriendRemoved(friend.clone()));
        Ok(())
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Cancel in-flight calls and dispose both subscriptions.
    pub fn shutdown(&mut self) {
        self.friends_feed = None;
        self.messages_feed = None;
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            tracing::info!(user = %self.session.user_id(), "Chat session shut down");
        }
    }

    /// Run `call` under the request timeout and the session token.
    async fn guarded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let timeout = self.config.request_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!("{} took longer than {:?}", operation, timeout))),
            },
        }
    }

    fn reported<T>(&self, operation: &'static str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.notice(operation, e);
        }
        result
    }

    fn notice(&self, operation: &str, error: &Error) {
        tracing::warn!(
            operation,
            code = error.code(),
            kind = error.kind().as_str(),
            error = %error,
            "Chat operation failed"
        );
        self.emit(ChatEvent::Notice {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn emit(&self, event: ChatEvent) {
        // No receivers is fine; the UI may only read state.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::UserDirectory;
    use crate::identity::User;
    use crate::messaging::MemoryObjectStore;
    use crate::store::{path, MemoryStore, MultiPathUpdate, StorePath};
    use crate::time::ManualClock;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn uid(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    async fn store_with_users() -> MemoryStore {
        let store = MemoryStore::new();
        let directory = UserDirectory::new(Arc::new(store.clone()));
        for (id, name, email) in [
            ("u1", "Alice", "a@x.com"),
            ("u2", "Bob", "b@x.com"),
            ("u3", "Carol", "c@x.com"),
        ] {
            directory
                .register(&User::new(uid(id), name, email))
                .await
                .unwrap();
        }
        store
    }

    fn session(store: &MemoryStore, me: &str) -> ChatSession {
        ChatSession::new(Arc::new(store.clone()), Session::new(uid(me)), ChatConfig::default())
            .with_clock(Arc::new(ManualClock::new(1_700_000_000_000)))
    }

    async fn befriend(store: &MemoryStore, a: (&str, &str), b: (&str, &str)) {
        let update = MultiPathUpdate::new()
            .set(path::friend_edge(a.0, b.0).unwrap(), json!(b.1))
            .set(path::friend_edge(b.0, a.0).unwrap(), json!(a.1));
        store.update(update).await.unwrap();
    }

    /// Mounted session with the initial friends emission and, if a friend
    /// was auto-selected, the initial messages emission applied.
    async fn mounted(store: &MemoryStore, me: &str) -> ChatSession {
        let mut chat = session(store, me);
        chat.mount().await.unwrap();
        assert!(chat.next_update().await);
        if chat.state().selected.is_some() {
            assert!(chat.next_update().await);
        }
        chat
    }

    #[tokio::test]
    async fn test_mount_auto_selects_first_friend() {
        let store = store_with_users().await;
        befriend(&store, ("u1", "Alice"), ("u3", "Carol")).await;
        befriend(&store, ("u1", "Alice"), ("u2", "Bob")).await;

        let chat = mounted(&store, "u1").await;
        let names: Vec<&str> = chat.state().friends.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Bob", "Carol"]);
        assert_eq!(chat.state().selected, Some(uid("u2")));
        assert_eq!(chat.state().conversation.as_ref().map(|c| c.as_str()), Some("u1_u2"));
        assert!(chat.state().messages.is_empty());
        assert_eq!(store.listener_count(), 2);
    }

    #[tokio::test]
    async fn test_no_friends_means_no_conversation() {
        let store = store_with_users().await;
        let chat = mounted(&store, "u1").await;
        assert!(chat.state().friends.is_empty());
        assert!(chat.state().selected.is_none());
        assert!(!chat.view().can_send);
    }

    #[tokio::test]
    async fn test_send_and_echo() {
        let store = store_with_users().await;
        befriend(&store, ("u1", "Alice"), ("u2", "Bob")).await;
        let mut alice = mounted(&store, "u1").await;
        let mut bob = mounted(&store, "u2").await;

        alice.set_draft("hello");
        let sent = alice.send_message().await.unwrap().unwrap();
        assert_eq!(sent.text, "hello");
        assert!(alice.state().draft.is_empty());

        assert!(alice.next_update().await);
        assert!(bob.next_update().await);
        assert_eq!(alice.state().messages, vec![sent.clone()]);
        assert_eq!(bob.state().messages, vec![sent]);

        let bubble = &bob.view().bubbles[0];
        assert!(!bubble.deletable);
        assert!(alice.view().bubbles[0].deletable);
    }

    #[tokio::test]
    async fn test_empty_send_is_silent() {
        let store = store_with_users().await;
        befriend(&store, ("u1", "Alice"), ("u2", "Bob")).await;
        let mut alice = mounted(&store, "u1").await;
        let mut events = alice.subscribe();
        let writes = store.write_count();

        assert!(alice.send_message().await.unwrap().is_none());
        assert_eq!(store.write_count(), writes);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_without_selection_fails_with_notice() {
        let store = store_with_users().await;
        let mut alice = mounted(&store, "u1").await;
        let mut events = alice.subscribe();

        alice.set_draft("anyone?");
        assert!(matches!(alice.send_message().await, Err(Error::NoPeerSelected)));
        assert!(matches!(
            events.try_recv(),
            Ok(ChatEvent::Notice { kind: ErrorKind::InvalidInput, .. })
        ));
        assert_eq!(alice.state().draft, "anyone?");
    }

    #[tokio::test]
    async fn test_send_image_stores_durable_url() {
        let store = store_with_users().await;
        befriend(&store, ("u1", "Alice"), ("u2", "Bob")).await;
        let objects = MemoryObjectStore::new("https://cdn.example.com");
        let mut alice = mounted(&store, "u1").await.with_object_store(Arc::new(objects.clone()));

        alice
            .attach_image(Some(ImageAttachment::new("cat.png", "image/png", &b"pixels"[..])))
            .unwrap();
        let sent = alice.send_message().await.unwrap().unwrap();
        assert!(sent.image_url.as_deref().unwrap().starts_with("https://cdn.example.com/u1_u2/"));
        assert!(alice.state().pending_image.is_none());
        assert_eq!(objects.len(), 1);
    }

    #[tokio::test]
    async fn test_attach_rejects_unsupported_type() {
        let store = store_with_users().await;
        let mut alice = session(&store, "u1");
        let err = alice
            .attach_image(Some(ImageAttachment::new("a.txt", "text/plain", &b"hi"[..])))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedImageType(_)));
        assert!(alice.state().pending_image.is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_exactly_one() {
        let store = store_with_users().await;
        befriend(&store, ("u1", "Alice"), ("u2", "Bob")).await;
        let mut alice = mounted(&store, "u1").await;

        alice.set_draft("one");
        let one = alice.send_message().await.unwrap().unwrap();
        alice.set_draft("two");
        let two = alice.send_message().await.unwrap().unwrap();
        alice.next_update().await;
        alice.next_update().await;
        assert_eq!(alice.state().messages.len(), 2);

        alice.delete_message(&one.id).await.unwrap();
        alice.next_update().await;
        assert_eq!(alice.state().messages, vec![two]);
    }

    #[tokio::test]
    async fn test_search_and_add_scenario() {
        let store = store_with_users().await;
        let mut bob = mounted(&store, "u2").await;
        let mut alice = mounted(&store, "u1").await;

        // Alice searching her own address misses and writes nothing.
        alice.set_search_query("a@x.com");
        let writes = store.write_count();
        assert!(matches!(
            alice.search_and_add_user().await,
            Err(Error::UserNotFound(_))
        ));
        assert_eq!(store.write_count(), writes);
        assert_eq!(alice.state().search_query, "a@x.com");

        bob.set_search_query("a@x.com");
        let added = bob.search_and_add_user().await.unwrap().unwrap();
        assert_eq!(added.id, uid("u1"));
        assert!(bob.state().search_query.is_empty());

        assert_eq!(
            store.get(&path::friend_edge("u2", "u1").unwrap()).await.unwrap().value(),
            Some(&json!("Alice"))
        );
        assert_eq!(
            store.get(&path::friend_edge("u1", "u2").unwrap()).await.unwrap().value(),
            Some(&json!("Bob"))
        );

        // Alice's friend list updates and opens the conversation.
        assert!(alice.next_update().await);
        assert_eq!(alice.state().selected, Some(uid("u2")));
    }

    #[tokio::test]
    async fn test_empty_search_is_silent() {
        let store = store_with_users().await;
        let mut alice = mounted(&store, "u1").await;
        let writes = store.write_count();
        assert!(alice.search_and_add_user().await.unwrap().is_none());
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_switching_peer_disposes_old_feed() {
        let store = store_with_users().await;
        befriend(&store, ("u1", "Alice"), ("u2", "Bob")).await;
        befriend(&store, ("u1", "Alice"), ("u3", "Carol")).await;
        let mut alice = mounted(&store, "u1").await;
        assert_eq!(alice.state().selected, Some(uid("u2")));

        alice.select_friend(uid("u3")).await.unwrap();
        assert_eq!(store.listener_count(), 2);
        assert!(alice.next_update().await);

        // Bob writes into the old conversation; Alice must not see it.
        let mut bob = mounted(&store, "u2").await;
        bob.set_draft("are you there?");
        bob.send_message().await.unwrap();

        assert_eq!(alice.state().conversation.as_ref().map(|c| c.as_str()), Some("u1_u3"));
        assert!(alice.state().messages.is_empty());
        let pending = tokio::time::timeout(Duration::from_millis(20), alice.next_update()).await;
        assert!(pending.is_err(), "no emission expected from the old conversation");
        assert!(alice.state().messages.is_empty());
    }

    #[tokio::test]
    async fn test_remove_selected_friend_closes_conversation() {
        let store = store_with_users().await;
        befriend(&store, ("u1", "Alice"), ("u2", "Bob")).await;
        let mut alice = mounted(&store, "u1").await;

        alice.remove_friend(&uid("u2")).await.unwrap();
        assert!(alice.state().selected.is_none());
        assert!(alice.next_update().await);
        assert!(alice.state().friends.is_empty());
        assert_eq!(alice.view().header, "Chat with User");
    }

    /// Store whose calls never complete.
    struct StalledStore;

    #[async_trait]
    impl RealtimeStore for StalledStore {
        async fn get(&self, _: &StorePath) -> Result<Snapshot> {
            std::future::pending().await
        }
        async fn set(&self, _: &StorePath, _: Value) -> Result<()> {
            std::future::pending().await
        }
        async fn update(&self, _: MultiPathUpdate) -> Result<()> {
            std::future::pending().await
        }
        async fn query_equal(&self, _: &StorePath, _: &str, _: &str) -> Result<Snapshot> {
            std::future::pending().await
        }
        async fn subscribe(&self, _: &StorePath) -> Result<Subscription> {
            std::future::pending().await
        }
        fn generate_key(&self) -> String {
            "-stalled".into()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_call_times_out() {
        let mut chat = ChatSession::new(
            Arc::new(StalledStore),
            Session::new(uid("u1")),
            ChatConfig::default().with_request_timeout(Duration::from_secs(2)),
        );
        let mut events = chat.subscribe();

        let err = chat.mount().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.is_recoverable());
        assert!(matches!(
            events.try_recv(),
            Ok(ChatEvent::Notice { kind: ErrorKind::Transient, .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_calls() {
        let store = store_with_users().await;
        befriend(&store, ("u1", "Alice"), ("u2", "Bob")).await;
        let mut alice = mounted(&store, "u1").await;

        alice.shutdown();
        assert!(alice.is_closed());
        assert!(!alice.next_update().await);
        assert_eq!(store.listener_count(), 0);

        alice.set_draft("too late");
        assert!(matches!(alice.send_message().await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_shutdown_after_external_cancel_drops_feeds() {
        let store = store_with_users().await;
        befriend(&store, ("u1", "Alice"), ("u2", "Bob")).await;
        let mut alice = mounted(&store, "u1").await;
        assert_eq!(store.listener_count(), 2);

        alice.cancellation_token().cancel();
        alice.shutdown();
        assert_eq!(store.listener_count(), 0);
    }

    /// Memory store whose first conversation subscribe fails.
    struct FlakyStore {
        inner: MemoryStore,
        failed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl RealtimeStore for FlakyStore {
        async fn get(&self, path: &StorePath) -> Result<Snapshot> {
            self.inner.get(path).await
        }
        async fn set(&self, path: &StorePath, value: Value) -> Result<()> {
            self.inner.set(path, value).await
        }
        async fn update(&self, update: MultiPathUpdate) -> Result<()> {
            self.inner.update(update).await
        }
        async fn query_equal(&self, path: &StorePath, child: &str, value: &str) -> Result<Snapshot> {
            self.inner.query_equal(path, child, value).await
        }
        async fn subscribe(&self, path: &StorePath) -> Result<Subscription> {
            let conversation = path.segments().first().map(String::as_str) == Some("conversations");
            if conversation && !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::StoreUnavailable("flaky".into()));
            }
            self.inner.subscribe(path).await
        }
        fn generate_key(&self) -> String {
            self.inner.generate_key()
        }
    }

    #[tokio::test]
    async fn test_failed_conversation_subscribe_leaves_no_selection() {
        let store = store_with_users().await;
        befriend(&store, ("u1", "Alice"), ("u2", "Bob")).await;
        let flaky = Arc::new(FlakyStore {
            inner: store.clone(),
            failed: std::sync::atomic::AtomicBool::new(false),
        });
        let mut alice = ChatSession::new(flaky, Session::new(uid("u1")), ChatConfig::default());
        let mut events = alice.subscribe();

        alice.mount().await.unwrap();
        assert!(alice.next_update().await);
        assert!(alice.state().selected.is_none());
        assert!(alice.state().conversation.is_none());
        assert!(!alice.view().can_send);
        assert!(matches!(events.try_recv(), Ok(ChatEvent::FriendsUpdated(_))));
        assert!(matches!(
            events.try_recv(),
            Ok(ChatEvent::Notice { kind: ErrorKind::Transient, .. })
        ));

        // The next friends emission selects again, this time with a feed.
        befriend(&store, ("u1", "Alice"), ("u3", "Carol")).await;
        assert!(alice.next_update().await);
        assert_eq!(alice.state().selected, Some(uid("u2")));
        assert!(alice.next_update().await);

        let mut bob = mounted(&store, "u2").await;
        bob.set_draft("hi");
        bob.send_message().await.unwrap();
        assert!(alice.next_update().await);
        assert_eq!(alice.state().messages.len(), 1);
        assert_eq!(alice.state().messages[0].text, "hi");
    }

    #[tokio::test]
    async fn test_in_flight_call_is_cancelled() {
        let mut chat = ChatSession::new(
            Arc::new(StalledStore),
            Session::new(uid("u1")),
            ChatConfig::default(),
        );
        let token = chat.cancellation_token();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            token.cancel();
        });
        assert!(matches!(chat.mount().await, Err(Error::Cancelled)));
    }
}
