//! Chat session running on its own task.
//!
//! ```text
//! ┌──────────────┐   ChatCommand (mpsc)    ┌───────────────────────────┐
//! │  ChatHandle  │ ──────────────────────► │  session task             │
//! │  (cloneable) │ ◄── oneshot reply ───── │   ├── commands            │
//! │              │                         │   └── subscription feeds  │
//! │  subscribe() │ ◄── ChatEvent ───────── │  (broadcast)              │
//! └──────────────┘                         └───────────────────────────┘
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ChatEvent, ChatSession, ChatState};
use crate::error::{Error, Result};
use crate::friends::Friend;
use crate::identity::UserId;
use crate::messaging::{ImageAttachment, Message};
use crate::render::ChatView;

/// Commands accepted by a spawned session.
pub enum ChatCommand {
    /// Open the conversation with a friend
    SelectFriend {
        /// Friend to select
        friend: UserId,
        /// Channel to send the result
        reply: oneshot::Sender<Result<()>>,
    },
    /// Close the open conversation
    ClearSelection,
    /// Replace the draft text
    SetDraft(String),
    /// Pick or clear the pending image
    AttachImage {
        /// Image, or `None` to clear
        image: Option<ImageAttachment>,
        /// Channel to send the result
        reply: oneshot::Sender<Result<()>>,
    },
    /// Replace the search box text
    SetSearchQuery(String),
    /// Send the draft
    SendMessage {
        /// Channel to send the sent message
        reply: oneshot::Sender<Result<Option<Message>>>,
    },
    /// Delete an own message
    DeleteMessage {
        /// Message to delete
        message_id: String,
        /// Channel to send the result
        reply: oneshot::Sender<Result<()>>,
    },
    /// Search by the current query and add the match
    SearchAndAddUser {
        /// Channel to send the added friend
        reply: oneshot::Sender<Result<Option<Friend>>>,
    },
    /// End a friendship
    RemoveFriend {
        /// Friend to remove
        friend: UserId,
        /// Channel to send the result
        reply: oneshot::Sender<Result<()>>,
    },
    /// Read the local state
    GetState {
        /// Channel to send the state
        reply: oneshot::Sender<ChatState>,
    },
    /// Render the local state
    GetView {
        /// Channel to send the view
        reply: oneshot::Sender<ChatView>,
    },
}

impl std::fmt::Debug for ChatCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelectFriend { friend, .. } => f
                .debug_struct("SelectFriend")
                .field("friend", friend)
                .finish(),
            Self::ClearSelection => write!(f, "ClearSelection"),
            Self::SetDraft(text) => f.debug_tuple("SetDraft").field(&text.len()).finish(),
            Self::AttachImage { image, .. } => f
                .debug_struct("AttachImage")
                .field("size", &image.as_ref().map(|i| i.len()))
                .finish(),
            Self::SetSearchQuery(query) => f.debug_tuple("SetSearchQuery").field(query).finish(),
            Self::SendMessage { .. } => write!(f, "SendMessage"),
            Self::DeleteMessage { message_id, .. } => f
                .debug_struct("DeleteMessage")
                .field("message_id", message_id)
                .finish(),
            Self::SearchAndAddUser { .. } => write!(f, "SearchAndAddUser"),
            Self::RemoveFriend { friend, .. } => f
                .debug_struct("RemoveFriend")
                .field("friend", friend)
                .finish(),
            Self::GetState { .. } => write!(f, "GetState"),
            Self::GetView { .. } => write!(f, "GetView"),
        }
    }
}

/// Handle to a session running on a spawned task.
#[derive(Clone)]
pub struct ChatHandle {
    command_tx: mpsc::Sender<ChatCommand>,
    event_tx: broadcast::Sender<ChatEvent>,
    cancel: CancellationToken,
    stopped: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ChatHandle {
    /// Mount `session` and run it on a new task.
    pub async fn spawn(mut session: ChatSession) -> Result<Self> {
        session.mount().await?;

        let (command_tx, command_rx) = mpsc::channel(session.config.command_capacity.max(1));
        let event_tx = session.events.clone();
        let cancel = session.cancellation_token();
        let stopped = CancellationToken::new();

        let task = tokio::spawn(run_session(session, command_rx, stopped.clone()));

        Ok(Self {
            command_tx,
            event_tx,
            cancel,
            stopped,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    /// Receive session events.
    ///
    /// Multiple subscribers are supported.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_tx.subscribe()
    }

    /// Whether the session task has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.command_tx.is_closed()
    }

    async fn send(&self, command: ChatCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| Error::SessionClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ChatCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx)).await?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Open the conversation with `friend`.
    pub async fn select_friend(&self, friend: UserId) -> Result<()> {
        self.request(|reply| ChatCommand::SelectFriend { friend, reply })
            .await?
    }

    /// Close the open conversation.
    pub async fn clear_selection(&self) -> Result<()> {
        self.send(ChatCommand::ClearSelection).await
    }

    /// Replace the draft text.
    pub async fn set_draft(&self, text: impl Into<String>) -> Result<()> {
        self.send(ChatCommand::SetDraft(text.into())).await
    }

    /// Pick or clear the pending image.
    pub async fn attach_image(&self, image: Option<ImageAttachment>) -> Result<()> {
        self.request(|reply| ChatCommand::AttachImage { image, reply })
            .await?
    }

    /// Replace the search box text.
    pub async fn set_search_query(&self, query: impl Into<String>) -> Result<()> {
        self.send(ChatCommand::SetSearchQuery(query.into())).await
    }

    /// Send the draft; `None` when there was nothing to send.
    pub async fn send_message(&self) -> Result<Option<Message>> {
        self.request(|reply| ChatCommand::SendMessage { reply })
            .await?
    }

    /// Delete an own message from the open conversation.
    pub async fn delete_message(&self, message_id: impl Into<String>) -> Result<()> {
        let message_id = message_id.into();
        self.request(|reply| ChatCommand::DeleteMessage { message_id, reply })
            .await?
    }

    /// Befriend the user matching the search query.
    pub async fn search_and_add_user(&self) -> Result<Option<Friend>> {
        self.request(|reply| ChatCommand::SearchAndAddUser { reply })
            .await?
    }

    /// End a friendship.
    pub async fn remove_friend(&self, friend: UserId) -> Result<()> {
        self.request(|reply| ChatCommand::RemoveFriend { friend, reply })
            .await?
    }

    /// Copy of the session state.
    pub async fn state(&self) -> Result<ChatState> {
        self.request(|reply| ChatCommand::GetState { reply }).await
    }

    /// Rendered view of the session state.
    pub async fn view(&self) -> Result<ChatView> {
        self.request(|reply| ChatCommand::GetView { reply }).await
    }

    /// Cancel in-flight calls and wait for the task to finish.
    ///
    /// Every clone that calls this waits, not only the first.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Chat session task failed");
            }
        }
        self.stopped.cancelled().await;
    }
}

async fn run_session(
    mut session: ChatSession,
    mut command_rx: mpsc::Receiver<ChatCommand>,
    stopped: CancellationToken,
) {
    // Fires on return and on unwind.
    let _stopped = stopped.drop_guard();
    let cancel = session.cancellation_token();
    tracing::info!(user = %session.user_id(), "Chat session task started");

    loop {
        let feeds_open = session.has_feeds();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = command_rx.recv() => match command {
                Some(command) => handle_command(&mut session, command).await,
                None => break,
            },
            Some(item) = session.next_feed_item(), if feeds_open => {
                session.apply_feed_item(item).await;
            }
        }
    }

    session.shutdown();
    tracing::info!(user = %session.user_id(), "Chat session task stopped");
}

async fn handle_command(session: &mut ChatSession, command: ChatCommand) {
    tracing::debug!(command = ?command, "Chat command");
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        ChatCommand::SelectFriend { friend, reply } => {
            let _ = reply.send(session.select_friend(friend).await);
        }
        ChatCommand::ClearSelection => session.clear_selection(),
        ChatCommand::SetDraft(text) => session.set_draft(text),
        ChatCommand::AttachImage { image, reply } => {
            let _ = reply.send(session.attach_image(image));
        }
        ChatCommand::SetSearchQuery(query) => session.set_search_query(query),
        ChatCommand::SendMessage { reply } => {
            let _ = reply.send(session.send_message().await);
        }
        ChatCommand::DeleteMessage { message_id, reply } => {
            let _ = reply.send(session.delete_message(&message_id).await);
        }
        ChatCommand::SearchAndAddUser { reply } => {
            let _ = reply.send(session.search_and_add_user().await);
        }
        ChatCommand::RemoveFriend { friend, reply } => {
            let _ = reply.send(session.remove_friend(&friend).await);
        }
        ChatCommand::GetState { reply } => {
            let _ = reply.send(session.state().clone());
        }
        ChatCommand::GetView { reply } => {
            let _ = reply.send(session.view());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatConfig;
    use crate::directory::UserDirectory;
    use crate::identity::{Session, User};
    use crate::store::{MemoryStore, RealtimeStore};
    use std::time::Duration;

    fn uid(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    async fn spawn_pair() -> (MemoryStore, ChatHandle, ChatHandle) {
        let store = MemoryStore::new();
        let shared: Arc<dyn RealtimeStore> = Arc::new(store.clone());
        let directory = UserDirectory::new(shared.clone());
        directory
            .register(&User::new(uid("u1"), "Alice", "a@x.com"))
            .await
            .unwrap();
        directory
            .register(&User::new(uid("u2"), "Bob", "b@x.com"))
            .await
            .unwrap();

        let alice = ChatSession::new(shared.clone(), Session::new(uid("u1")), ChatConfig::default());
        let bob = ChatSession::new(shared, Session::new(uid("u2")), ChatConfig::default());
        (
            store,
            ChatHandle::spawn(alice).await.unwrap(),
            ChatHandle::spawn(bob).await.unwrap(),
        )
    }

    /// Wait until an event matching `pred` arrives.
    async fn wait_for(
        events: &mut broadcast::Receiver<ChatEvent>,
        pred: impl Fn(&ChatEvent) -> bool,
    ) -> ChatEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream failed: {}", e),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn test_add_friend_and_chat_through_handles() {
        let (_store, alice, bob) = spawn_pair().await;
        let mut alice_events = alice.subscribe();
        let mut bob_events = bob.subscribe();

        bob.set_search_query("a@x.com").await.unwrap();
        let added = bob.search_and_add_user().await.unwrap().unwrap();
        assert_eq!(added.name, "Alice");

        // Alice's task picks up the new edge and opens the conversation.
        wait_for(&mut alice_events, |e| matches!(e, ChatEvent::FriendSelected { .. })).await;
        wait_for(&mut bob_events, |e| matches!(e, ChatEvent::FriendSelected { .. })).await;

        alice.set_draft("hello").await.unwrap();
        let sent = alice.send_message().await.unwrap().unwrap();

        let event = wait_for(&mut bob_events, |e| {
            matches!(e, ChatEvent::MessagesUpdated { messages, .. } if !messages.is_empty())
        })
        .await;
        let ChatEvent::MessagesUpdated { conversation, messages } = event else {
            unreachable!()
        };
        assert_eq!(conversation.as_str(), "u1_u2");
        assert_eq!(messages, vec![sent]);

        let view = bob.view().await.unwrap();
        assert_eq!(view.header, "Chat with Alice");
        assert_eq!(view.bubbles.len(), 1);

        alice.shutdown().await;
        bob.shutdown().await;
    }

    #[tokio::test]
    async fn test_failures_reply_and_notify() {
        let (_store, alice, _bob) = spawn_pair().await;
        let mut events = alice.subscribe();

        alice.set_search_query("nobody@x.com").await.unwrap();
        let err = alice.search_and_add_user().await.unwrap_err();
        assert!(matches!(err, Error::UserNotFound(_)));
        wait_for(&mut events, |e| matches!(e, ChatEvent::Notice { .. })).await;

        let state = alice.state().await.unwrap();
        assert_eq!(state.search_query, "nobody@x.com");
    }

    #[tokio::test]
    async fn test_commands_after_shutdown() {
        let (store, alice, bob) = spawn_pair().await;
        alice.shutdown().await;
        bob.shutdown().await;

        assert!(alice.is_closed());
        assert!(matches!(alice.state().await, Err(Error::SessionClosed)));
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_shutdown_waits_for_task() {
        let (store, alice, _bob) = spawn_pair().await;
        let other = alice.clone();
        assert_eq!(store.listener_count(), 2);

        tokio::join!(alice.shutdown(), other.shutdown());
        // Only Bob's friends feed is left.
        assert_eq!(store.listener_count(), 1);
        assert!(other.is_closed());
    }
}
