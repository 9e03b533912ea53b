//! Local chat state.
//!
//! Everything here is process-local and lost when the session ends; the
//! remote store stays the source of truth for friends and messages.

use crate::friends::Friend;
use crate::identity::UserId;
use crate::messaging::{ConversationId, ImageAttachment, Message};

/// Snapshot of what the chat screen shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    /// Friend list, in store key order
    pub friends: Vec<Friend>,
    /// Friend whose conversation is open
    pub selected: Option<UserId>,
    /// Conversation with the selected friend
    pub conversation: Option<ConversationId>,
    /// Messages of the open conversation, in store key order
    pub messages: Vec<Message>,
    /// Text being composed
    pub draft: String,
    /// Image picked for the next message
    pub pending_image: Option<ImageAttachment>,
    /// Email typed into the friend search box
    pub search_query: String,
}

impl ChatState {
    /// The selected friend's list entry, if they are still in the list.
    pub fn selected_friend(&self) -> Option<&Friend> {
        let selected = self.selected.as_ref()?;
        self.friends.iter().find(|f| &f.id == selected)
    }

    /// Whether a conversation is open to send into.
    pub fn can_send(&self) -> bool {
        self.selected.is_some()
    }

    /// Whether there is anything to send.
    pub fn has_content(&self) -> bool {
        !self.draft.is_empty() || self.pending_image.is_some()
    }

    pub(crate) fn close_conversation(&mut self) {
        self.selected = None;
        self.conversation = None;
        self.messages.clear();
    }
}
