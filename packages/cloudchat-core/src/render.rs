//! Rendering.
//!
//! Pure projection of [`ChatState`] into view models. No I/O, no clock reads
//! other than the time zone used for labels.

use chrono::{Local, TimeZone};

use crate::chat::ChatState;
use crate::identity::UserId;

/// Header name used when no friend is selected.
pub const FALLBACK_PEER_NAME: &str = "User";

/// One row of the friend sidebar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebarItem {
    /// Friend id
    pub id: UserId,
    /// Friend name
    pub name: String,
    /// Highlighted as the open conversation
    pub selected: bool,
    /// Unread marker placeholder
    pub has_new_messages: bool,
}

/// One message bubble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBubble {
    /// Message id
    pub id: String,
    /// Message text
    pub text: String,
    /// Image to show above the text
    pub image_url: Option<String>,
    /// `HH:MM` send time
    pub time_label: String,
    /// Written by the current user
    pub own: bool,
    /// Shows a delete affordance
    pub deletable: bool,
}

/// Everything the chat screen draws.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatView {
    /// Friend list
    pub sidebar: Vec<SidebarItem>,
    /// `Chat with {name}`
    pub header: String,
    /// Messages in store order
    pub bubbles: Vec<MessageBubble>,
    /// Composer text
    pub draft: String,
    /// An image is waiting to be sent
    pub has_pending_image: bool,
    /// Search box text
    pub search_query: String,
    /// Composer is enabled
    pub can_send: bool,
}

/// Render `state` for `self_id` with local-time labels.
pub fn render(state: &ChatState, self_id: &UserId) -> ChatView {
    render_in(state, self_id, &Local)
}

/// Render `state` for `self_id` with labels in `tz`.
pub fn render_in<Tz: TimeZone>(state: &ChatState, self_id: &UserId, tz: &Tz) -> ChatView
where
    Tz::Offset: std::fmt::Display,
{
    let sidebar = state
        .friends
        .iter()
        .map(|friend| SidebarItem {
            id: friend.id.clone(),
            name: friend.name.clone(),
            selected: state.selected.as_ref() == Some(&friend.id),
            has_new_messages: friend.has_new_messages,
        })
        .collect();

    // Bubbles follow store order; timestamps are client clocks and may
    // disagree with it.
    let bubbles = state
        .messages
        .iter()
        .map(|message| {
            let own = message.is_from(self_id);
            MessageBubble {
                id: message.id.clone(),
                text: message.text.clone(),
                image_url: message.image_url.clone(),
                time_label: time_label(message.timestamp, tz),
                own,
                deletable: own,
            }
        })
        .collect();

    ChatView {
        sidebar,
        header: header(state),
        bubbles,
        draft: state.draft.clone(),
        has_pending_image: state.pending_image.is_some(),
        search_query: state.search_query.clone(),
        can_send: state.can_send(),
    }
}

fn header(state: &ChatState) -> String {
    let name = state
        .selected_friend()
        .map(|f| f.name.as_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(FALLBACK_PEER_NAME);
    format!("Chat with {}", name)
}

/// `HH:MM` for a Unix-millisecond timestamp in `tz`; empty if out of range.
pub fn time_label<Tz: TimeZone>(timestamp_millis: i64, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    tz.timestamp_millis_opt(timestamp_millis)
        .single()
        .map(|time| time.format("%H:%M").to_string())
        .unwrap_or_default()
}
