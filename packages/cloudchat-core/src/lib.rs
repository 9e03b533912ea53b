//! # CloudChat Core
//!
//! Client core for a chat app that keeps all of its data in a hosted realtime
//! document database. Friends, conversations and messages are plain nodes in
//! that database; this crate subscribes to them, writes to them, and renders
//! the result.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CLOUDCHAT CORE MODULES                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Chat (ChatSession / ChatHandle)                                │   │
//! │  │  local state, auto-select, composer, search box, notices        │   │
//! │  └──────┬──────────────────┬──────────────────┬─────────────┬──────┘   │
//! │         │                  │                  │             │           │
//! │  ┌──────▼──────┐  ┌────────▼──────┐  ┌────────▼─────┐ ┌─────▼──────┐   │
//! │  │   Friends   │  │   Messaging   │  │  Directory   │ │   Render   │   │
//! │  │             │  │               │  │              │ │            │   │
//! │  │ - Projection│  │ - Conv. ids   │  │ - Register   │ │ - Sidebar  │   │
//! │  │ - Add/remove│  │ - Send/delete │  │ - Lookup     │ │ - Bubbles  │   │
//! │  │   edges     │  │ - Attachments │  │ - By email   │ │ - Header   │   │
//! │  └──────┬──────┘  └───────┬───────┘  └──────┬───────┘ └────────────┘   │
//! │         └─────────────────┼─────────────────┘                          │
//! │                           │                                            │
//! │  ┌────────────────────────▼────────────────────────────────────────┐   │
//! │  │  Store (RealtimeStore trait)                                    │   │
//! │  │  MemoryStore (in-process)   │   RestStore (REST + SSE)          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Session and backend configuration
//! - [`time`] - Clocks for timestamps and push ids
//! - [`store`] - Realtime database boundary and its backends
//! - [`subscription`] - Live feeds with deterministic disposal
//! - [`identity`] - User ids and the signed-in session
//! - [`directory`] - User records and email lookup
//! - [`friends`] - Friend list projection and friendship edges
//! - [`messaging`] - Conversation ids, composer, image attachments
//! - [`chat`] - The chat session state machine
//! - [`render`] - View models for the chat screen
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cloudchat_core::{ChatConfig, ChatSession, RestStore, Session, UserId};
//!
//! # async fn run() -> cloudchat_core::Result<()> {
//! let store = Arc::new(RestStore::from_env()?);
//! let me = Session::new(UserId::new("u1")?);
//! let mut chat = ChatSession::new(store, me, ChatConfig::default());
//!
//! chat.mount().await?;
//! while chat.next_update().await {
//!     let view = chat.view();
//!     println!("{} ({} messages)", view.header, view.bubbles.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod chat;
pub mod config;
pub mod directory;
pub mod error;
pub mod friends;
pub mod identity;
pub mod messaging;
pub mod render;
pub mod store;
pub mod subscription;
/// Clocks for message timestamps and push ids.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use chat::{ChatEvent, ChatHandle, ChatSession, ChatState};
pub use config::{ChatConfig, RestStoreConfig};
pub use directory::UserDirectory;
pub use error::{Error, ErrorKind, Result};
pub use friends::{Friend, FriendsService};
pub use identity::{Session, User, UserId};
pub use messaging::{
    ConversationId, HttpObjectStore, ImageAttachment, MemoryObjectStore, Message,
    MessagingService, ObjectStore,
};
pub use render::ChatView;
pub use store::{MemoryStore, RealtimeStore, RestStore, Snapshot, StorePath};
pub use subscription::Subscription;

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of CloudChat Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================
