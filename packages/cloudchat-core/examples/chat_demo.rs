//! # Chat Demo
//!
//! Two users on an in-process store:
//! 1. Alice and Bob register in the directory
//! 2. Bob finds Alice by email and adds her
//! 3. Alice's session picks up the new friend and opens the conversation
//! 4. They exchange messages, and Alice deletes one of hers
//!
//! ## Run
//!
//! ```bash
//! RUST_LOG=cloudchat_core=debug cargo run --example chat_demo
//! ```

use std::sync::Arc;

use cloudchat_core::{
    ChatConfig, ChatSession, ChatView, MemoryStore, RealtimeStore, Session, User, UserDirectory,
    UserId,
};
use tracing_subscriber::EnvFilter;

fn print_view(who: &str, view: &ChatView) {
    println!("   [{}] {}", who, view.header);
    for item in &view.sidebar {
        let marker = if item.selected { ">" } else { " " };
        println!("   [{}]  {} {}", who, marker, item.name);
    }
    for bubble in &view.bubbles {
        let author = if bubble.own { "me" } else { "them" };
        let delete = if bubble.deletable { " [x]" } else { "" };
        println!(
            "   [{}]    {} {:>4}: {}{}",
            who, bubble.time_label, author, bubble.text, delete
        );
    }
    println!();
}

#[tokio::main]
async fn main() -> cloudchat_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    println!("=================================================");
    println!("              CLOUDCHAT CORE DEMO");
    println!("=================================================\n");

    // =========================================================================
    // STEP 1: Register users
    // =========================================================================
    println!("1. Registering Alice and Bob...\n");

    let store = MemoryStore::new();
    let shared: Arc<dyn RealtimeStore> = Arc::new(store.clone());
    let directory = UserDirectory::new(shared.clone());

    let alice_id = UserId::new("u1")?;
    let bob_id = UserId::new("u2")?;
    directory
        .register(&User::new(alice_id.clone(), "Alice", "a@x.com"))
        .await?;
    directory
        .register(&User::new(bob_id.clone(), "Bob", "b@x.com"))
        .await?;

    let mut alice = ChatSession::new(shared.clone(), Session::new(alice_id), ChatConfig::default());
    let mut bob = ChatSession::new(shared, Session::new(bob_id), ChatConfig::default());
    alice.mount().await?;
    bob.mount().await?;
    alice.next_update().await;
    bob.next_update().await;

    // =========================================================================
    // STEP 2: Bob adds Alice by email
    // =========================================================================
    println!("2. Bob searches for a@x.com...\n");

    bob.set_search_query("a@x.com");
    if let Some(friend) = bob.search_and_add_user().await? {
        println!("   Bob added {} ({})\n", friend.name, friend.id);
    }

    // Friend list update, then the auto-opened conversation's first emission.
    for _ in 0..2 {
        alice.next_update().await;
        bob.next_update().await;
    }

    // =========================================================================
    // STEP 3: Exchange messages
    // =========================================================================
    println!("3. Exchanging messages...\n");

    alice.set_draft("hi Bob!");
    let first = alice.send_message().await?;
    alice.next_update().await;
    bob.next_update().await;

    bob.set_draft("hey Alice");
    bob.send_message().await?;
    alice.next_update().await;
    bob.next_update().await;

    print_view("alice", &alice.view());
    print_view("bob", &bob.view());

    // =========================================================================
    // STEP 4: Delete
    // =========================================================================
    println!("4. Alice deletes her first message...\n");

    if let Some(first) = first {
        alice.delete_message(&first.id).await?;
        alice.next_update().await;
        bob.next_update().await;
    }
    print_view("bob", &bob.view());

    alice.shutdown();
    bob.shutdown();
    println!("   Store writes: {}", store.write_count());
    println!("\n=================================================");
    println!("                  DEMO COMPLETE");
    println!("=================================================");
    Ok(())
}
