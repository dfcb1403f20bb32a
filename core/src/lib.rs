/// Quadmart - Campus Marketplace Messaging Core
///
/// Real-time buyer/seller chat for a campus marketplace: per-listing
/// conversations, live delivery over a broadcast change feed, unread
/// accounting, and optimistic send with rollback.

pub mod error;
pub mod config;
pub mod chat_types;
pub mod session;
pub mod directory;
pub mod conversation_store;
pub mod message_store;
pub mod change_feed;
pub mod service;
pub mod backend;
pub mod controller;
pub mod chat_api;
pub mod cli_app;
pub mod seed;

pub use backend::ChatBackend;
pub use change_feed::{ChangeFeed, ScopedFeed};
pub use config::Config;
pub use controller::ChatController;
pub use directory::{Directory, InMemoryDirectory};
pub use error::{ChatError, Result};
pub use seed::seed_demo;
pub use service::ChatService;
pub use session::{AuthProvider, AuthSession, StaticTokens};
