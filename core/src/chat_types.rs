/// Shared types for the marketplace chat layer
use serde::{Deserialize, Serialize};

/// Longest message content accepted by the send path, in characters.
pub const MAX_MESSAGE_LEN: usize = 1000;

/// One buyer/seller thread attached to a single listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub listing_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    /// Millisecond epoch, assigned at creation
    pub created_at: i64,
    /// Millisecond epoch of the newest message; never moves backwards
    pub last_message_at: i64,
}

impl Conversation {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// The counterpart of `user_id`, if they participate at all.
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        if self.buyer_id == user_id {
            Some(&self.seller_id)
        } else if self.seller_id == user_id {
            Some(&self.buyer_id)
        } else {
            None
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    /// Millisecond epoch; defines display order within a conversation
    pub created_at: i64,
    /// False until the counterpart loads the conversation
    pub is_read: bool,
}

/// Total display order: created_at ascending, ties broken by id.
pub fn message_order(a: &Message, b: &Message) -> std::cmp::Ordering {
    a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
}

/// Listing fields the chat UI shows (title line, price, thumbnail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingSummary {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub images: Vec<String>,
}

/// Public profile fields shown next to messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicProfile {
    pub id: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
}

/// A conversation enriched for the sidebar: listing summary, both
/// participants, and the newest message as a preview. Enrichment fields are
/// optional because listings and profiles may be deleted out from under a
/// conversation, which itself persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub listing: Option<ListingSummary>,
    pub buyer: Option<PublicProfile>,
    pub seller: Option<PublicProfile>,
    pub last_message: Option<Message>,
}

/// Change-feed events streamed over SSE (/events endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MessageChange {
    /// A new message row was written
    Insert { message: Message },
    /// An existing row changed (read-state transition)
    Update { message: Message },
}

impl MessageChange {
    pub fn message(&self) -> &Message {
        match self {
            MessageChange::Insert { message } => message,
            MessageChange::Update { message } => message,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, MessageChange::Insert { .. })
    }
}

/// Fresh opaque id (UUID v4 as a string)
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Millisecond epoch now
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// RFC3339 rendering of a millisecond epoch, for display surfaces
pub fn ms_to_rfc3339(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}
