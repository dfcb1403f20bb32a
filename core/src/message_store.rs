/// Message persistence: append-only per-conversation log in sled
/// Keys are "{conversation}/{created_at_ms:020}/{message_id}" so a prefix
/// scan yields the (created_at, id) display order directly.
use crate::chat_types::Message;
use crate::error::{ChatError, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct MessageStore {
    db: Arc<sled::Db>,
}

impl MessageStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("messages.db");
        let db = sled::open(&db_path)
            .map_err(|e| ChatError::Storage(format!("Failed to open messages DB: {}", e)))?;

        info!("Message store initialized at {:?}", db_path);
        Ok(Self { db: Arc::new(db) })
    }

    fn msg_key(conversation_id: &str, created_at: i64, message_id: &str) -> String {
        format!("{}/{:020}/{}", conversation_id, created_at, message_id)
    }

    fn conv_prefix(conversation_id: &str) -> String {
        format!("{}/", conversation_id)
    }

    /// Write one message row. Participant and content checks happen in the
    /// service; the store takes the row as given.
    pub fn append(&self, msg: &Message) -> Result<()> {
        let key = Self::msg_key(&msg.conversation_id, msg.created_at, &msg.id);
        let val = serde_json::to_vec(msg).map_err(ChatError::Serialization)?;
        self.db
            .insert(key.as_bytes(), val)
            .map_err(|e| ChatError::Storage(format!("append message: {}", e)))?;
        debug!("Appended message {} to {}", msg.id, msg.conversation_id);
        Ok(())
    }

    /// All messages of one conversation in display order.
    pub fn for_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let prefix = Self::conv_prefix(conversation_id);
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, val) = entry.map_err(|e| ChatError::Storage(format!("scan messages: {}", e)))?;
            if let Ok(msg) = serde_json::from_slice::<Message>(&val) {
                out.push(msg);
            }
        }
        Ok(out)
    }

    /// Newest message of a conversation, for the sidebar preview.
    pub fn last_for_conversation(&self, conversation_id: &str) -> Result<Option<Message>> {
        let prefix = Self::conv_prefix(conversation_id);
        for entry in self.db.scan_prefix(prefix.as_bytes()).rev() {
            let (_, val) = entry.map_err(|e| ChatError::Storage(format!("scan messages: {}", e)))?;
            if let Ok(msg) = serde_json::from_slice::<Message>(&val) {
                return Ok(Some(msg));
            }
        }
        Ok(None)
    }

    /// Mark every message in the conversation not authored by `reader_id` as
    /// read. One atomic batch; idempotent. Returns the rows that changed.
    pub fn mark_read(&self, conversation_id: &str, reader_id: &str) -> Result<Vec<Message>> {
        let prefix = Self::conv_prefix(conversation_id);
        let mut batch = sled::Batch::default();
        let mut updated = Vec::new();

        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, val) =
                entry.map_err(|e| ChatError::Storage(format!("scan messages: {}", e)))?;
            let mut msg = match serde_json::from_slice::<Message>(&val) {
                Ok(m) => m,
                Err(_) => continue,
            };
            if msg.sender_id != reader_id && !msg.is_read {
                msg.is_read = true;
                let patched = serde_json::to_vec(&msg).map_err(ChatError::Serialization)?;
                batch.insert(key.to_vec(), patched);
                updated.push(msg);
            }
        }

        if !updated.is_empty() {
            self.db
                .apply_batch(batch)
                .map_err(|e| ChatError::Storage(format!("mark read: {}", e)))?;
            debug!(
                "Marked {} messages read in {} for {}",
                updated.len(),
                conversation_id,
                reader_id
            );
        }
        Ok(updated)
    }

    /// True if the conversation holds at least one unread message not
    /// authored by `user_id`. Early-exits on the first hit.
    pub fn has_unread(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        let prefix = Self::conv_prefix(conversation_id);
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, val) = entry.map_err(|e| ChatError::Storage(format!("scan messages: {}", e)))?;
            if let Ok(msg) = serde_json::from_slice::<Message>(&val) {
                if !msg.is_read && msg.sender_id != user_id {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Distinct conversations among `conversation_ids` holding unread
    /// messages for `user_id`. Counts conversations, not messages.
    pub fn unread_conversations(&self, user_id: &str, conversation_ids: &[String]) -> Result<usize> {
        let mut n = 0;
        for conv_id in conversation_ids {
            if self.has_unread(conv_id, user_id)? {
                n += 1;
            }
        }
        Ok(n)
    }

    pub fn count(&self) -> usize {
        self.db.len()
    }
}
