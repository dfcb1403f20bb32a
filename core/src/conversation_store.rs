/// Conversation persistence: buyer/seller/listing triples in sled
/// Two key families: "pair:{listing}:{buyer}" -> conversation id (the
/// uniqueness row) and "id:{conversation}" -> JSON record.
use crate::chat_types::Conversation;
use crate::error::{ChatError, Result};
use sled::transaction::TransactionError;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct ConversationStore {
    db: Arc<sled::Db>,
}

impl ConversationStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("conversations.db");
        let db = sled::open(&db_path)
            .map_err(|e| ChatError::Storage(format!("Failed to open conversations DB: {}", e)))?;

        info!("Conversation store initialized at {:?}", db_path);
        Ok(Self { db: Arc::new(db) })
    }

    fn pair_key(listing_id: &str, buyer_id: &str) -> String {
        format!("pair:{}:{}", listing_id, buyer_id)
    }

    fn id_key(conversation_id: &str) -> String {
        format!("id:{}", conversation_id)
    }

    /// Insert-or-fetch for the (listing, buyer) pair. `fresh` is the record
    /// to install when the pair is new; returns the surviving record plus a
    /// created flag. Record and pair rows commit in one transaction, so two
    /// racing creates converge on one conversation id and a loser's record
    /// never lands.
    pub fn create_or_fetch(&self, fresh: Conversation) -> Result<(Conversation, bool)> {
        let pair_key = Self::pair_key(&fresh.listing_id, &fresh.buyer_id);

        if let Some(existing) = self.lookup_pair_key(&pair_key)? {
            return Ok((existing, false));
        }

        let id_key = Self::id_key(&fresh.id);
        let val = serde_json::to_vec(&fresh).map_err(ChatError::Serialization)?;
        let claimed = self
            .db
            .transaction(|tx| {
                if let Some(winner) = tx.get(pair_key.as_bytes())? {
                    return Ok(Some(winner));
                }
                tx.insert(id_key.as_bytes(), val.as_slice())?;
                tx.insert(pair_key.as_bytes(), fresh.id.as_bytes())?;
                Ok(None)
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => {
                    ChatError::Storage(format!("claim pair: {}", e))
                }
            })?;

        match claimed {
            None => {
                self.db
                    .flush()
                    .map_err(|e| ChatError::Storage(format!("flush conversations: {}", e)))?;
                debug!(
                    "Created conversation {} for listing {} buyer {}",
                    fresh.id, fresh.listing_id, fresh.buyer_id
                );
                Ok((fresh, true))
            }
            Some(winner) => {
                // Lost the race; hand back the winner's record.
                let winner_id = String::from_utf8(winner.to_vec()).map_err(|_| {
                    ChatError::Storage("pair row holds invalid conversation id".to_string())
                })?;
                let conv = self.get(&winner_id)?.ok_or_else(|| {
                    ChatError::Storage(format!(
                        "pair row points at missing conversation {}",
                        winner_id
                    ))
                })?;
                Ok((conv, false))
            }
        }
    }

    /// Look up the conversation for a (listing, buyer) pair.
    pub fn find_pair(&self, listing_id: &str, buyer_id: &str) -> Result<Option<Conversation>> {
        self.lookup_pair_key(&Self::pair_key(listing_id, buyer_id))
    }

    fn lookup_pair_key(&self, pair_key: &str) -> Result<Option<Conversation>> {
        let id = self
            .db
            .get(pair_key.as_bytes())
            .map_err(|e| ChatError::Storage(format!("get pair: {}", e)))?;
        match id {
            Some(v) => {
                let conv_id = String::from_utf8(v.to_vec()).map_err(|_| {
                    ChatError::Storage("pair row holds invalid conversation id".to_string())
                })?;
                self.get(&conv_id)
            }
            None => Ok(None),
        }
    }

    pub fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let key = Self::id_key(conversation_id);
        match self
            .db
            .get(key.as_bytes())
            .map_err(|e| ChatError::Storage(format!("get conversation: {}", e)))?
        {
            Some(val) => {
                let conv =
                    serde_json::from_slice::<Conversation>(&val).map_err(ChatError::Serialization)?;
                Ok(Some(conv))
            }
            None => Ok(None),
        }
    }

    /// All conversations where `user_id` is buyer or seller, newest activity
    /// first. Finite snapshot; live updates come from the change feed.
    pub fn for_user(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(b"id:") {
            let (_, val) =
                entry.map_err(|e| ChatError::Storage(format!("scan conversations: {}", e)))?;
            if let Ok(conv) = serde_json::from_slice::<Conversation>(&val) {
                if conv.has_participant(user_id) {
                    out.push(conv);
                }
            }
        }
        out.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(out)
    }

    /// Advance last_message_at to `at_ms` unless that would move it
    /// backwards. Atomic read-modify-write on the record row.
    pub fn bump_last_message(
        &self,
        conversation_id: &str,
        at_ms: i64,
    ) -> Result<Option<Conversation>> {
        let key = Self::id_key(conversation_id);
        let updated = self
            .db
            .update_and_fetch(key.as_bytes(), |old| {
                let bytes = old?;
                match serde_json::from_slice::<Conversation>(bytes) {
                    Ok(mut conv) => {
                        if at_ms > conv.last_message_at {
                            conv.last_message_at = at_ms;
                        }
                        serde_json::to_vec(&conv).ok().or_else(|| Some(bytes.to_vec()))
                    }
                    // Unparseable rows are left untouched
                    Err(_) => Some(bytes.to_vec()),
                }
            })
            .map_err(|e| ChatError::Storage(format!("bump last_message_at: {}", e)))?;

        Ok(updated.and_then(|v| serde_json::from_slice::<Conversation>(&v).ok()))
    }

    pub fn count(&self) -> usize {
        self.db.scan_prefix(b"id:").count()
    }
}
