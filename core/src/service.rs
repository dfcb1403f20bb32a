/// Chat service: the server-side source of truth
/// Owns both stores, the directory seam, and the change feed. Every
/// operation takes the caller's session and re-checks participation here;
/// client-supplied membership claims are never trusted.
use crate::change_feed::ChangeFeed;
use crate::chat_types::{
    new_id, now_ms, Conversation, ConversationView, Message, MessageChange, MAX_MESSAGE_LEN,
};
use crate::conversation_store::ConversationStore;
use crate::directory::Directory;
use crate::error::{ChatError, Result};
use crate::message_store::MessageStore;
use crate::session::AuthSession;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct ChatService {
    conversations: ConversationStore,
    messages: MessageStore,
    directory: Arc<dyn Directory>,
    feed: ChangeFeed,
}

impl ChatService {
    pub fn new(
        data_dir: &Path,
        directory: Arc<dyn Directory>,
        feed_capacity: usize,
    ) -> Result<Self> {
        let conversations = ConversationStore::new(data_dir)?;
        let messages = MessageStore::new(data_dir)?;
        let feed = ChangeFeed::new(feed_capacity);
        info!("Chat service ready, data dir {:?}", data_dir);
        Ok(Self {
            conversations,
            messages,
            directory,
            feed,
        })
    }

    /// The table-wide change feed (SSE hands out raw subscriptions,
    /// controllers take scoped ones).
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Find or lazily create the conversation for (listing, caller). The
    /// caller becomes the buyer; the listing's current owner the seller.
    /// Returns the view plus whether a new conversation was created.
    pub async fn get_or_create_conversation(
        &self,
        session: &AuthSession,
        listing_id: &str,
    ) -> Result<(ConversationView, bool)> {
        let owner = self
            .directory
            .listing_owner(listing_id)
            .await
            .ok_or_else(|| ChatError::NotFound(format!("listing {}", listing_id)))?;

        if owner == session.user_id {
            return Err(ChatError::Conflict(
                "cannot start a conversation on your own listing".to_string(),
            ));
        }

        if let Some(existing) = self.conversations.find_pair(listing_id, &session.user_id)? {
            let view = self.enrich(existing).await?;
            return Ok((view, false));
        }

        let now = now_ms();
        let fresh = Conversation {
            id: new_id(),
            listing_id: listing_id.to_string(),
            buyer_id: session.user_id.clone(),
            seller_id: owner,
            created_at: now,
            last_message_at: now,
        };
        let (conv, created) = self.conversations.create_or_fetch(fresh)?;
        if created {
            info!(
                "Conversation {} opened on listing {} by {}",
                conv.id, conv.listing_id, conv.buyer_id
            );
        }
        let view = self.enrich(conv).await?;
        Ok((view, created))
    }

    /// All of the caller's conversations, newest activity first, enriched
    /// for the sidebar.
    pub async fn conversations_for(&self, session: &AuthSession) -> Result<Vec<ConversationView>> {
        let convs = self.conversations.for_user(&session.user_id)?;
        let mut out = Vec::with_capacity(convs.len());
        for conv in convs {
            out.push(self.enrich(conv).await?);
        }
        Ok(out)
    }

    /// One conversation, enriched, for the deep-link path.
    pub async fn conversation_view(
        &self,
        session: &AuthSession,
        conversation_id: &str,
    ) -> Result<ConversationView> {
        let conv = self.participant_conversation(session, conversation_id)?;
        self.enrich(conv).await
    }

    /// The full message list of a conversation, in display order. Loading it
    /// marks the counterpart's messages read (one atomic batch) and the
    /// returned list reflects the post-marking state.
    pub async fn messages_for(
        &self,
        session: &AuthSession,
        conversation_id: &str,
    ) -> Result<Vec<Message>> {
        self.participant_conversation(session, conversation_id)?;

        let updated = self.messages.mark_read(conversation_id, &session.user_id)?;
        for message in updated {
            self.feed.publish(MessageChange::Update { message });
        }

        self.messages.for_conversation(conversation_id)
    }

    /// Append one message. Content is trimmed, must be non-empty and at most
    /// MAX_MESSAGE_LEN characters. Bumps the conversation's last_message_at
    /// and publishes an insert event.
    pub async fn send_message(
        &self,
        session: &AuthSession,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message> {
        self.participant_conversation(session, conversation_id)?;

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ChatError::Validation(
                "message content is required".to_string(),
            ));
        }
        if trimmed.chars().count() > MAX_MESSAGE_LEN {
            return Err(ChatError::Validation(format!(
                "message content exceeds {} characters",
                MAX_MESSAGE_LEN
            )));
        }

        let message = Message {
            id: new_id(),
            conversation_id: conversation_id.to_string(),
            sender_id: session.user_id.clone(),
            content: trimmed.to_string(),
            created_at: now_ms(),
            is_read: false,
        };
        self.messages.append(&message)?;
        self.conversations
            .bump_last_message(conversation_id, message.created_at)?;
        self.feed.publish(MessageChange::Insert {
            message: message.clone(),
        });
        debug!("Message {} sent in {}", message.id, conversation_id);
        Ok(message)
    }

    /// Distinct conversations holding unread messages for the caller.
    /// Derived by scan on demand, nothing cached.
    pub async fn unread_conversation_count(&self, session: &AuthSession) -> Result<usize> {
        let convs = self.conversations.for_user(&session.user_id)?;
        let ids: Vec<String> = convs.into_iter().map(|c| c.id).collect();
        self.messages.unread_conversations(&session.user_id, &ids)
    }

    fn participant_conversation(
        &self,
        session: &AuthSession,
        conversation_id: &str,
    ) -> Result<Conversation> {
        let conv = self
            .conversations
            .get(conversation_id)?
            .ok_or_else(|| ChatError::NotFound(format!("conversation {}", conversation_id)))?;
        if !conv.has_participant(&session.user_id) {
            return Err(ChatError::Forbidden(
                "not a participant of this conversation".to_string(),
            ));
        }
        Ok(conv)
    }

    async fn enrich(&self, conv: Conversation) -> Result<ConversationView> {
        let listing = self.directory.listing_summary(&conv.listing_id).await;
        let buyer = self.directory.public_profile(&conv.buyer_id).await;
        let seller = self.directory.public_profile(&conv.seller_id).await;
        let last_message = self.messages.last_for_conversation(&conv.id)?;
        Ok(ConversationView {
            conversation: conv,
            listing,
            buyer,
            seller,
            last_message,
        })
    }
}
