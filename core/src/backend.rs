/// The seam between session controllers and the source of truth.
/// `ChatService` implements it in-process; tests wrap it to inject
/// failures on command.
use crate::chat_types::{ConversationView, Message};
use crate::error::Result;
use crate::service::ChatService;
use crate::session::AuthSession;
use async_trait::async_trait;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn get_or_create_conversation(
        &self,
        session: &AuthSession,
        listing_id: &str,
    ) -> Result<(ConversationView, bool)>;

    async fn conversations_for(&self, session: &AuthSession) -> Result<Vec<ConversationView>>;

    async fn conversation_view(
        &self,
        session: &AuthSession,
        conversation_id: &str,
    ) -> Result<ConversationView>;

    /// Ordered message list; loading marks the counterpart's rows read.
    async fn messages_for(
        &self,
        session: &AuthSession,
        conversation_id: &str,
    ) -> Result<Vec<Message>>;

    async fn send_message(
        &self,
        session: &AuthSession,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message>;

    async fn unread_conversation_count(&self, session: &AuthSession) -> Result<usize>;
}

#[async_trait]
impl ChatBackend for ChatService {
    async fn get_or_create_conversation(
        &self,
        session: &AuthSession,
        listing_id: &str,
    ) -> Result<(ConversationView, bool)> {
        ChatService::get_or_create_conversation(self, session, listing_id).await
    }

    async fn conversations_for(&self, session: &AuthSession) -> Result<Vec<ConversationView>> {
        ChatService::conversations_for(self, session).await
    }

    async fn conversation_view(
        &self,
        session: &AuthSession,
        conversation_id: &str,
    ) -> Result<ConversationView> {
        ChatService::conversation_view(self, session, conversation_id).await
    }

    async fn messages_for(
        &self,
        session: &AuthSession,
        conversation_id: &str,
    ) -> Result<Vec<Message>> {
        ChatService::messages_for(self, session, conversation_id).await
    }

    async fn send_message(
        &self,
        session: &AuthSession,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message> {
        ChatService::send_message(self, session, conversation_id, content).await
    }

    async fn unread_conversation_count(&self, session: &AuthSession) -> Result<usize> {
        ChatService::unread_conversation_count(self, session).await
    }
}
