/// Session controller tests
/// Optimistic sends, feed merging, and stale-result discard over a real
/// service, with a wrapper backend that injects failures and delays

// In integration tests, the package is available as an external crate
extern crate quadmart_core;

use async_trait::async_trait;
use quadmart_core::chat_types::{
    Conversation, ConversationView, ListingSummary, Message, MessageChange, PublicProfile,
};
use quadmart_core::controller::Phase;
use quadmart_core::{
    AuthSession, ChatBackend, ChatController, ChatError, ChatService, InMemoryDirectory, Result,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

/// Delegates to a real service, with knobs to delay loads/sends and to make
/// sends fail.
struct FlakyBackend {
    inner: ChatService,
    fail_sends: AtomicBool,
    send_delay_ms: AtomicU64,
    confirm_delay_ms: AtomicU64,
    load_delay_ms: AtomicU64,
}

impl FlakyBackend {
    fn new(inner: ChatService) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_sends: AtomicBool::new(false),
            send_delay_ms: AtomicU64::new(0),
            confirm_delay_ms: AtomicU64::new(0),
            load_delay_ms: AtomicU64::new(0),
        })
    }

    fn fail_sends(&self, on: bool) {
        self.fail_sends.store(on, Ordering::SeqCst);
    }

    fn send_delay(&self, ms: u64) {
        self.send_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Delay the send response only; the message still commits right away.
    fn confirm_delay(&self, ms: u64) {
        self.confirm_delay_ms.store(ms, Ordering::SeqCst);
    }

    fn load_delay(&self, ms: u64) {
        self.load_delay_ms.store(ms, Ordering::SeqCst);
    }

    async fn stall(ms: u64) {
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl ChatBackend for FlakyBackend {
    async fn get_or_create_conversation(
        &self,
        session: &AuthSession,
        listing_id: &str,
    ) -> Result<(ConversationView, bool)> {
        self.inner.get_or_create_conversation(session, listing_id).await
    }

    async fn conversations_for(&self, session: &AuthSession) -> Result<Vec<ConversationView>> {
        self.inner.conversations_for(session).await
    }

    async fn conversation_view(
        &self,
        session: &AuthSession,
        conversation_id: &str,
    ) -> Result<ConversationView> {
        self.inner.conversation_view(session, conversation_id).await
    }

    async fn messages_for(
        &self,
        session: &AuthSession,
        conversation_id: &str,
    ) -> Result<Vec<Message>> {
        Self::stall(self.load_delay_ms.load(Ordering::SeqCst)).await;
        self.inner.messages_for(session, conversation_id).await
    }

    async fn send_message(
        &self,
        session: &AuthSession,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message> {
        Self::stall(self.send_delay_ms.load(Ordering::SeqCst)).await;
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChatError::Timeout("injected send failure".to_string()));
        }
        let sent = self.inner.send_message(session, conversation_id, content).await;
        Self::stall(self.confirm_delay_ms.load(Ordering::SeqCst)).await;
        sent
    }

    async fn unread_conversation_count(&self, session: &AuthSession) -> Result<usize> {
        self.inner.unread_conversation_count(session).await
    }
}

/// Serves one canned conversation and message list, so a test can hand-pick
/// row ids and timestamps.
struct CannedBackend {
    view: ConversationView,
    messages: Vec<Message>,
    send_id: String,
    send_at: i64,
}

#[async_trait]
impl ChatBackend for CannedBackend {
    async fn get_or_create_conversation(
        &self,
        _session: &AuthSession,
        _listing_id: &str,
    ) -> Result<(ConversationView, bool)> {
        Ok((self.view.clone(), false))
    }

    async fn conversations_for(&self, _session: &AuthSession) -> Result<Vec<ConversationView>> {
        Ok(vec![self.view.clone()])
    }

    async fn conversation_view(
        &self,
        _session: &AuthSession,
        _conversation_id: &str,
    ) -> Result<ConversationView> {
        Ok(self.view.clone())
    }

    async fn messages_for(
        &self,
        _session: &AuthSession,
        _conversation_id: &str,
    ) -> Result<Vec<Message>> {
        Ok(self.messages.clone())
    }

    async fn send_message(
        &self,
        session: &AuthSession,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message> {
        Ok(Message {
            id: self.send_id.clone(),
            conversation_id: conversation_id.to_string(),
            sender_id: session.user_id.clone(),
            content: content.to_string(),
            created_at: self.send_at,
            is_read: false,
        })
    }

    async fn unread_conversation_count(&self, _session: &AuthSession) -> Result<usize> {
        Ok(0)
    }
}

/// Two listings owned by the seller, one conversation already started by the
/// buyer on the first.
async fn setup() -> (TempDir, ChatService, String, AuthSession, AuthSession) {
    let temp_dir = TempDir::new().unwrap();
    let directory = InMemoryDirectory::new();

    directory
        .add_profile(PublicProfile {
            id: "seller-1".to_string(),
            full_name: "Maya Chen".to_string(),
            avatar_url: None,
        })
        .await;
    directory
        .add_profile(PublicProfile {
            id: "buyer-1".to_string(),
            full_name: "Dev Patel".to_string(),
            avatar_url: None,
        })
        .await;
    for (id, title) in [("listing-1", "Mini fridge"), ("listing-2", "Desk lamp")] {
        directory
            .add_listing(
                "seller-1",
                ListingSummary {
                    id: id.to_string(),
                    title: title.to_string(),
                    price: 20.0,
                    images: vec![],
                },
            )
            .await;
    }

    let service = ChatService::new(temp_dir.path(), Arc::new(directory), 64).unwrap();
    let buyer = AuthSession::new("buyer-1", "dev@campus.edu");
    let seller = AuthSession::new("seller-1", "maya@campus.edu");
    let (view, _) = service
        .get_or_create_conversation(&buyer, "listing-1")
        .await
        .unwrap();
    (temp_dir, service, view.conversation.id, buyer, seller)
}

#[tokio::test]
async fn test_open_view_then_select_conversation() {
    let (_dir, service, conv_id, buyer, seller) = setup().await;
    service
        .send_message(&seller, &conv_id, "still available")
        .await
        .unwrap();

    let ctl = ChatController::new(buyer, Arc::new(service.clone()));

    ctl.open_messages_view().await;
    assert_eq!(ctl.phase().await, Phase::ConversationsLoaded);
    let sidebar = ctl.sidebar().await;
    assert_eq!(sidebar.len(), 1);
    assert_eq!(sidebar[0].preview.as_deref(), Some("still available"));
    assert_eq!(ctl.unread_badge().await, 1);
    assert!(ctl.membership().read().await.contains(&conv_id));

    ctl.select_conversation(&conv_id).await;
    assert_eq!(ctl.phase().await, Phase::ConversationOpen(conv_id.clone()));
    let visible = ctl.visible_messages().await;
    assert_eq!(visible.len(), 1);
    assert!(!visible[0].is_pending());
    // Opening read the conversation, so the badge drops
    assert_eq!(ctl.unread_badge().await, 0);
    assert_eq!(service.unread_conversation_count(ctl.session()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_deep_link_opens_known_conversation_only() {
    let (_dir, service, conv_id, buyer, _seller) = setup().await;
    let ctl = ChatController::new(buyer, Arc::new(service.clone()));

    ctl.open_deep_link(&conv_id).await;
    assert_eq!(ctl.phase().await, Phase::ConversationOpen(conv_id));

    ctl.navigate_away().await;
    ctl.open_deep_link("conv-ghost").await;
    assert_eq!(ctl.phase().await, Phase::ConversationsLoaded);
}

#[tokio::test]
async fn test_optimistic_send_confirms_in_place() {
    let (_dir, service, conv_id, buyer, _seller) = setup().await;
    let ctl = ChatController::new(buyer, Arc::new(service.clone()));
    ctl.open_messages_view().await;
    ctl.select_conversation(&conv_id).await;

    ctl.set_draft("see you at 5").await;
    ctl.send().await;

    let visible = ctl.visible_messages().await;
    assert_eq!(visible.len(), 1);
    assert!(!visible[0].is_pending());
    assert_eq!(visible[0].content(), "see you at 5");
    assert_eq!(ctl.draft().await, "");
    assert!(ctl.last_error().await.is_none());
    let sidebar = ctl.sidebar().await;
    assert_eq!(sidebar[0].preview.as_deref(), Some("see you at 5"));
}

#[tokio::test]
async fn test_failed_send_restores_draft() {
    let (_dir, service, conv_id, buyer, _seller) = setup().await;
    let backend = FlakyBackend::new(service.clone());
    let ctl = ChatController::new(buyer, backend.clone());
    ctl.open_messages_view().await;
    ctl.select_conversation(&conv_id).await;

    backend.fail_sends(true);
    ctl.set_draft("retry me").await;
    ctl.send().await;

    // The optimistic entry is gone and the text is back in the draft
    assert!(ctl.visible_messages().await.is_empty());
    assert_eq!(ctl.draft().await, "retry me");
    assert!(ctl.last_error().await.is_some());
    // The sidebar bump is deliberately not rolled back
    assert_eq!(ctl.sidebar().await[0].preview.as_deref(), Some("retry me"));

    // Retrying the restored draft goes through
    backend.fail_sends(false);
    ctl.send().await;
    let visible = ctl.visible_messages().await;
    assert_eq!(visible.len(), 1);
    assert!(!visible[0].is_pending());
    assert_eq!(visible[0].content(), "retry me");
    assert!(ctl.last_error().await.is_none());
}

#[tokio::test]
async fn test_second_send_refused_while_first_in_flight() {
    let (_dir, service, conv_id, buyer, _seller) = setup().await;
    let backend = FlakyBackend::new(service.clone());
    let ctl = Arc::new(ChatController::new(buyer, backend.clone()));
    ctl.open_messages_view().await;
    ctl.select_conversation(&conv_id).await;

    backend.send_delay(150);
    ctl.set_draft("first").await;
    let slow = {
        let ctl = ctl.clone();
        tokio::spawn(async move { ctl.send().await })
    };
    sleep(Duration::from_millis(30)).await;

    // A second send while the first is in flight is refused outright
    ctl.set_draft("second").await;
    ctl.send().await;
    assert_eq!(ctl.draft().await, "second");
    assert_eq!(ctl.visible_messages().await.len(), 1);

    slow.await.unwrap();
    let visible = ctl.visible_messages().await;
    assert_eq!(visible.len(), 1);
    assert!(!visible[0].is_pending());
    assert_eq!(visible[0].content(), "first");
    assert_eq!(ctl.draft().await, "second");
}

#[tokio::test]
async fn test_late_load_discarded_after_navigate_away() {
    let (_dir, service, conv_id, buyer, _seller) = setup().await;
    let backend = FlakyBackend::new(service.clone());
    let ctl = Arc::new(ChatController::new(buyer, backend.clone()));
    ctl.open_messages_view().await;

    backend.load_delay(150);
    let slow = {
        let ctl = ctl.clone();
        let conv_id = conv_id.clone();
        tokio::spawn(async move { ctl.select_conversation(&conv_id).await })
    };
    sleep(Duration::from_millis(30)).await;
    ctl.navigate_away().await;
    slow.await.unwrap();

    // The stale load result must not resurrect the torn-down view
    assert_eq!(ctl.phase().await, Phase::Idle);
    assert!(ctl.sidebar().await.is_empty());
    assert!(ctl.visible_messages().await.is_empty());
    assert!(ctl.membership().read().await.is_empty());
}

#[tokio::test]
async fn test_stale_select_loses_to_newer_select() {
    let (_dir, service, conv_a, buyer, seller) = setup().await;
    let (view_b, _) = service
        .get_or_create_conversation(&buyer, "listing-2")
        .await
        .unwrap();
    let conv_b = view_b.conversation.id;
    service.send_message(&seller, &conv_a, "in A").await.unwrap();
    service.send_message(&seller, &conv_b, "in B").await.unwrap();

    let backend = FlakyBackend::new(service.clone());
    let ctl = Arc::new(ChatController::new(buyer, backend.clone()));
    ctl.open_messages_view().await;

    // First selection stalls; the user switches before it lands
    backend.load_delay(150);
    let slow = {
        let ctl = ctl.clone();
        let conv_a = conv_a.clone();
        tokio::spawn(async move { ctl.select_conversation(&conv_a).await })
    };
    sleep(Duration::from_millis(30)).await;
    backend.load_delay(0);
    ctl.select_conversation(&conv_b).await;
    slow.await.unwrap();

    assert_eq!(ctl.phase().await, Phase::ConversationOpen(conv_b));
    let visible = ctl.visible_messages().await;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].content(), "in B");
}

#[tokio::test]
async fn test_feed_insert_marks_sidebar_but_own_echo_does_not() {
    let (_dir, service, conv_id, buyer, seller) = setup().await;
    let ctl = Arc::new(ChatController::new(buyer.clone(), Arc::new(service.clone())));
    ctl.open_messages_view().await;
    let pump = ctl.spawn_feed_pump(ctl.scoped_feed(service.feed()));

    // Counterpart message: snippet, unread dot, badge
    service
        .send_message(&seller, &conv_id, "fresh offer")
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    let sidebar = ctl.sidebar().await;
    assert_eq!(sidebar[0].preview.as_deref(), Some("fresh offer"));
    assert!(sidebar[0].unread);
    assert_eq!(ctl.unread_badge().await, 1);
    assert_eq!(ctl.phase().await, Phase::ConversationsLoaded);

    // Open it so everything is read again
    ctl.select_conversation(&conv_id).await;
    ctl.navigate_away().await;
    ctl.open_messages_view().await;

    // An echo of the user's own send (another tab) bumps the snippet only
    service
        .send_message(&buyer, &conv_id, "sent elsewhere")
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    let sidebar = ctl.sidebar().await;
    assert_eq!(sidebar[0].preview.as_deref(), Some("sent elsewhere"));
    assert!(!sidebar[0].unread);
    assert_eq!(ctl.unread_badge().await, 0);

    pump.abort();
}

#[tokio::test]
async fn test_feed_insert_in_open_conversation_refetches() {
    let (_dir, service, conv_id, buyer, seller) = setup().await;
    let ctl = Arc::new(ChatController::new(buyer.clone(), Arc::new(service.clone())));
    ctl.open_messages_view().await;
    ctl.select_conversation(&conv_id).await;
    let pump = ctl.spawn_feed_pump(ctl.scoped_feed(service.feed()));

    service
        .send_message(&seller, &conv_id, "did you see this")
        .await
        .unwrap();
    sleep(Duration::from_millis(150)).await;

    // The arrival was refetched into the open view and read server-side
    let visible = ctl.visible_messages().await;
    assert_eq!(visible.len(), 1);
    assert!(!visible[0].is_pending());
    assert_eq!(visible[0].content(), "did you see this");
    assert!(!ctl.sidebar().await[0].unread);
    assert_eq!(ctl.unread_badge().await, 0);
    assert_eq!(service.unread_conversation_count(&buyer).await.unwrap(), 0);

    pump.abort();
}

#[tokio::test]
async fn test_pending_send_survives_feed_refetch() {
    let (_dir, service, conv_id, buyer, seller) = setup().await;
    let backend = FlakyBackend::new(service.clone());
    let ctl = Arc::new(ChatController::new(buyer, backend.clone()));
    ctl.open_messages_view().await;
    ctl.select_conversation(&conv_id).await;
    let pump = ctl.spawn_feed_pump(ctl.scoped_feed(service.feed()));

    // Our send hangs while the counterpart's message arrives
    backend.send_delay(200);
    ctl.set_draft("mine").await;
    let slow = {
        let ctl = ctl.clone();
        tokio::spawn(async move { ctl.send().await })
    };
    sleep(Duration::from_millis(30)).await;
    service.send_message(&seller, &conv_id, "theirs").await.unwrap();
    sleep(Duration::from_millis(70)).await;

    // The refetch replaced confirmed rows but kept the in-flight entry
    let visible = ctl.visible_messages().await;
    assert_eq!(visible.len(), 2);
    assert!(visible[0].is_pending());
    assert_eq!(visible[0].content(), "mine");
    assert!(!visible[1].is_pending());
    assert_eq!(visible[1].content(), "theirs");

    // Once confirmed, the entry takes its server timestamp and order
    slow.await.unwrap();
    let visible = ctl.visible_messages().await;
    assert_eq!(visible.len(), 2);
    assert!(visible.iter().all(|e| !e.is_pending()));
    assert_eq!(visible[0].content(), "theirs");
    assert_eq!(visible[1].content(), "mine");

    pump.abort();
}

#[tokio::test]
async fn test_confirmed_send_not_duplicated_by_refetch() {
    let (_dir, service, conv_id, buyer, seller) = setup().await;
    let backend = FlakyBackend::new(service.clone());
    let ctl = Arc::new(ChatController::new(buyer, backend.clone()));
    ctl.open_messages_view().await;
    ctl.select_conversation(&conv_id).await;
    let pump = ctl.spawn_feed_pump(ctl.scoped_feed(service.feed()));

    // Our send commits server-side, but its response hangs
    backend.confirm_delay(200);
    ctl.set_draft("can do 40").await;
    let slow = {
        let ctl = ctl.clone();
        tokio::spawn(async move { ctl.send().await })
    };
    sleep(Duration::from_millis(30)).await;

    // The counterpart's reply triggers a refetch whose authoritative list
    // already carries the committed row
    service
        .send_message(&seller, &conv_id, "deal, friday works")
        .await
        .unwrap();
    sleep(Duration::from_millis(70)).await;
    slow.await.unwrap();

    // One entry per message: the late response must not render the row twice
    let visible = ctl.visible_messages().await;
    assert_eq!(visible.len(), 2);
    assert!(visible.iter().all(|e| !e.is_pending()));
    assert_ne!(visible[0].entry_id(), visible[1].entry_id());
    assert_eq!(visible[0].content(), "can do 40");
    assert_eq!(visible[1].content(), "deal, friday works");

    pump.abort();
}

#[tokio::test]
async fn test_two_devices_converge_after_one_reads() {
    let (_dir, service, conv_id, buyer, seller) = setup().await;
    service
        .send_message(&buyer, &conv_id, "knock knock")
        .await
        .unwrap();

    let d1 = Arc::new(ChatController::new(seller.clone(), Arc::new(service.clone())));
    let d2 = Arc::new(ChatController::new(seller.clone(), Arc::new(service.clone())));
    d1.open_messages_view().await;
    d2.open_messages_view().await;
    assert_eq!(d1.unread_badge().await, 1);
    assert_eq!(d2.unread_badge().await, 1);
    let pump1 = d1.spawn_feed_pump(d1.scoped_feed(service.feed()));
    let pump2 = d2.spawn_feed_pump(d2.scoped_feed(service.feed()));

    // One device reads; the read-state updates fan out to the other
    d1.select_conversation(&conv_id).await;
    sleep(Duration::from_millis(150)).await;

    assert_eq!(d1.unread_badge().await, 0);
    assert_eq!(d2.unread_badge().await, 0);
    assert_eq!(service.unread_conversation_count(&seller).await.unwrap(), 0);

    pump1.abort();
    pump2.abort();
}

#[tokio::test]
async fn test_event_for_unknown_conversation_is_ignored() {
    let (_dir, service, conv_id, buyer, _seller) = setup().await;
    let ctl = ChatController::new(buyer, Arc::new(service.clone()));
    ctl.open_messages_view().await;

    let ghost = MessageChange::Insert {
        message: Message {
            id: "m-ghost".to_string(),
            conversation_id: "conv-ghost".to_string(),
            sender_id: "seller-1".to_string(),
            content: "boo".to_string(),
            created_at: 1,
            is_read: false,
        },
    };
    ctl.handle_feed_event(&ghost).await;

    let sidebar = ctl.sidebar().await;
    assert_eq!(sidebar.len(), 1);
    assert_eq!(sidebar[0].view.conversation.id, conv_id);
    assert!(sidebar[0].preview.is_none());
    assert!(!sidebar[0].unread);
    assert_eq!(ctl.phase().await, Phase::ConversationsLoaded);
}

#[tokio::test]
async fn test_same_millisecond_messages_render_in_id_order() {
    let tied = |id: &str| Message {
        id: id.to_string(),
        conversation_id: "conv-1".to_string(),
        sender_id: "seller-1".to_string(),
        content: format!("tied {}", id),
        created_at: 5_000,
        is_read: true,
    };
    let backend = Arc::new(CannedBackend {
        view: ConversationView {
            conversation: Conversation {
                id: "conv-1".to_string(),
                listing_id: "listing-1".to_string(),
                buyer_id: "buyer-1".to_string(),
                seller_id: "seller-1".to_string(),
                created_at: 1_000,
                last_message_at: 5_000,
            },
            listing: None,
            buyer: None,
            seller: None,
            last_message: None,
        },
        // Served newest id first to show rendering re-sorts
        messages: vec![tied("m-b"), tied("m-a")],
        send_id: "m-ab".to_string(),
        send_at: 5_000,
    });
    let ctl = ChatController::new(AuthSession::new("buyer-1", "dev@campus.edu"), backend);
    ctl.open_messages_view().await;
    ctl.select_conversation("conv-1").await;

    // Same created_at, so ids break the tie
    let visible = ctl.visible_messages().await;
    let ids: Vec<&str> = visible.iter().map(|e| e.entry_id()).collect();
    assert_eq!(ids, vec!["m-a", "m-b"]);

    // A confirmed send landing on that same millisecond slots in by id too
    ctl.set_draft("meet at noon").await;
    ctl.send().await;
    let visible = ctl.visible_messages().await;
    let ids: Vec<&str> = visible.iter().map(|e| e.entry_id()).collect();
    assert_eq!(ids, vec!["m-a", "m-ab", "m-b"]);
    assert!(visible.iter().all(|e| !e.is_pending()));
    assert_eq!(visible[1].content(), "meet at noon");
}
