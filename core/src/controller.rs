/// Conversation session controller: one per open messages view
///
/// Client-side orchestrator over a `ChatBackend`. Loads the sidebar, opens
/// conversations, merges feed events into local state, and handles
/// optimistic sends. Feed events are hints to refetch, never authoritative
/// payloads; the backend remains the source of truth.
use crate::backend::ChatBackend;
use crate::change_feed::{ChangeFeed, ScopedFeed};
use crate::chat_types::{now_ms, ConversationView, Message, MessageChange};
use crate::session::AuthSession;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Where the view currently is. Loading phases carry the conversation being
/// fetched so late results can be told apart from the current target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    LoadingConversations,
    ConversationsLoaded,
    LoadingMessages(String),
    ConversationOpen(String),
}

/// One rendered message: either a locally created entry awaiting
/// confirmation, or a server-confirmed row. Temp ids are "opt-" prefixed so
/// they can never collide with real ids.
#[derive(Debug, Clone)]
pub enum ChatEntry {
    Pending {
        temp_id: String,
        content: String,
        created_at: i64,
    },
    Confirmed(Message),
}

impl ChatEntry {
    pub fn entry_id(&self) -> &str {
        match self {
            ChatEntry::Pending { temp_id, .. } => temp_id,
            ChatEntry::Confirmed(m) => &m.id,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ChatEntry::Pending { content, .. } => content,
            ChatEntry::Confirmed(m) => &m.content,
        }
    }

    pub fn created_at(&self) -> i64 {
        match self {
            ChatEntry::Pending { created_at, .. } => *created_at,
            ChatEntry::Confirmed(m) => m.created_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ChatEntry::Pending { .. })
    }
}

/// Sidebar row: the server-fetched view plus the local caches that feed
/// events and optimistic sends update ahead of the next full load.
#[derive(Debug, Clone)]
pub struct SidebarEntry {
    pub view: ConversationView,
    /// Unread dot, set by feed inserts from the counterpart
    pub unread: bool,
    /// Preview text, possibly newer than view.last_message
    pub preview: Option<String>,
    /// Ordering timestamp, possibly newer than the view's last_message_at
    pub activity_at: i64,
}

impl SidebarEntry {
    fn from_view(view: ConversationView) -> Self {
        let preview = view.last_message.as_ref().map(|m| m.content.clone());
        let activity_at = view.conversation.last_message_at;
        Self {
            view,
            unread: false,
            preview,
            activity_at,
        }
    }
}

#[derive(Default)]
struct ViewState {
    phase: Phase,
    sidebar: Vec<SidebarEntry>,
    entries: Vec<ChatEntry>,
    draft: String,
    sending: bool,
    unread_badge: usize,
    last_error: Option<String>,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Idle
    }
}

pub struct ChatController {
    session: AuthSession,
    backend: Arc<dyn ChatBackend>,
    state: Mutex<ViewState>,
    /// Conversations this session participates in, shared with scoped feeds
    conversation_ids: Arc<RwLock<HashSet<String>>>,
    /// Navigation generation. Bumped on every view transition; loads capture
    /// it before awaiting and discard their result on mismatch.
    epoch: AtomicU64,
}

impl ChatController {
    pub fn new(session: AuthSession, backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            session,
            backend,
            state: Mutex::new(ViewState::default()),
            conversation_ids: Arc::new(RwLock::new(HashSet::new())),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    /// Membership set handed to `ChangeFeed::scoped`; refreshed on every
    /// conversation-list load.
    pub fn membership(&self) -> Arc<RwLock<HashSet<String>>> {
        self.conversation_ids.clone()
    }

    /// Scoped subscription for this session.
    pub fn scoped_feed(&self, feed: &ChangeFeed) -> ScopedFeed {
        feed.scoped(self.conversation_ids.clone())
    }

    /// Drive `handle_feed_event` from a scoped feed until it closes.
    pub fn spawn_feed_pump(self: &Arc<Self>, mut feed: ScopedFeed) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(change) = feed.next().await {
                controller.handle_feed_event(&change).await;
            }
            debug!("Feed pump ended");
        })
    }

    // ─── Snapshots ───────────────────────────────────────────────────────────

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase.clone()
    }

    pub async fn sidebar(&self) -> Vec<SidebarEntry> {
        self.state.lock().await.sidebar.clone()
    }

    /// Messages of the open conversation in display order: created_at
    /// ascending, ties broken by id, regardless of arrival order.
    pub async fn visible_messages(&self) -> Vec<ChatEntry> {
        let state = self.state.lock().await;
        let mut entries = state.entries.clone();
        entries.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.entry_id().cmp(b.entry_id()))
        });
        entries
    }

    pub async fn draft(&self) -> String {
        self.state.lock().await.draft.clone()
    }

    pub async fn unread_badge(&self) -> usize {
        self.state.lock().await.unread_badge
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.lock().await.last_error.clone()
    }

    // ─── View transitions ────────────────────────────────────────────────────

    /// Enter the messages view: load the sidebar and refresh the badge.
    pub async fn open_messages_view(&self) {
        let epoch = self.bump_epoch();
        {
            let mut state = self.state.lock().await;
            state.phase = Phase::LoadingConversations;
            state.last_error = None;
        }

        let loaded = self.backend.conversations_for(&self.session).await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Discarding stale conversation list");
            return;
        }

        match loaded {
            Ok(views) => {
                let ids: HashSet<String> =
                    views.iter().map(|v| v.conversation.id.clone()).collect();
                *self.conversation_ids.write().await = ids;

                let mut state = self.state.lock().await;
                state.sidebar = views.into_iter().map(SidebarEntry::from_view).collect();
                state.entries.clear();
                state.phase = Phase::ConversationsLoaded;
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                state.phase = Phase::Idle;
                state.last_error = Some(e.to_string());
                return;
            }
        }

        self.refresh_badge(epoch).await;
    }

    /// Open one conversation: fetch its messages (which marks the
    /// counterpart's rows read server-side) and clear its unread dot.
    pub async fn select_conversation(&self, conversation_id: &str) {
        let epoch = self.bump_epoch();
        {
            let mut state = self.state.lock().await;
            state.phase = Phase::LoadingMessages(conversation_id.to_string());
            state.last_error = None;
        }

        let loaded = self.backend.messages_for(&self.session, conversation_id).await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Discarding stale message list for {}", conversation_id);
            return;
        }

        match loaded {
            Ok(msgs) => {
                let mut state = self.state.lock().await;
                state.entries = msgs.into_iter().map(ChatEntry::Confirmed).collect();
                state.phase = Phase::ConversationOpen(conversation_id.to_string());
                if let Some(entry) = state
                    .sidebar
                    .iter_mut()
                    .find(|e| e.view.conversation.id == conversation_id)
                {
                    entry.unread = false;
                }
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                state.phase = Phase::ConversationsLoaded;
                state.last_error = Some(e.to_string());
                return;
            }
        }

        self.refresh_badge(epoch).await;
    }

    /// Deep link: load the sidebar, then open the named conversation if it
    /// is there. Unknown ids leave the view on the loaded list.
    pub async fn open_deep_link(&self, conversation_id: &str) {
        self.open_messages_view().await;

        let known = {
            let state = self.state.lock().await;
            state.phase == Phase::ConversationsLoaded
                && state
                    .sidebar
                    .iter()
                    .any(|e| e.view.conversation.id == conversation_id)
        };
        if known {
            self.select_conversation(conversation_id).await;
        }
    }

    /// Leave the messages view. All view state drops; in-flight loads land
    /// on a stale epoch and are discarded.
    pub async fn navigate_away(&self) {
        self.bump_epoch();
        {
            let mut state = self.state.lock().await;
            *state = ViewState::default();
        }
        self.conversation_ids.write().await.clear();
    }

    // ─── Drafting and sending ────────────────────────────────────────────────

    pub async fn set_draft(&self, text: &str) {
        self.state.lock().await.draft = text.to_string();
    }

    /// Send the current draft optimistically. The entry renders immediately
    /// with a temp id; on confirmation it is swapped for the server row, on
    /// failure it is removed and the text goes back into the draft. A send
    /// is refused while another is still in flight.
    pub async fn send(&self) {
        let (conversation_id, content, temp_id) = {
            let mut state = self.state.lock().await;
            let conversation_id = match &state.phase {
                Phase::ConversationOpen(id) => id.clone(),
                _ => return,
            };
            if state.sending {
                return;
            }
            let content = state.draft.trim().to_string();
            if content.is_empty() {
                return;
            }

            let now = now_ms();
            let temp_id = format!("opt-{}", now);
            state.entries.push(ChatEntry::Pending {
                temp_id: temp_id.clone(),
                content: content.clone(),
                created_at: now,
            });
            Self::bump_sidebar(&mut state.sidebar, &conversation_id, &content, now);
            state.draft.clear();
            state.sending = true;
            state.last_error = None;
            (conversation_id, content, temp_id)
        };

        let sent = self
            .backend
            .send_message(&self.session, &conversation_id, &content)
            .await;

        // Sends are not cancellable; reconcile by temp id against whatever
        // state exists now. If navigation dropped the entry, this is a no-op.
        let mut state = self.state.lock().await;
        state.sending = false;
        match sent {
            Ok(message) => {
                // A refetch may already have installed the committed row from
                // the authoritative list; then the pending entry just goes.
                if state
                    .entries
                    .iter()
                    .any(|e| !e.is_pending() && e.entry_id() == message.id)
                {
                    state.entries.retain(|e| e.entry_id() != temp_id);
                } else if let Some(entry) = state
                    .entries
                    .iter_mut()
                    .find(|e| e.entry_id() == temp_id)
                {
                    *entry = ChatEntry::Confirmed(message);
                }
            }
            Err(e) => {
                let had_entry = {
                    let before = state.entries.len();
                    state.entries.retain(|en| en.entry_id() != temp_id);
                    state.entries.len() != before
                };
                if had_entry {
                    warn!("Send failed in {}: {}", conversation_id, e);
                    state.draft = content;
                    state.last_error = Some(e.to_string());
                }
            }
        }
    }

    // ─── Feed merge ──────────────────────────────────────────────────────────

    /// Merge one feed event. Inserts bump the sidebar; any counterpart event
    /// landing in the open conversation triggers an authoritative refetch.
    /// Every scoped event refreshes the badge.
    pub async fn handle_feed_event(&self, change: &MessageChange) {
        let msg = change.message();
        let from_me = msg.sender_id == self.session.user_id;

        let open_here = {
            let mut state = self.state.lock().await;
            let open_here =
                state.phase == Phase::ConversationOpen(msg.conversation_id.clone());

            if change.is_insert() {
                let mark_unread = !from_me && !open_here;
                let known = Self::bump_sidebar(
                    &mut state.sidebar,
                    &msg.conversation_id,
                    &msg.content,
                    msg.created_at,
                );
                if !known {
                    // Not in the loaded list; the next full load picks it up
                    debug!("Ignoring feed event for unknown conversation {}", msg.conversation_id);
                }
                if known && mark_unread {
                    if let Some(entry) = state
                        .sidebar
                        .iter_mut()
                        .find(|e| e.view.conversation.id == msg.conversation_id)
                    {
                        entry.unread = true;
                    }
                }
            }
            open_here
        };

        if open_here && !from_me {
            // The event is only a hint; refetch the real list (which also
            // marks the new arrivals read, since the user is looking at it).
            self.refetch_open_conversation(&msg.conversation_id).await;
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        self.refresh_badge(epoch).await;
    }

    async fn refetch_open_conversation(&self, conversation_id: &str) {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let loaded = self.backend.messages_for(&self.session, conversation_id).await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }

        let mut state = self.state.lock().await;
        if state.phase != Phase::ConversationOpen(conversation_id.to_string()) {
            return;
        }
        match loaded {
            Ok(msgs) => {
                // Pending entries survive the refetch; only confirmed rows
                // are replaced by the authoritative list.
                let pending: Vec<ChatEntry> = state
                    .entries
                    .iter()
                    .filter(|e| e.is_pending())
                    .cloned()
                    .collect();
                state.entries = msgs.into_iter().map(ChatEntry::Confirmed).collect();
                state.entries.extend(pending);
                if let Some(entry) = state
                    .sidebar
                    .iter_mut()
                    .find(|e| e.view.conversation.id == conversation_id)
                {
                    entry.unread = false;
                }
            }
            Err(e) => {
                warn!("Refetch of {} failed: {}", conversation_id, e);
            }
        }
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Update a sidebar row's preview and activity, then resort newest
    /// first. Returns false when the conversation is not in the sidebar.
    fn bump_sidebar(
        sidebar: &mut Vec<SidebarEntry>,
        conversation_id: &str,
        preview: &str,
        at: i64,
    ) -> bool {
        let mut known = false;
        if let Some(entry) = sidebar
            .iter_mut()
            .find(|e| e.view.conversation.id == conversation_id)
        {
            entry.preview = Some(preview.to_string());
            if at > entry.activity_at {
                entry.activity_at = at;
            }
            known = true;
        }
        if known {
            sidebar.sort_by(|a, b| b.activity_at.cmp(&a.activity_at));
        }
        known
    }

    async fn refresh_badge(&self, epoch: u64) {
        match self.backend.unread_conversation_count(&self.session).await {
            Ok(count) => {
                if self.epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }
                self.state.lock().await.unread_badge = count;
            }
            Err(e) => {
                debug!("Badge refresh failed: {}", e);
            }
        }
    }
}
