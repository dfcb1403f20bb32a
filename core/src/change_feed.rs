/// Change feed: broadcast fan-out of message insert/update events
/// The raw channel is table-wide; `ScopedFeed` narrows it to one
/// subscriber's conversations before the controller ever sees an event.
use crate::chat_types::MessageChange;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tracing::warn;

pub const DEFAULT_FEED_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<MessageChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Nobody listening is not an error.
    pub fn publish(&self, change: MessageChange) {
        let _ = self.tx.send(change);
    }

    /// Raw table-wide subscription (the SSE endpoint hands this out).
    pub fn subscribe(&self) -> broadcast::Receiver<MessageChange> {
        self.tx.subscribe()
    }

    /// Membership-filtered subscription. The set is shared with the owner,
    /// who refreshes it on every conversation-list load.
    pub fn scoped(&self, conversations: Arc<RwLock<HashSet<String>>>) -> ScopedFeed {
        ScopedFeed {
            rx: self.tx.subscribe(),
            conversations,
        }
    }
}

pub struct ScopedFeed {
    rx: broadcast::Receiver<MessageChange>,
    conversations: Arc<RwLock<HashSet<String>>>,
}

impl ScopedFeed {
    /// Next event touching a conversation in the membership set. Events for
    /// foreign conversations are dropped here. Lagged gaps are skipped with
    /// a warning; the subscriber's next explicit fetch covers whatever was
    /// missed. Returns None once the feed closes.
    pub async fn next(&mut self) -> Option<MessageChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) => {
                    let relevant = self
                        .conversations
                        .read()
                        .await
                        .contains(&change.message().conversation_id);
                    if relevant {
                        return Some(change);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Feed subscriber lagged {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
