/// Listing and profile lookups consumed from the wider marketplace.
/// The chat core treats these as black boxes; `InMemoryDirectory` stands in
/// for them in the demo and in tests.
use crate::chat_types::{ListingSummary, PublicProfile};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait Directory: Send + Sync {
    /// Current owner of a listing; None when the listing does not exist.
    async fn listing_owner(&self, listing_id: &str) -> Option<String>;
    /// Display fields for a listing; None once the listing is deleted.
    async fn listing_summary(&self, listing_id: &str) -> Option<ListingSummary>;
    /// Display fields for a user; None for unknown users.
    async fn public_profile(&self, user_id: &str) -> Option<PublicProfile>;
}

#[derive(Clone)]
struct ListingRow {
    owner_id: String,
    summary: ListingSummary,
}

/// In-memory listing/profile registry
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    listings: Arc<RwLock<HashMap<String, ListingRow>>>,
    profiles: Arc<RwLock<HashMap<String, PublicProfile>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_listing(&self, owner_id: &str, summary: ListingSummary) {
        let row = ListingRow {
            owner_id: owner_id.to_string(),
            summary: summary.clone(),
        };
        self.listings.write().await.insert(summary.id.clone(), row);
    }

    /// Drop a listing. Conversations attached to it soft-persist.
    pub async fn remove_listing(&self, listing_id: &str) {
        self.listings.write().await.remove(listing_id);
    }

    pub async fn add_profile(&self, profile: PublicProfile) {
        self.profiles
            .write()
            .await
            .insert(profile.id.clone(), profile);
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn listing_owner(&self, listing_id: &str) -> Option<String> {
        self.listings
            .read()
            .await
            .get(listing_id)
            .map(|row| row.owner_id.clone())
    }

    async fn listing_summary(&self, listing_id: &str) -> Option<ListingSummary> {
        self.listings
            .read()
            .await
            .get(listing_id)
            .map(|row| row.summary.clone())
    }

    async fn public_profile(&self, user_id: &str) -> Option<PublicProfile> {
        self.profiles.read().await.get(user_id).cloned()
    }
}
