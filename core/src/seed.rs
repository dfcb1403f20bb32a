/// Demo fixtures: two campus users and one listing, with bearer tokens
/// announced at startup so `qm` can talk to the service immediately.
use crate::chat_types::{ListingSummary, PublicProfile};
use crate::directory::InMemoryDirectory;
use crate::session::{AuthSession, StaticTokens};
use tracing::info;

pub const DEMO_SELLER_TOKEN: &str = "demo-seller-token";
pub const DEMO_BUYER_TOKEN: &str = "demo-buyer-token";
pub const DEMO_LISTING_ID: &str = "listing-calc-textbook";

pub async fn seed_demo(directory: &InMemoryDirectory, tokens: &StaticTokens) {
    directory
        .add_profile(PublicProfile {
            id: "user-maya".to_string(),
            full_name: "Maya Chen".to_string(),
            avatar_url: None,
        })
        .await;
    directory
        .add_profile(PublicProfile {
            id: "user-dev".to_string(),
            full_name: "Dev Patel".to_string(),
            avatar_url: None,
        })
        .await;
    directory
        .add_listing(
            "user-maya",
            ListingSummary {
                id: DEMO_LISTING_ID.to_string(),
                title: "Calculus Textbook (3rd Ed.)".to_string(),
                price: 25.0,
                images: vec![],
            },
        )
        .await;

    tokens
        .issue(
            DEMO_SELLER_TOKEN,
            AuthSession::new("user-maya", "maya@campus.edu"),
        )
        .await;
    tokens
        .issue(
            DEMO_BUYER_TOKEN,
            AuthSession::new("user-dev", "dev@campus.edu"),
        )
        .await;

    info!("Demo data seeded: listing '{}' owned by user-maya", DEMO_LISTING_ID);
    info!("  seller token: {}", DEMO_SELLER_TOKEN);
    info!("  buyer token:  {}", DEMO_BUYER_TOKEN);
}
