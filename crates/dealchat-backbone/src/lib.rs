//! Client for the chat backbone (a Matrix-style homeserver).
//!
//! One privileged service account provisions guest accounts and private
//! rooms for marketplace users and follows the live event stream so that
//! messages written from native backbone clients still flip unread flags.

pub mod api;
pub mod client;
pub mod config;
pub mod http;
pub mod listener;
pub mod retry;

use async_trait::async_trait;

use dealchat_types::models::BackboneIdentity;

pub use client::BackboneClient;
pub use config::BackboneConfig;
pub use retry::RetryPolicy;

/// Receives "new message in room" notifications from the live listener.
#[async_trait]
pub trait UnreadSink: Send + Sync {
    async fn set_new_message(&self, room_id: &str, sender_login: &str) -> anyhow::Result<()>;
}

/// Mints backbone accounts and rooms. Implementations never fail loudly:
/// `None` and `""` mean "messaging degraded, carry on without it".
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_identity(&self) -> Option<BackboneIdentity>;

    async fn create_room(&self, name: &str, seller_login: &str, buyer_login: &str) -> String;
}
