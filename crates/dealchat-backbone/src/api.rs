use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackboneError {
    #[error("backbone connection settings are missing")]
    NotConfigured,
    #[error("service account is not logged in")]
    NoSession,
    #[error("access token rejected")]
    Unauthorized,
    #[error("backbone returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct ServiceSession {
    pub access_token: String,
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub struct RoomRequest {
    pub name: String,
    /// Fully qualified user ids (`@login:server`)
    pub invite: Vec<String>,
}

/// One event from a joined room's timeline.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    pub room_id: String,
    pub event_type: String,
    pub sender: Option<String>,
    pub msgtype: Option<String>,
    pub body: Option<String>,
    pub origin_server_ts: i64,
}

#[derive(Debug, Clone)]
pub struct SyncBatch {
    pub next_batch: String,
    pub events: Vec<RoomEvent>,
}

/// The backbone's HTTP surface as used by the service account.
#[async_trait]
pub trait BackboneApi: Send + Sync {
    async fn login(&self, user: &str, password: &str) -> Result<ServiceSession, BackboneError>;

    /// Creates (or overwrites) a plain account under the service account's authority.
    async fn register_user(&self, token: &str, user_id: &str, password: &str) -> Result<(), BackboneError>;

    /// Creates a private, non-direct room and returns its handle.
    async fn create_room(&self, token: &str, request: &RoomRequest) -> Result<String, BackboneError>;

    /// Long-polls for new events. `since = None` returns the initial snapshot.
    async fn sync(&self, token: &str, since: Option<&str>, timeout: Duration) -> Result<SyncBatch, BackboneError>;
}
