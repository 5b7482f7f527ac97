use serde::{Deserialize, Serialize};

/// Events sent from the relay to connected sockets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum RelayEvent {
    /// Handshake accepted and all discussion groups joined
    Ready { user_id: i64 },

    /// A message was persisted in a discussion the socket has joined
    NewMessage {
        id: i64,
        discussion_id: i64,
        sender_id: i64,
        content: String,
        created_at: chrono::DateTime<chrono::Utc>,
    },

    /// The counterpart wrote in a discussion; sent to the recipient's personal group
    UnreadUpdate { discussion_id: i64 },

    /// Reply to a client command that carried an `ack` id
    Ack {
        ack: u64,
        #[serde(flatten)]
        result: AckResult,
    },
}

/// Outcome of a relay command, returned over the same connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckResult {
    pub fn ok() -> Self {
        Self { success: true, message_id: None, error: None }
    }

    pub fn sent(message_id: i64) -> Self {
        Self { success: true, message_id: Some(message_id), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, message_id: None, error: Some(error.into()) }
    }
}

/// Commands sent FROM client TO relay.
///
/// On the wire a command is `{"type": ..., "ack": n, "data": {...}}`; the
/// optional `ack` id is read separately and echoed in the reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RelayCommand {
    SendMessage(SendMessagePayload),
    JoinDiscussion(DiscussionRef),
    MarkRead(DiscussionRef),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub discussion_id: i64,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionRef {
    pub discussion_id: i64,
}
