//! Database row types and write outcomes.
//! Rows that never leave the storage layer (password hashes, backbone secrets)
//! live here; everything else is mapped straight into dealchat-types models.

use chrono::{DateTime, Utc};
use tracing::warn;

use dealchat_types::models::{Discussion, Message, Role};

pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
    pub backbone_login: Option<String>,
    pub backbone_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub const DEAL_PUBLISHED: &str = "published";
pub const DEAL_DRAFT: &str = "draft";

pub struct DealRow {
    pub id: i64,
    pub owner_id: i64,
    pub title: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl DealRow {
    pub fn is_published(&self) -> bool {
        self.status == DEAL_PUBLISHED
    }
}

/// Result of inserting a discussion for a (deal, buyer) pair.
#[derive(Debug)]
pub enum DiscussionInsert {
    Created(Discussion),
    /// The pair already had a discussion; nothing was written.
    Existing(Discussion),
}

impl DiscussionInsert {
    pub fn into_discussion(self) -> Discussion {
        match self {
            Self::Created(d) | Self::Existing(d) => d,
        }
    }
}

#[derive(Debug)]
pub enum MessageInsert {
    Created { message: Message, recipient_id: i64 },
    UnknownDiscussion,
    NotParticipant,
}

/// Result of flagging a discussion unread from a backbone room event.
#[derive(Debug, PartialEq, Eq)]
pub enum UnreadMark {
    Marked { discussion_id: i64, recipient_id: i64 },
    UnknownRoom,
    UnknownSender,
    NotParticipant,
}

/// SQLite stores timestamps as `YYYY-MM-DDTHH:MM:SS.sssZ`; older rows written
/// by `datetime('now')` lack the `T` and the zone, so accept both.
pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

pub(crate) fn parse_role(raw: &str) -> Role {
    raw.parse().unwrap_or_else(|e| {
        warn!("{}; treating as user", e);
        Role::User
    })
}
