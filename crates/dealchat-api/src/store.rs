//! Discussions, their read status and message history.
//!
//! Every call hops onto the blocking pool before touching SQLite. Multi-row
//! writes (discussion + status rows, message + counterpart unread flag) are
//! single transactions inside `dealchat-db`.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use dealchat_backbone::{Provisioner, UnreadSink};
use dealchat_db::Database;
use dealchat_db::models::{DiscussionInsert, MessageInsert, UnreadMark};
use dealchat_types::api::MessagePage;
use dealchat_types::models::{Discussion, DiscussionDetail, DiscussionSummary, Message};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;
pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("not a participant of discussion {0}")]
    NotParticipant(i64),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct NewDiscussion {
    pub deal_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
}

/// A persisted message plus the participant who now has it unread.
#[derive(Debug, Clone)]
pub struct PostedMessage {
    pub message: Message,
    pub recipient_id: i64,
}

pub struct DiscussionStore {
    db: Arc<Database>,
    provisioner: Arc<dyn Provisioner>,
}

impl DiscussionStore {
    pub fn new(db: Arc<Database>, provisioner: Arc<dyn Provisioner>) -> Self {
        Self { db, provisioner }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?;
        Ok(result?)
    }

    pub async fn find_by_user(&self, user_id: i64) -> Result<Vec<DiscussionSummary>, StoreError> {
        self.blocking(move |db| db.list_discussions_for_user(user_id)).await
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<DiscussionDetail>, StoreError> {
        self.blocking(move |db| db.get_discussion_detail(id)).await
    }

    pub async fn find_by_deal_and_buyer(&self, deal_id: i64, buyer_id: i64) -> Result<Option<Discussion>, StoreError> {
        self.blocking(move |db| db.find_discussion_by_deal_and_buyer(deal_id, buyer_id))
            .await
    }

    /// The discussion, if `user_id` is one of its two participants.
    pub async fn discussion_for(&self, id: i64, user_id: i64) -> Result<Discussion, StoreError> {
        let discussion = self
            .blocking(move |db| db.get_discussion(id))
            .await?
            .ok_or(StoreError::NotFound("discussion"))?;
        if !discussion.is_participant(user_id) {
            return Err(StoreError::NotParticipant(id));
        }
        Ok(discussion)
    }

    /// Provisions a backbone room and persists the discussion with both
    /// status rows. A lost provisioning call leaves the room handle empty.
    pub async fn create(&self, new: NewDiscussion) -> Result<Discussion, StoreError> {
        let (buyer, seller, deal) = self
            .blocking(move |db| {
                Ok((
                    db.get_user_by_id(new.buyer_id)?,
                    db.get_user_by_id(new.seller_id)?,
                    db.get_deal(new.deal_id)?,
                ))
            })
            .await?;
        let buyer = buyer.ok_or(StoreError::NotFound("buyer"))?;
        let seller = seller.ok_or(StoreError::NotFound("seller"))?;
        let deal = deal.ok_or(StoreError::NotFound("deal"))?;

        let name = room_name(deal.id, deal.title.as_deref());
        let room_id = self
            .provisioner
            .create_room(
                &name,
                seller.backbone_login.as_deref().unwrap_or_default(),
                buyer.backbone_login.as_deref().unwrap_or_default(),
            )
            .await;
        if room_id.is_empty() {
            warn!("No backbone room for deal {} / buyer {}; continuing without one", deal.id, buyer.id);
        }

        let inserted = self
            .blocking(move |db| db.insert_discussion(new.deal_id, new.buyer_id, new.seller_id, &room_id))
            .await?;
        match inserted {
            DiscussionInsert::Created(discussion) => {
                info!("Discussion {} opened on deal {} by buyer {}", discussion.id, deal.id, buyer.id);
                Ok(discussion)
            }
            DiscussionInsert::Existing(discussion) => {
                debug!("Discussion {} already existed for deal {} / buyer {}", discussion.id, deal.id, buyer.id);
                Ok(discussion)
            }
        }
    }

    /// Buyer-initiated contact on a published deal. Returns the existing
    /// discussion for the pair when there is one.
    pub async fn start(&self, deal_id: i64, buyer_id: i64) -> Result<Discussion, StoreError> {
        let deal = self
            .blocking(move |db| db.get_deal(deal_id))
            .await?
            .ok_or(StoreError::NotFound("deal"))?;
        if !deal.is_published() {
            return Err(StoreError::Validation(format!("deal {} is not published", deal_id)));
        }
        if deal.owner_id == buyer_id {
            return Err(StoreError::Validation("cannot start a discussion on your own deal".into()));
        }

        if let Some(existing) = self.find_by_deal_and_buyer(deal_id, buyer_id).await? {
            return Ok(existing);
        }

        self.create(NewDiscussion { deal_id, buyer_id, seller_id: deal.owner_id })
            .await
    }

    /// Clears the caller's own unread flag, refusing non-participants.
    pub async fn mark_read(&self, discussion_id: i64, user_id: i64) -> Result<(), StoreError> {
        self.discussion_for(discussion_id, user_id).await?;
        self.clear_unread(discussion_id, user_id).await
    }

    /// Clears the `(discussion, user)` status row if one exists. Touches no
    /// other row, so it needs no participant check.
    pub async fn clear_unread(&self, discussion_id: i64, user_id: i64) -> Result<(), StoreError> {
        let cleared = self
            .blocking(move |db| db.set_unread(discussion_id, user_id, false))
            .await?;
        if !cleared {
            debug!("No status row for user {} in discussion {}", user_id, discussion_id);
        }
        Ok(())
    }

    pub async fn unread_count(&self, user_id: i64) -> Result<u32, StoreError> {
        self.blocking(move |db| db.unread_count(user_id)).await
    }

    /// Flags the discussion bound to `room_id` unread for whichever participant
    /// did not send the backbone message.
    pub async fn set_new_message(&self, room_id: &str, sender_login: &str) -> Result<UnreadMark, StoreError> {
        let room = room_id.to_string();
        let login = sender_login.to_string();
        let mark = self
            .blocking(move |db| db.mark_unread_from_room(&room, &login))
            .await?;
        match &mark {
            UnreadMark::Marked { discussion_id, recipient_id } => {
                debug!("Discussion {} unread for user {} (backbone)", discussion_id, recipient_id)
            }
            UnreadMark::UnknownRoom => debug!("Backbone room {} has no discussion", room_id),
            UnreadMark::UnknownSender => debug!("Backbone sender {} is not a known user", sender_login),
            UnreadMark::NotParticipant => {
                warn!("Backbone sender {} is not a participant of room {}", sender_login, room_id)
            }
        }
        Ok(mark)
    }

    pub async fn create_message(
        &self,
        discussion_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<PostedMessage, StoreError> {
        validate_content(content)?;
        let content = content.to_string();
        let inserted = self
            .blocking(move |db| db.insert_message(discussion_id, sender_id, &content))
            .await?;
        match inserted {
            MessageInsert::Created { message, recipient_id } => Ok(PostedMessage { message, recipient_id }),
            MessageInsert::UnknownDiscussion => Err(StoreError::NotFound("discussion")),
            MessageInsert::NotParticipant => Err(StoreError::NotParticipant(discussion_id)),
        }
    }

    /// One page of history, oldest first. `cursor` is exclusive; `next_cursor`
    /// is the id of the first message past the page, if any.
    pub async fn message_history(
        &self,
        discussion_id: i64,
        user_id: i64,
        cursor: Option<i64>,
        limit: Option<u32>,
    ) -> Result<MessagePage, StoreError> {
        self.discussion_for(discussion_id, user_id).await?;

        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let mut messages = self
            .blocking(move |db| db.messages_before(discussion_id, cursor, limit + 1))
            .await?;

        let next_cursor = if messages.len() > limit as usize {
            messages.pop().map(|probe| probe.id)
        } else {
            None
        };
        messages.reverse();

        Ok(MessagePage { messages, next_cursor })
    }
}

#[async_trait]
impl UnreadSink for DiscussionStore {
    async fn set_new_message(&self, room_id: &str, sender_login: &str) -> anyhow::Result<()> {
        DiscussionStore::set_new_message(self, room_id, sender_login)
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from)
    }
}

pub fn room_name(deal_id: i64, title: Option<&str>) -> String {
    let title = title.map(str::trim).filter(|t| !t.is_empty()).unwrap_or("Untitled");
    format!("Deal #{}: {}", deal_id, title)
}

fn validate_content(content: &str) -> Result<(), StoreError> {
    if content.trim().is_empty() {
        return Err(StoreError::Validation("message content is empty".into()));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(StoreError::Validation(format!(
            "message content exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealchat_db::models::{DEAL_DRAFT, DEAL_PUBLISHED};
    use dealchat_types::models::{BackboneIdentity, Role};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeProvisioner {
        online: bool,
        rooms: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl Provisioner for FakeProvisioner {
        async fn create_identity(&self) -> Option<BackboneIdentity> {
            None
        }

        async fn create_room(&self, name: &str, seller_login: &str, buyer_login: &str) -> String {
            let mut rooms = self.rooms.lock().unwrap();
            rooms.push((name.into(), seller_login.into(), buyer_login.into()));
            if self.online { format!("!room{}:hs", rooms.len()) } else { String::new() }
        }
    }

    struct Fixture {
        db: Arc<Database>,
        provisioner: Arc<FakeProvisioner>,
        store: DiscussionStore,
        seller: i64,
        buyer: i64,
        outsider: i64,
        deal: i64,
    }

    fn fixture(online: bool) -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let seller = db.create_user("seller@example.com", "Sam Seller", "x", Role::User).unwrap();
        let buyer = db.create_user("buyer@example.com", "Bea Buyer", "x", Role::User).unwrap();
        let outsider = db.create_user("eve@example.com", "Eve", "x", Role::User).unwrap();
        db.set_backbone_identity(seller, "sellerlogin00000", "s").unwrap();
        db.set_backbone_identity(buyer, "buyerlogin000000", "s").unwrap();
        let deal = db.create_deal(seller, Some("Road bike"), DEAL_PUBLISHED).unwrap();

        let provisioner = Arc::new(FakeProvisioner { online, ..Default::default() });
        let store = DiscussionStore::new(db.clone(), provisioner.clone());
        Fixture { db, provisioner, store, seller, buyer, outsider, deal }
    }

    #[tokio::test]
    async fn start_is_idempotent_per_deal_and_buyer() {
        let f = fixture(true);
        let first = f.store.start(f.deal, f.buyer).await.unwrap();
        let second = f.store.start(f.deal, f.buyer).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.seller_id, f.seller);
        assert_eq!(first.room_id, "!room1:hs");
        assert_eq!(f.provisioner.rooms.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_names_room_and_writes_two_clean_statuses() {
        let f = fixture(true);
        let discussion = f
            .store
            .create(NewDiscussion { deal_id: f.deal, buyer_id: f.buyer, seller_id: f.seller })
            .await
            .unwrap();

        let rooms = f.provisioner.rooms.lock().unwrap().clone();
        assert_eq!(
            rooms,
            vec![(
                format!("Deal #{}: Road bike", f.deal),
                "sellerlogin00000".to_string(),
                "buyerlogin000000".to_string()
            )]
        );

        let statuses = f.db.read_statuses(discussion.id).unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| !s.has_unread));
    }

    #[tokio::test]
    async fn concurrent_duplicate_create_resolves_to_one_row() {
        let f = fixture(true);
        let new = NewDiscussion { deal_id: f.deal, buyer_id: f.buyer, seller_id: f.seller };
        let (a, b) = tokio::join!(f.store.create(new), f.store.create(new));
        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(f.store.find_by_user(f.buyer).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn backbone_down_still_creates_discussion() {
        let f = fixture(false);
        let discussion = f.store.start(f.deal, f.buyer).await.unwrap();
        assert_eq!(discussion.room_id, "");

        let posted = f.store.create_message(discussion.id, f.buyer, "Is it still available?").await.unwrap();
        assert_eq!(posted.recipient_id, f.seller);
        assert_eq!(f.store.unread_count(f.seller).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn start_rejects_drafts_and_own_deals() {
        let f = fixture(true);
        let draft = f.db.create_deal(f.seller, None, DEAL_DRAFT).unwrap();

        assert!(matches!(f.store.start(draft, f.buyer).await, Err(StoreError::Validation(_))));
        assert!(matches!(f.store.start(f.deal, f.seller).await, Err(StoreError::Validation(_))));
        assert!(matches!(f.store.start(9_999, f.buyer).await, Err(StoreError::NotFound("deal"))));
    }

    #[test]
    fn untitled_deals_get_placeholder_name() {
        assert_eq!(room_name(4, None), "Deal #4: Untitled");
        assert_eq!(room_name(4, Some("  ")), "Deal #4: Untitled");
        assert_eq!(room_name(4, Some("Lamp")), "Deal #4: Lamp");
    }

    #[tokio::test]
    async fn outsider_cannot_post_and_nothing_is_stored() {
        let f = fixture(true);
        let discussion = f.store.start(f.deal, f.buyer).await.unwrap();

        let err = f.store.create_message(discussion.id, f.outsider, "hello").await.unwrap_err();
        assert!(matches!(err, StoreError::NotParticipant(_)));
        assert!(f.db.messages_before(discussion.id, None, 10).unwrap().is_empty());
        assert_eq!(f.store.unread_count(f.seller).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn content_is_validated() {
        let f = fixture(true);
        let discussion = f.store.start(f.deal, f.buyer).await.unwrap();

        let blank = f.store.create_message(discussion.id, f.buyer, "   ").await;
        assert!(matches!(blank, Err(StoreError::Validation(_))));
        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        let too_long = f.store.create_message(discussion.id, f.buyer, &long).await;
        assert!(matches!(too_long, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn mark_read_touches_only_the_caller() {
        let f = fixture(true);
        let discussion = f.store.start(f.deal, f.buyer).await.unwrap();
        f.db.set_unread(discussion.id, f.buyer, true).unwrap();
        f.db.set_unread(discussion.id, f.seller, true).unwrap();

        f.store.mark_read(discussion.id, f.buyer).await.unwrap();

        assert_eq!(f.store.unread_count(f.buyer).await.unwrap(), 0);
        assert_eq!(f.store.unread_count(f.seller).await.unwrap(), 1);
        assert!(matches!(
            f.store.mark_read(discussion.id, f.outsider).await,
            Err(StoreError::NotParticipant(_))
        ));
    }

    #[tokio::test]
    async fn history_pages_backwards_with_exclusive_cursor() {
        let f = fixture(true);
        let discussion = f.store.start(f.deal, f.buyer).await.unwrap();
        let mut ids = Vec::new();
        for i in 1..=5 {
            let posted = f.store.create_message(discussion.id, f.buyer, &format!("m{}", i)).await.unwrap();
            ids.push(posted.message.id);
        }

        let first = f.store.message_history(discussion.id, f.seller, None, Some(2)).await.unwrap();
        assert_eq!(first.messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![ids[3], ids[4]]);
        assert_eq!(first.next_cursor, Some(ids[2]));

        let second = f
            .store
            .message_history(discussion.id, f.seller, first.next_cursor, Some(2))
            .await
            .unwrap();
        assert_eq!(second.messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![ids[0], ids[1]]);
        assert_eq!(second.next_cursor, None);

        assert!(matches!(
            f.store.message_history(discussion.id, f.outsider, None, None).await,
            Err(StoreError::NotParticipant(_))
        ));
    }

    #[tokio::test]
    async fn backbone_message_flags_counterpart() {
        let f = fixture(true);
        let discussion = f.store.start(f.deal, f.buyer).await.unwrap();

        let mark = f.store.set_new_message(&discussion.room_id, "buyerlogin000000").await.unwrap();
        assert!(matches!(mark, UnreadMark::Marked { recipient_id, .. } if recipient_id == f.seller));
        assert_eq!(f.store.unread_count(f.seller).await.unwrap(), 1);
        assert_eq!(f.store.unread_count(f.buyer).await.unwrap(), 0);

        let unknown = f.store.set_new_message("!nowhere:hs", "buyerlogin000000").await.unwrap();
        assert!(matches!(unknown, UnreadMark::UnknownRoom));
    }
}
