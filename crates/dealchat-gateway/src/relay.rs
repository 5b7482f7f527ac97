use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use dealchat_api::store::{DiscussionStore, StoreError};
use dealchat_types::events::{AckResult, RelayCommand, RelayEvent, SendMessagePayload};

use crate::dispatcher::{Dispatcher, Group};

/// Per-connection state. Lives exactly as long as the socket.
#[derive(Debug)]
pub struct Session {
    pub user_id: i64,
    pub conn_id: Uuid,
    pub joined: HashSet<i64>,
}

/// Applies relay commands against the discussion store and fans the results
/// out through the dispatcher.
#[derive(Clone)]
pub struct Relay {
    store: Arc<DiscussionStore>,
    dispatcher: Dispatcher,
}

impl Relay {
    pub fn new(store: Arc<DiscussionStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Registers an authenticated connection, joins its personal group and one
    /// group per discussion the user takes part in.
    pub async fn open(&self, user_id: i64) -> Result<(Session, mpsc::UnboundedReceiver<RelayEvent>), StoreError> {
        let discussions = self.store.find_by_user(user_id).await?;

        let (conn_id, rx) = self.dispatcher.register().await;
        self.dispatcher.join(conn_id, Group::User(user_id)).await;

        let mut joined = HashSet::new();
        for summary in discussions {
            let id = summary.discussion.id;
            self.dispatcher.join(conn_id, Group::Discussion(id)).await;
            joined.insert(id);
        }
        debug!("User {} conn {} joined {} discussions", user_id, conn_id, joined.len());

        Ok((Session { user_id, conn_id, joined }, rx))
    }

    pub async fn close(&self, session: Session) {
        self.dispatcher.unregister(session.conn_id).await;
    }

    pub async fn handle(&self, session: &mut Session, command: RelayCommand) -> AckResult {
        let result = match command {
            RelayCommand::SendMessage(payload) => self.send_message(session, payload).await,
            RelayCommand::JoinDiscussion(r) => self.join_discussion(session, r.discussion_id).await,
            RelayCommand::MarkRead(r) => self.mark_read(session, r.discussion_id).await,
        };

        match result {
            Ok(ack) => ack,
            Err(StoreError::NotFound(_) | StoreError::NotParticipant(_)) => {
                AckResult::failed("Not a participant of this discussion")
            }
            Err(StoreError::Validation(msg)) => AckResult::failed(msg),
            Err(StoreError::Internal(e)) => {
                error!("Relay command from user {} failed: {:#}", session.user_id, e);
                AckResult::failed("Internal error")
            }
        }
    }

    /// Persist, then broadcast to the discussion, then notify the recipient.
    pub async fn send_message(&self, session: &Session, payload: SendMessagePayload) -> Result<AckResult, StoreError> {
        let posted = self
            .store
            .create_message(payload.discussion_id, session.user_id, &payload.content)
            .await?;
        let message = posted.message;
        info!("User {} wrote message {} in discussion {}", session.user_id, message.id, message.discussion_id);

        let message_id = message.id;
        let discussion_id = message.discussion_id;
        self.dispatcher
            .emit(
                Group::Discussion(discussion_id),
                RelayEvent::NewMessage {
                    id: message.id,
                    discussion_id,
                    sender_id: message.sender_id,
                    content: message.content,
                    created_at: message.created_at,
                },
            )
            .await;
        self.dispatcher
            .emit(Group::User(posted.recipient_id), RelayEvent::UnreadUpdate { discussion_id })
            .await;

        Ok(AckResult::sent(message_id))
    }

    pub async fn join_discussion(&self, session: &mut Session, discussion_id: i64) -> Result<AckResult, StoreError> {
        self.store.discussion_for(discussion_id, session.user_id).await?;
        if session.joined.insert(discussion_id) {
            self.dispatcher
                .join(session.conn_id, Group::Discussion(discussion_id))
                .await;
        }
        Ok(AckResult::ok())
    }

    /// Only ever touches the caller's own status row, so any id is accepted.
    pub async fn mark_read(&self, session: &Session, discussion_id: i64) -> Result<AckResult, StoreError> {
        self.store.clear_unread(discussion_id, session.user_id).await?;
        Ok(AckResult::ok())
    }
}
