//! Live event subscription.
//!
//! Long-polls the backbone's sync endpoint with the service account and turns
//! fresh plain-text room messages into unread notifications. Only the first
//! batch after start is back-fill and is skipped. The sync token survives
//! failed polls and re-logins, so the stream resumes where it stopped; events
//! replayed after a long outage are dropped by the freshness window.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{BackboneError, RoomEvent};
use crate::client::BackboneClient;

/// Messages older than this are replays, not new activity.
pub const FRESHNESS_WINDOW_MS: i64 = 5_000;

const SYNC_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// A plain-text message lifted out of a room event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub room_id: String,
    pub sender: String,
    pub body: String,
}

/// Returns the message carried by `event` when it is a fresh `m.text` message
/// with room, sender and body all present.
pub fn extract_message(event: &RoomEvent, now_ms: i64) -> Option<InboundMessage> {
    if event.event_type != "m.room.message" || event.msgtype.as_deref() != Some("m.text") {
        return None;
    }
    if now_ms - event.origin_server_ts > FRESHNESS_WINDOW_MS {
        return None;
    }

    let sender = event.sender.as_deref().filter(|s| !s.is_empty())?;
    let body = event.body.as_deref().filter(|b| !b.is_empty())?;
    if event.room_id.is_empty() {
        return None;
    }

    Some(InboundMessage {
        room_id: event.room_id.clone(),
        sender: sender.to_string(),
        body: body.to_string(),
    })
}

/// `@login:server` → `login`.
pub fn localpart(user_id: &str) -> &str {
    let trimmed = user_id.strip_prefix('@').unwrap_or(user_id);
    trimmed.split(':').next().unwrap_or(trimmed)
}

impl BackboneClient {
    /// Initializes if needed and spawns the live listener. Returns `None` when
    /// the backbone is disabled or the service login failed.
    pub async fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.initialize().await {
            warn!("Backbone listener not started");
            return None;
        }
        let client = self.clone();
        Some(tokio::spawn(async move { client.run_listener().await }))
    }

    async fn run_listener(self: Arc<Self>) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        info!("Backbone listener started");

        let mut since: Option<String> = None;
        loop {
            let token = match self.access_token().await {
                Ok(token) => token,
                Err(e) => {
                    warn!("Backbone listener cannot authenticate: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            match backend.api.sync(&token, since.as_deref(), SYNC_TIMEOUT).await {
                Ok(batch) => {
                    if since.is_some() {
                        self.dispatch(&batch.events).await;
                    } else {
                        debug!("Skipping {} back-fill events", batch.events.len());
                    }
                    since = Some(batch.next_batch);
                }
                Err(BackboneError::Unauthorized) => {
                    warn!("Backbone token rejected; logging in again");
                    self.invalidate_session().await;
                }
                Err(e) => {
                    warn!("Backbone sync failed: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    pub(crate) async fn dispatch(&self, events: &[RoomEvent]) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        for event in events {
            if let Some(message) = extract_message(event, now_ms) {
                self.forward(message).await;
            }
        }
    }

    async fn forward(&self, message: InboundMessage) {
        let Some(sink) = self.sink.get() else {
            debug!("No unread sink wired; dropping event in {}", message.room_id);
            return;
        };

        let login = localpart(&message.sender);
        debug!("Backbone message in {} from {} ({} chars)", message.room_id, login, message.body.len());
        if let Err(e) = sink.set_new_message(&message.room_id, login).await {
            warn!("Failed to record backbone message in {}: {}", message.room_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UnreadSink;
    use crate::api::SyncBatch;
    use crate::client::tests::{FakeBackbone, config, text_event};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct RecordingSink {
        tx: mpsc::UnboundedSender<(String, String)>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl UnreadSink for RecordingSink {
        async fn set_new_message(&self, room_id: &str, sender_login: &str) -> anyhow::Result<()> {
            if self.fail_on.as_deref() == Some(room_id) {
                anyhow::bail!("store unavailable");
            }
            let _ = self.tx.send((room_id.to_string(), sender_login.to_string()));
            Ok(())
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    #[test]
    fn only_fresh_text_messages_pass() {
        let now = 1_000_000;
        assert!(extract_message(&text_event("!r:hs", "@a:hs", now - 1_000), now).is_some());
        assert!(extract_message(&text_event("!r:hs", "@a:hs", now - 6_000), now).is_none());

        let mut notice = text_event("!r:hs", "@a:hs", now);
        notice.msgtype = Some("m.notice".into());
        assert!(extract_message(&notice, now).is_none());

        let mut member = text_event("!r:hs", "@a:hs", now);
        member.event_type = "m.room.member".into();
        assert!(extract_message(&member, now).is_none());

        let mut anonymous = text_event("!r:hs", "@a:hs", now);
        anonymous.sender = None;
        assert!(extract_message(&anonymous, now).is_none());

        let mut empty = text_event("!r:hs", "@a:hs", now);
        empty.body = Some(String::new());
        assert!(extract_message(&empty, now).is_none());
    }

    #[test]
    fn localpart_strips_sigil_and_server() {
        assert_eq!(localpart("@abc123:chat.example.com"), "abc123");
        assert_eq!(localpart("abc123"), "abc123");
    }

    #[tokio::test]
    async fn listener_skips_backfill_and_survives_sink_errors() {
        let api = Arc::new(FakeBackbone::online());
        let now = now_ms();
        api.syncs.lock().unwrap().extend([
            Ok(SyncBatch { next_batch: "b1".into(), events: vec![text_event("!old:hs", "@buyer:hs", now)] }),
            Ok(SyncBatch {
                next_batch: "b2".into(),
                events: vec![
                    text_event("!broken:hs", "@buyer:hs", now),
                    text_event("!stale:hs", "@buyer:hs", now - 60_000),
                    text_event("!deal:hs", "@buyer:hs", now),
                ],
            }),
            Ok(SyncBatch { next_batch: "b3".into(), events: vec![text_event("!deal2:hs", "@seller:hs", now_ms())] }),
        ]);

        let client = Arc::new(BackboneClient::with_api(config(), api.clone()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.set_unread_sink(Arc::new(RecordingSink { tx, fail_on: Some("!broken:hs".into()) }));

        let handle = client.start().await.expect("listener should start");

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, ("!deal:hs".to_string(), "buyer".to_string()));
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(second, ("!deal2:hs".to_string(), "seller".to_string()));
        assert!(rx.try_recv().is_err());

        handle.abort();
    }

    #[tokio::test]
    async fn listener_resumes_from_last_batch_after_relogin() {
        let api = Arc::new(FakeBackbone::online());
        let now = now_ms();
        api.syncs.lock().unwrap().extend([
            Ok(SyncBatch { next_batch: "b1".into(), events: vec![text_event("!old:hs", "@buyer:hs", now)] }),
            Err(BackboneError::Unauthorized),
            Ok(SyncBatch { next_batch: "b2".into(), events: vec![text_event("!deal:hs", "@buyer:hs", now_ms())] }),
        ]);

        let client = Arc::new(BackboneClient::with_api(config(), api.clone()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.set_unread_sink(Arc::new(RecordingSink { tx, fail_on: None }));

        let handle = client.start().await.expect("listener should start");

        // The batch after the re-login is live traffic, not back-fill
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, ("!deal:hs".to_string(), "buyer".to_string()));
        let tokens = api.sync_tokens.lock().unwrap().clone();
        assert_eq!(tokens[..3], [None, Some("b1".to_string()), Some("b1".to_string())]);
        assert_eq!(api.count("login"), 2);

        handle.abort();
    }

    #[tokio::test]
    async fn start_without_settings_returns_none() {
        let client = Arc::new(BackboneClient::disabled());
        assert!(client.start().await.is_none());
    }
}
