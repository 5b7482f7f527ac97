use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::api::{BackboneApi, BackboneError, RoomEvent, RoomRequest, ServiceSession, SyncBatch};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// `BackboneApi` over the homeserver's client-server and admin HTTP APIs.
pub struct HttpBackbone {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackbone {
    pub fn new(base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl BackboneApi for HttpBackbone {
    async fn login(&self, user: &str, password: &str) -> Result<ServiceSession, BackboneError> {
        let request = self.http.post(self.url("/_matrix/client/v3/login")).json(&json!({
            "type": "m.login.password",
            "identifier": { "type": "m.id.user", "user": user },
            "password": password,
        }));

        let body: LoginResponse = send_json(request).await?;
        Ok(ServiceSession {
            access_token: body.access_token,
            user_id: body.user_id,
        })
    }

    async fn register_user(&self, token: &str, user_id: &str, password: &str) -> Result<(), BackboneError> {
        let request = self
            .http
            .put(self.url(&format!("/_synapse/admin/v2/users/{}", user_id)))
            .bearer_auth(token)
            .json(&json!({ "password": password, "admin": false }));

        let _: Value = send_json(request).await?;
        Ok(())
    }

    async fn create_room(&self, token: &str, request: &RoomRequest) -> Result<String, BackboneError> {
        let request = self
            .http
            .post(self.url("/_matrix/client/v3/createRoom"))
            .bearer_auth(token)
            .json(&json!({
                "name": request.name,
                "preset": "private_chat",
                "visibility": "private",
                "is_direct": false,
                "invite": request.invite,
            }));

        let body: CreateRoomResponse = send_json(request).await?;
        if body.room_id.is_empty() {
            return Err(BackboneError::Decode("empty room_id".into()));
        }
        Ok(body.room_id)
    }

    async fn sync(&self, token: &str, since: Option<&str>, timeout: Duration) -> Result<SyncBatch, BackboneError> {
        let mut query = vec![("timeout", timeout.as_millis().to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }

        let request = self
            .http
            .get(self.url("/_matrix/client/v3/sync"))
            .bearer_auth(token)
            .query(&query)
            // long poll: let the server hold the request for `timeout`
            .timeout(timeout + REQUEST_TIMEOUT);

        let body: SyncResponse = send_json(request).await?;
        Ok(body.into_batch())
    }
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, BackboneError> {
    let response = request.send().await?;
    let response = check_status(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| BackboneError::Decode(e.to_string()))
}

async fn check_status(response: Response) -> Result<Response, BackboneError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(BackboneError::Unauthorized);
    }
    Err(BackboneError::Status {
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    })
}

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    user_id: String,
}

#[derive(Deserialize)]
struct CreateRoomResponse {
    room_id: String,
}

#[derive(Deserialize)]
struct SyncResponse {
    next_batch: String,
    #[serde(default)]
    rooms: SyncRooms,
}

#[derive(Deserialize, Default)]
struct SyncRooms {
    #[serde(default)]
    join: HashMap<String, JoinedRoom>,
}

#[derive(Deserialize, Default)]
struct JoinedRoom {
    #[serde(default)]
    timeline: Timeline,
}

#[derive(Deserialize, Default)]
struct Timeline {
    #[serde(default)]
    events: Vec<TimelineEvent>,
}

#[derive(Deserialize)]
struct TimelineEvent {
    #[serde(rename = "type")]
    kind: String,
    sender: Option<String>,
    #[serde(default)]
    origin_server_ts: i64,
    #[serde(default)]
    content: Value,
}

impl SyncResponse {
    fn into_batch(self) -> SyncBatch {
        let events = self
            .rooms
            .join
            .into_iter()
            .flat_map(|(room_id, room)| {
                room.timeline.events.into_iter().map(move |event| RoomEvent {
                    room_id: room_id.clone(),
                    msgtype: event.content.get("msgtype").and_then(Value::as_str).map(str::to_string),
                    body: event.content.get("body").and_then(Value::as_str).map(str::to_string),
                    event_type: event.kind,
                    sender: event.sender,
                    origin_server_ts: event.origin_server_ts,
                })
            })
            .collect();

        SyncBatch {
            next_batch: self.next_batch,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_response_flattens_joined_rooms() {
        let raw = json!({
            "next_batch": "s72595_4483_1934",
            "rooms": {
                "join": {
                    "!room:hs": {
                        "timeline": {
                            "events": [
                                {
                                    "type": "m.room.message",
                                    "sender": "@abc:hs",
                                    "origin_server_ts": 1_700_000_000_000i64,
                                    "content": { "msgtype": "m.text", "body": "hi" }
                                },
                                { "type": "m.room.member", "sender": "@abc:hs", "content": {} }
                            ]
                        }
                    }
                }
            }
        });

        let batch = serde_json::from_value::<SyncResponse>(raw).unwrap().into_batch();
        assert_eq!(batch.next_batch, "s72595_4483_1934");
        assert_eq!(batch.events.len(), 2);
        let msg = &batch.events[0];
        assert_eq!(msg.room_id, "!room:hs");
        assert_eq!(msg.msgtype.as_deref(), Some("m.text"));
        assert_eq!(msg.body.as_deref(), Some("hi"));
        assert!(batch.events[1].body.is_none());
    }

    #[test]
    fn sync_without_rooms() {
        let batch = serde_json::from_value::<SyncResponse>(json!({"next_batch": "x"}))
            .unwrap()
            .into_batch();
        assert!(batch.events.is_empty());
    }
}
