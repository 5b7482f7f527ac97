use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::warn;

use dealchat_backbone::Provisioner;
use dealchat_types::bridge::{BridgeReply, BridgeRequest, CreateRoomPayload};
use dealchat_types::models::BackboneIdentity;

/// Upper bound on one bridge call, connect included.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct BridgeClient {
    addr: String,
    timeout: Duration,
}

impl BridgeClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn call(&self, request: BridgeRequest) -> anyhow::Result<BridgeReply> {
        let pattern = request.pattern();
        tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", pattern, self.timeout))?
    }

    async fn exchange(&self, request: BridgeRequest) -> anyhow::Result<BridgeReply> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .with_context(|| format!("connecting to bridge at {}", self.addr))?;
        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, crate::codec());

        framed.send(Bytes::from(serde_json::to_vec(&request)?)).await?;
        let frame = framed
            .next()
            .await
            .ok_or_else(|| anyhow!("bridge closed the connection"))??;

        Ok(serde_json::from_slice(&frame)?)
    }
}

#[async_trait]
impl Provisioner for BridgeClient {
    async fn create_identity(&self) -> Option<BackboneIdentity> {
        match self.call(BridgeRequest::CreateUser).await {
            Ok(BridgeReply::CreateUser(identity)) => identity,
            Ok(other) => {
                warn!("Bridge create_user: unexpected reply {:?}", other);
                None
            }
            Err(e) => {
                warn!("Bridge create_user failed: {:#}", e);
                None
            }
        }
    }

    async fn create_room(&self, name: &str, seller_login: &str, buyer_login: &str) -> String {
        let request = BridgeRequest::CreateRoom(CreateRoomPayload {
            name: name.to_string(),
            seller_name: seller_login.to_string(),
            buyer_name: buyer_login.to_string(),
        });
        match self.call(request).await {
            Ok(BridgeReply::CreateRoom(room_id)) => room_id,
            Ok(other) => {
                warn!("Bridge create_room: unexpected reply {:?}", other);
                String::new()
            }
            Err(e) => {
                warn!("Bridge create_room failed: {:#}", e);
                String::new()
            }
        }
    }
}
