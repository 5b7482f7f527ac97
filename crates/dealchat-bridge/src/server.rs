use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use dealchat_backbone::Provisioner;
use dealchat_types::bridge::{BridgeReply, BridgeRequest};

/// Serves `create_user` / `create_room` for remote callers.
#[derive(Clone)]
pub struct BridgeServer {
    provisioner: Arc<dyn Provisioner>,
}

impl BridgeServer {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self { provisioner }
    }

    /// Accept loop. Runs until the task is cancelled.
    pub async fn run(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Bridge: connection from {}", addr);
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream).await {
                            warn!("Bridge connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Bridge accept error: {}", e);
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> anyhow::Result<()> {
        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, crate::codec());

        while let Some(frame) = framed.next().await {
            let frame = frame?;
            let reply = match serde_json::from_slice::<BridgeRequest>(&frame) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    warn!("Bridge: malformed request: {}", e);
                    BridgeReply::Error(format!("malformed request: {}", e))
                }
            };
            framed.send(Bytes::from(serde_json::to_vec(&reply)?)).await?;
        }

        Ok(())
    }

    pub async fn handle_request(&self, request: BridgeRequest) -> BridgeReply {
        info!("Bridge: {}", request.pattern());
        match request {
            BridgeRequest::CreateUser => BridgeReply::CreateUser(self.provisioner.create_identity().await),
            BridgeRequest::CreateRoom(payload) => BridgeReply::CreateRoom(
                self.provisioner
                    .create_room(&payload.name, &payload.seller_name, &payload.buyer_name)
                    .await,
            ),
        }
    }
}
