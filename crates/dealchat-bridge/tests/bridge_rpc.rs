//! Bridge client and server talking over loopback TCP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use dealchat_backbone::Provisioner;
use dealchat_bridge::{BridgeClient, BridgeServer};
use dealchat_types::bridge::BridgeReply;
use dealchat_types::models::BackboneIdentity;

#[derive(Default)]
struct StubProvisioner {
    online: bool,
    rooms: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl Provisioner for StubProvisioner {
    async fn create_identity(&self) -> Option<BackboneIdentity> {
        self.online.then(|| BackboneIdentity {
            username: "abcdefghij012345".into(),
            password: "Secret0123456789".into(),
        })
    }

    async fn create_room(&self, name: &str, seller_login: &str, buyer_login: &str) -> String {
        self.rooms
            .lock()
            .unwrap()
            .push((name.into(), seller_login.into(), buyer_login.into()));
        if self.online { "!deal:hs".into() } else { String::new() }
    }
}

async fn spawn_server(provisioner: Arc<StubProvisioner>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(BridgeServer::new(provisioner).run(listener));
    addr
}

#[tokio::test]
async fn identity_and_room_round_trip() {
    let stub = Arc::new(StubProvisioner { online: true, ..Default::default() });
    let client = BridgeClient::new(spawn_server(stub.clone()).await);

    let identity = client.create_identity().await.unwrap();
    assert_eq!(identity.username, "abcdefghij012345");

    let room = client.create_room("Deal #3: Lamp", "sellerlogin", "buyerlogin").await;
    assert_eq!(room, "!deal:hs");
    assert_eq!(
        stub.rooms.lock().unwrap().clone(),
        vec![("Deal #3: Lamp".to_string(), "sellerlogin".to_string(), "buyerlogin".to_string())]
    );
}

#[tokio::test]
async fn backbone_failures_pass_through_as_sentinels() {
    let stub = Arc::new(StubProvisioner::default());
    let client = BridgeClient::new(spawn_server(stub).await);

    assert!(client.create_identity().await.is_none());
    assert_eq!(client.create_room("Deal #1: Untitled", "s", "b").await, "");
}

#[tokio::test]
async fn silent_bridge_times_out_to_sentinels() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        // accept and never answer
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let client = BridgeClient::new(addr).with_timeout(Duration::from_millis(200));
    let started = std::time::Instant::now();
    assert!(client.create_identity().await.is_none());
    assert_eq!(client.create_room("Deal #1: Bike", "s", "b").await, "");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn unreachable_bridge_yields_sentinels() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let client = BridgeClient::new(addr);
    assert!(client.create_identity().await.is_none());
    assert_eq!(client.create_room("Deal #1: Bike", "s", "b").await, "");
}

#[tokio::test]
async fn malformed_request_gets_error_reply() {
    let addr = spawn_server(Arc::new(StubProvisioner::default())).await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    framed.send(Bytes::from_static(b"{\"pattern\":\"drop_tables\"}")).await.unwrap();
    let frame = framed.next().await.unwrap().unwrap();
    let reply: BridgeReply = serde_json::from_slice(&frame).unwrap();
    assert!(matches!(reply, BridgeReply::Error(_)));
}
