//! Backbone-side process: owns the service account, answers provisioning
//! requests from `dealchat` and follows the backbone's live event stream.

use std::sync::Arc;

use tracing::{info, warn};

use dealchat_api::DiscussionStore;
use dealchat_backbone::BackboneClient;
use dealchat_bridge::BridgeServer;
use dealchat_db::Database;
use dealchat_server::config::BridgeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    dealchat_server::init_tracing();

    let config = BridgeConfig::from_env();
    if config.backbone.is_none() {
        warn!("No backbone settings; provisioning will return empty results");
    }

    let db = Arc::new(Database::open(&config.db_path)?);
    let backbone = Arc::new(BackboneClient::new(config.backbone));

    // Store and client point at each other; wire the back-reference now that both exist
    let store = Arc::new(DiscussionStore::new(db, backbone.clone()));
    backbone.set_unread_sink(store);

    let listener_task = backbone.start().await;

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Dealchat bridge listening on {}", config.listen_addr);

    tokio::select! {
        _ = BridgeServer::new(backbone).run(listener) => {}
        _ = dealchat_server::shutdown_signal() => {}
    }

    if let Some(task) = listener_task {
        task.abort();
    }
    Ok(())
}
