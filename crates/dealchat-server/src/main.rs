use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use dealchat_api::{AppStateInner, DiscussionStore};
use dealchat_backbone::Provisioner;
use dealchat_bridge::BridgeClient;
use dealchat_db::Database;
use dealchat_gateway::{Dispatcher, Relay, RelayState};
use dealchat_server::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    dealchat_server::init_tracing();

    let config = ServerConfig::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);

    // Room and identity provisioning goes through the bridge process
    let provisioner: Arc<dyn Provisioner> = Arc::new(BridgeClient::new(config.bridge_addr.clone()));
    let store = Arc::new(DiscussionStore::new(db.clone(), provisioner.clone()));

    let app_state = Arc::new(AppStateInner {
        db,
        store: store.clone(),
        provisioner,
        jwt_secret: config.jwt_secret.clone(),
        token_ttl: config.token_ttl,
    });

    let relay_state = RelayState {
        relay: Relay::new(store, Dispatcher::new()),
        jwt_secret: Arc::from(config.jwt_secret.as_str()),
    };

    let app = dealchat_api::router(app_state)
        .merge(dealchat_gateway::router(relay_state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Dealchat server listening on {}", config.listen_addr);
    info!("Provisioning through bridge at {}", config.bridge_addr);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(dealchat_server::shutdown_signal())
        .await?;

    Ok(())
}
