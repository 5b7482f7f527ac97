use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use dealchat_types::models::BackboneIdentity;

use crate::api::{BackboneApi, BackboneError, RoomRequest};
use crate::config::BackboneConfig;
use crate::http::HttpBackbone;
use crate::retry::{self, RetryPolicy};
use crate::{Provisioner, UnreadSink};

const LOGIN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const LOGIN_LEN: usize = 16;
const SECRET_LEN: usize = 16;

pub(crate) struct Backend {
    pub(crate) config: BackboneConfig,
    pub(crate) api: Arc<dyn BackboneApi>,
}

/// Owns the backbone service account. Every operation degrades to an empty
/// result instead of failing when the backbone is unconfigured or unreachable.
pub struct BackboneClient {
    pub(crate) backend: Option<Backend>,
    session: RwLock<Option<String>>,
    pub(crate) sink: OnceLock<Arc<dyn UnreadSink>>,
    room_retry: RetryPolicy,
}

impl BackboneClient {
    /// Client talking HTTP to the configured homeserver, or a disabled client
    /// when `config` is `None`.
    pub fn new(config: Option<BackboneConfig>) -> Self {
        match config {
            Some(config) => {
                let api = Arc::new(HttpBackbone::new(&config.base_url));
                Self::with_api(config, api)
            }
            None => Self::disabled(),
        }
    }

    pub fn with_api(config: BackboneConfig, api: Arc<dyn BackboneApi>) -> Self {
        Self::build(Some(Backend { config, api }))
    }

    pub fn disabled() -> Self {
        Self::build(None)
    }

    fn build(backend: Option<Backend>) -> Self {
        Self {
            backend,
            session: RwLock::new(None),
            sink: OnceLock::new(),
            room_retry: retry::ROOM_CREATION,
        }
    }

    /// Wires the receiver of live "new message" notifications. Called once
    /// after both the client and the discussion store exist.
    pub fn set_unread_sink(&self, sink: Arc<dyn UnreadSink>) {
        if self.sink.set(sink).is_err() {
            warn!("Unread sink already set; ignoring");
        }
    }

    /// Logs the service account in. Returns false (and stays uninitialized)
    /// when settings are missing or the login fails.
    pub async fn initialize(&self) -> bool {
        let Some(backend) = &self.backend else {
            warn!("Backbone connection settings missing; chat bridge disabled");
            return false;
        };

        let mut session = self.session.write().await;
        if session.is_some() {
            return true;
        }

        match backend
            .api
            .login(&backend.config.service_user, &backend.config.service_password)
            .await
        {
            Ok(s) => {
                info!("Logged in to backbone as {}", s.user_id);
                *session = Some(s.access_token);
                true
            }
            Err(e) => {
                error!("Backbone login failed: {}", e);
                false
            }
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Current service token, logging in first if needed.
    pub(crate) async fn access_token(&self) -> Result<String, BackboneError> {
        if let Some(token) = self.session.read().await.as_ref() {
            return Ok(token.clone());
        }
        if self.backend.is_none() {
            return Err(BackboneError::NotConfigured);
        }
        if !self.initialize().await {
            return Err(BackboneError::NoSession);
        }
        self.session.read().await.clone().ok_or(BackboneError::NoSession)
    }

    /// Drops a token the backbone rejected so the next call logs in again.
    pub(crate) async fn invalidate_session(&self) {
        *self.session.write().await = None;
    }

    pub async fn create_identity(&self) -> Option<BackboneIdentity> {
        let backend = self.backend.as_ref()?;

        let token = match self.access_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!("Cannot create backbone identity: {}", e);
                return None;
            }
        };

        let identity = generate_identity();
        let user_id = backend.config.user_id_for(&identity.username);
        match backend.api.register_user(&token, &user_id, &identity.password).await {
            Ok(()) => {
                info!("Created backbone identity {}", user_id);
                Some(identity)
            }
            Err(e) => {
                if matches!(e, BackboneError::Unauthorized) {
                    self.invalidate_session().await;
                }
                warn!("Backbone identity creation failed: {}", e);
                None
            }
        }
    }

    /// Creates a private room inviting the non-empty handles. Returns the room
    /// handle, or an empty string once every attempt failed.
    pub async fn create_room(&self, name: &str, party_a: &str, party_b: &str) -> String {
        let handles: Vec<&str> = [party_a, party_b].into_iter().filter(|h| !h.is_empty()).collect();
        if handles.is_empty() {
            debug!("No backbone handles for room '{}'; skipping", name);
            return String::new();
        }
        let Some(backend) = &self.backend else {
            return String::new();
        };

        let request = RoomRequest {
            name: name.to_string(),
            invite: handles.iter().map(|h| backend.config.user_id_for(h)).collect(),
        };
        let request = &request;

        let result = self
            .room_retry
            .run(|attempt| async move {
                let token = self.access_token().await?;
                match backend.api.create_room(&token, request).await {
                    Ok(room_id) => Ok(room_id),
                    Err(e) => {
                        warn!("Room creation attempt {} failed: {}", attempt, e);
                        if matches!(e, BackboneError::Unauthorized) {
                            self.invalidate_session().await;
                        }
                        Err(e)
                    }
                }
            })
            .await;

        match result {
            Ok(room_id) => {
                info!("Created backbone room {} for '{}'", room_id, name);
                room_id
            }
            Err(e) => {
                error!("Giving up on room '{}' after {} attempts: {}", name, self.room_retry.max_attempts, e);
                String::new()
            }
        }
    }
}

#[async_trait]
impl Provisioner for BackboneClient {
    async fn create_identity(&self) -> Option<BackboneIdentity> {
        BackboneClient::create_identity(self).await
    }

    async fn create_room(&self, name: &str, seller_login: &str, buyer_login: &str) -> String {
        BackboneClient::create_room(self, name, seller_login, buyer_login).await
    }
}

fn generate_identity() -> BackboneIdentity {
    let mut rng = rand::rng();
    let username = (0..LOGIN_LEN)
        .map(|_| LOGIN_CHARSET[rng.random_range(0..LOGIN_CHARSET.len())] as char)
        .collect();
    let password = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect();
    BackboneIdentity { username, password }
}
