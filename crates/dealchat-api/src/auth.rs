use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::{Path, State}, http::StatusCode, response::IntoResponse};
use tracing::{error, info, warn};

use dealchat_backbone::Provisioner;
use dealchat_db::Database;
use dealchat_types::api::{AuthResponse, BackboneLoginResponse, LoginRequest, RegisterRequest};
use dealchat_types::models::Role;

use crate::error::ApiError;
use crate::middleware::issue_token;
use crate::store::DiscussionStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub store: Arc<DiscussionStore>,
    pub provisioner: Arc<dyn Provisioner>,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
}

/// Outcome of asking the backbone for a user's identity.
#[derive(Debug, PartialEq, Eq)]
pub enum IdentityOutcome {
    Provisioned(String),
    AlreadyPresent,
    Unavailable,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let name = req.name.trim().to_string();
    if email.len() > 254 || !email.contains('@') {
        return Err(ApiError::Validation("email is not valid".into()));
    }
    if name.is_empty() || name.chars().count() > 64 {
        return Err(ApiError::Validation("name must be 1-64 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation("password must be at least 8 characters".into()));
    }

    let db = state.db.clone();
    let lookup = email.clone();
    if blocking(move || db.get_user_by_email(&lookup)).await?.is_some() {
        return Err(ApiError::Conflict("email already registered".into()));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let db = state.db.clone();
    let (insert_email, insert_name) = (email.clone(), name);
    let user_id = blocking(move || db.create_user(&insert_email, &insert_name, &password_hash, Role::User)).await?;
    info!("Registered user {} ({})", user_id, email);

    match provision_identity(&state, user_id).await {
        Ok(IdentityOutcome::Provisioned(login)) => info!("User {} has backbone login {}", user_id, login),
        Ok(other) => warn!("User {} registered without a backbone identity ({:?})", user_id, other),
        Err(e) => warn!("Backbone identity for user {} failed: {}", user_id, e),
    }

    let token = issue_token(&state.jwt_secret, user_id, &email, Role::User, state.token_ttl)?;

    Ok((StatusCode::CREATED, Json(AuthResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let email = req.email.trim().to_lowercase();
    let user = blocking(move || db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&user.password).map_err(|e| {
        error!("Stored hash for user {} is unreadable: {}", user.id, e);
        anyhow::anyhow!("corrupt password hash")
    })?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let token = issue_token(&state.jwt_secret, user.id, &user.email, user.role, state.token_ttl)?;

    Ok(Json(AuthResponse { user_id: user.id, token }))
}

/// Admin-only: mint a backbone identity for a user registered while the
/// backbone was down.
pub async fn create_backbone_identity(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    match provision_identity(&state, user_id).await? {
        IdentityOutcome::Provisioned(backbone_login) => {
            Ok((StatusCode::CREATED, Json(BackboneLoginResponse { user_id, backbone_login })))
        }
        IdentityOutcome::AlreadyPresent => Err(ApiError::Conflict(format!(
            "user {} already has a backbone identity",
            user_id
        ))),
        IdentityOutcome::Unavailable => Err(ApiError::Unavailable("chat backbone is unavailable".into())),
    }
}

/// Creates and stores a backbone identity unless the user already has one.
pub async fn provision_identity(state: &AppStateInner, user_id: i64) -> Result<IdentityOutcome, ApiError> {
    let db = state.db.clone();
    let user = blocking(move || db.get_user_by_id(user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("user".into()))?;
    if user.backbone_login.is_some() {
        return Ok(IdentityOutcome::AlreadyPresent);
    }

    let Some(identity) = state.provisioner.create_identity().await else {
        return Ok(IdentityOutcome::Unavailable);
    };

    let db = state.db.clone();
    let login = identity.username.clone();
    let stored = blocking(move || db.set_backbone_identity(user_id, &identity.username, &identity.password)).await?;
    if stored {
        Ok(IdentityOutcome::Provisioned(login))
    } else {
        Ok(IdentityOutcome::AlreadyPresent)
    }
}

async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        anyhow::anyhow!("blocking task failed")
    })?;
    Ok(result?)
}
