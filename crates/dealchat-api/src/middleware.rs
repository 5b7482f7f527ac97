use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use dealchat_types::api::Claims;
use dealchat_types::models::Role;

use crate::auth::AppState;
use crate::error::ApiError;

/// Roles allowed through `require_role` on the admin routes.
pub const ADMIN_ONLY: &[Role] = &[Role::Admin];

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

pub fn issue_token(
    secret: &str,
    user_id: i64,
    email: &str,
    role: Role,
    ttl: chrono::Duration,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        role,
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// HS256 verification shared by the HTTP guard and the relay handshake.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, AuthError> {
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

/// Validates the bearer token and stores its `Claims` in the request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers()).ok_or(AuthError::MissingToken)?;
    let claims = verify_token(&state.jwt_secret, &token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Must be layered inside `require_auth`.
pub async fn require_role(
    State(allowed): State<&'static [Role]>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = req.extensions().get::<Claims>().ok_or(ApiError::Unauthorized)?;
    if !allowed.contains(&claims.role) {
        return Err(ApiError::Forbidden(format!("role '{}' may not access this route", claims.role)));
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn issued_token_verifies() {
        let token = issue_token("s3cret", 7, "a@b.c", Role::Admin, chrono::Duration::hours(1)).unwrap();
        let claims = verify_token("s3cret", &token).unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.email, "a@b.c");
        assert_eq!(claims.role, Role::Admin);
    }

    #[test]
    fn wrong_secret_and_expiry_are_rejected() {
        let token = issue_token("s3cret", 7, "a@b.c", Role::User, chrono::Duration::hours(1)).unwrap();
        assert!(verify_token("other", &token).is_err());

        let expired = issue_token("s3cret", 7, "a@b.c", Role::User, chrono::Duration::hours(-2)).unwrap();
        assert!(verify_token("s3cret", &expired).is_err());
        assert!(matches!(verify_token("s3cret", ""), Err(AuthError::MissingToken)));
    }

    #[test]
    fn bearer_header_is_parsed() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());
        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));
    }
}
