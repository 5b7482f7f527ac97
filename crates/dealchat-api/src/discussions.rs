use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use dealchat_types::api::{Claims, MarkReadResponse, UnreadCountResponse};
use dealchat_types::models::Role;

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub cursor: Option<i64>,
    pub limit: Option<u32>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.find_by_user(claims.sub).await?))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let count = state.store.unread_count(claims.sub).await?;
    Ok(Json(UnreadCountResponse { count }))
}

/// Participants and admins only.
pub async fn detail(
    State(state): State<AppState>,
    Path(discussion_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state
        .store
        .find_by_id(discussion_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("discussion".into()))?;
    if claims.role != Role::Admin && !detail.discussion.is_participant(claims.sub) {
        return Err(ApiError::Forbidden(format!(
            "not a participant of discussion {}",
            discussion_id
        )));
    }
    Ok(Json(detail))
}

pub async fn start(
    State(state): State<AppState>,
    Path(deal_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.start(deal_id, claims.sub).await?))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(discussion_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.mark_read(discussion_id, claims.sub).await?;
    Ok(Json(MarkReadResponse { success: true }))
}

pub async fn messages(
    State(state): State<AppState>,
    Path(discussion_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .store
        .message_history(discussion_id, claims.sub, query.cursor, query.limit)
        .await?;
    Ok(Json(page))
}
